//! Canonicalizes a provider-reported repo URL so it can be matched against
//! a GitRepo's `spec.repo` regardless of `.git` suffix, scheme, or trailing
//! slash differences (spec §4.2 / §9 Design Note on Azure DevOps URLs).

use regex::Regex;

/// Strips scheme, auth, `.git` suffix and trailing slash, lowercases the
/// host, so `https://github.com/rancher/fleet.git` and
/// `git@github.com:rancher/fleet` both canonicalize to `github.com/rancher/fleet`.
pub fn canonicalize(repo_url: &str) -> String {
    let scheme_stripped = strip_scheme(repo_url);
    let ssh_normalized = normalize_ssh_form(&scheme_stripped);
    let no_suffix = ssh_normalized
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .to_string();

    let mut parts = no_suffix.splitn(2, '/');
    let host = parts.next().unwrap_or_default().to_lowercase();
    let rest = parts.next().unwrap_or_default();
    if rest.is_empty() {
        host
    } else {
        format!("{host}/{rest}")
    }
}

fn strip_scheme(url: &str) -> String {
    for prefix in ["https://", "http://", "ssh://", "git://"] {
        if let Some(rest) = url.strip_prefix(prefix) {
            // drop any userinfo@ component
            return match rest.split_once('@') {
                Some((_, after)) => after.to_string(),
                None => rest.to_string(),
            };
        }
    }
    url.to_string()
}

/// `git@host:owner/repo` (scp-like syntax) -> `host/owner/repo`.
fn normalize_ssh_form(url: &str) -> String {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^([^@/]+@)?([^:/]+):(.+)$").unwrap());
    if let Some(caps) = re.captures(url) {
        if !caps[3].starts_with("//") {
            return format!("{}/{}", &caps[2], &caps[3]);
        }
    }
    url.to_string()
}

/// Azure DevOps reports repo URLs with an `_git` path segment and sometimes
/// a `DefaultCollection` prefix that `spec.repo` configured by the user
/// typically omits; strip both for the purposes of comparison.
pub fn canonicalize_azure_devops(repo_url: &str) -> String {
    let c = canonicalize(repo_url);
    c.replace("defaultcollection/", "").replace("_git/", "")
}

pub fn matches(configured_repo: &str, reported_repo: &str) -> bool {
    canonicalize(configured_repo) == canonicalize(reported_repo)
        || canonicalize_azure_devops(configured_repo) == canonicalize_azure_devops(reported_repo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_and_ssh_forms_match() {
        assert!(matches(
            "https://github.com/rancher/fleet.git",
            "git@github.com:rancher/fleet.git"
        ));
    }

    #[test]
    fn trailing_slash_ignored() {
        assert!(matches(
            "https://github.com/rancher/fleet/",
            "https://github.com/rancher/fleet"
        ));
    }

    #[test]
    fn different_repos_do_not_match() {
        assert!(!matches(
            "https://github.com/rancher/fleet",
            "https://github.com/rancher/rancher"
        ));
    }

    #[test]
    fn azure_devops_git_segment_ignored() {
        assert!(matches(
            "https://dev.azure.com/org/project/_git/repo",
            "https://dev.azure.com/org/project/repo"
        ));
    }
}
