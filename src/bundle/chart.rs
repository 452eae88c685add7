//! Helm chart dependency resolution (spec §4.3 steps 6-7): resolves a
//! `(chart, version constraint)` pair against either a classic
//! `index.yaml` Helm repo or an OCI registry's tag list, then downloads the
//! chart into a content-addressed sub-prefix so multiple target-specific
//! charts can coexist in one Bundle.

use semver::{Version, VersionReq};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct HelmIndex {
    entries: std::collections::HashMap<String, Vec<HelmIndexEntry>>,
}

#[derive(Debug, Deserialize)]
struct HelmIndexEntry {
    version: String,
    urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedChart {
    pub version: String,
    pub download_url: String,
}

/// `.chart/<sha256(chart:repo:version)>` - the sub-prefix a downloaded
/// chart's files are placed under (spec §4.3 step 7).
pub fn chart_prefix(chart: &str, repo: &str, version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chart.as_bytes());
    hasher.update(b":");
    hasher.update(repo.as_bytes());
    hasher.update(b":");
    hasher.update(version.as_bytes());
    format!(".chart/{:x}", hasher.finalize())
}

/// An empty or `"*"` constraint means "use the latest". Otherwise `wanted`
/// must parse as a strict semver or a semver constraint (range), the
/// highest matching entry winning on ties.
pub async fn resolve_from_index(
    http: &reqwest::Client,
    repo: &str,
    chart: &str,
    wanted: &str,
) -> AppResult<ResolvedChart> {
    let index_url = format!("{}/index.yaml", repo.trim_end_matches('/'));
    let body = http
        .get(&index_url)
        .send()
        .await?
        .error_for_status()
        .map_err(AppError::Http)?
        .text()
        .await?;

    let index: HelmIndex = serde_yaml::from_str(&body)?;
    let entries = index
        .entries
        .get(chart)
        .ok_or_else(|| AppError::NotFound(format!("chart {chart:?} not found in {repo:?} index")))?;

    let best = pick_best_version(entries.iter().map(|e| e.version.as_str()), wanted)
        .ok_or_else(|| AppError::NotFound(format!("no version of {chart:?} satisfies {wanted:?}")))?;

    let entry = entries
        .iter()
        .find(|e| e.version == best)
        .expect("selected version must be present in entries");

    let download_url = entry
        .urls
        .first()
        .cloned()
        .ok_or_else(|| AppError::Validation(format!("chart {chart:?}@{best} has no download URL")))?;

    Ok(ResolvedChart {
        version: best,
        download_url,
    })
}

/// OCI registries expose tags via the distribution spec's `/tags/list`
/// endpoint; `oci_repo` is the full `oci://host/namespace/chart` reference.
pub async fn resolve_from_oci(http: &reqwest::Client, oci_repo: &str, wanted: &str) -> AppResult<ResolvedChart> {
    let path = oci_repo
        .strip_prefix("oci://")
        .ok_or_else(|| AppError::Validation(format!("not an oci:// reference: {oci_repo:?}")))?;

    let (registry, repo_path) = path
        .split_once('/')
        .ok_or_else(|| AppError::Validation(format!("malformed oci reference: {oci_repo:?}")))?;

    let tags_url = format!("https://{registry}/v2/{repo_path}/tags/list");

    #[derive(Deserialize)]
    struct TagsResponse {
        tags: Vec<String>,
    }

    let resp: TagsResponse = http
        .get(&tags_url)
        .send()
        .await?
        .error_for_status()
        .map_err(AppError::Http)?
        .json()
        .await?;

    // exact match wins outright, even if it isn't valid semver
    if resp.tags.iter().any(|t| t == wanted) {
        return Ok(ResolvedChart {
            version: wanted.to_string(),
            download_url: format!("oci://{registry}/{repo_path}:{wanted}"),
        });
    }

    let best = match pick_best_version(resp.tags.iter().map(String::as_str), wanted) {
        Some(best) => best,
        // A strict "X.Y.Z" that matches no tag resolves to "no chart", not an
        // error (spec §8 boundary behavior) - the caller decides what to do
        // with an empty result.
        None if is_strict_version(wanted) => {
            return Ok(ResolvedChart {
                version: String::new(),
                download_url: String::new(),
            });
        }
        None => return Err(AppError::NotFound(format!("no tag of {oci_repo:?} satisfies {wanted:?}"))),
    };

    Ok(ResolvedChart {
        version: best.clone(),
        download_url: format!("oci://{registry}/{repo_path}:{best}"),
    })
}

/// Whether `wanted` parses as an exact semver version rather than an empty/
/// wildcard/range constraint.
fn is_strict_version(wanted: &str) -> bool {
    Version::parse(wanted.trim().trim_start_matches('v')).is_ok()
}

/// Empty/`"*"` picks the highest parseable semver. Otherwise `wanted` is
/// tried as a strict version first (exact match), then as a `VersionReq`
/// range, picking the highest satisfying candidate.
fn pick_best_version<'a>(candidates: impl Iterator<Item = &'a str>, wanted: &str) -> Option<String> {
    let wanted = wanted.trim();
    let versions: Vec<(Version, &str)> = candidates
        .filter_map(|raw| Version::parse(raw.trim_start_matches('v')).ok().map(|v| (v, raw)))
        .collect();

    if wanted.is_empty() || wanted == "*" {
        return versions.into_iter().max_by(|a, b| a.0.cmp(&b.0)).map(|(_, raw)| raw.to_string());
    }

    if let Ok(exact) = Version::parse(wanted.trim_start_matches('v')) {
        // A strict version is an exact match or nothing - it must never fall
        // through to range semantics and silently resolve to some other,
        // possibly newer, version (spec §8).
        return versions.into_iter().find(|(v, _)| *v == exact).map(|(_, raw)| raw.to_string());
    }

    let req = VersionReq::parse(wanted).ok()?;
    versions
        .into_iter()
        .filter(|(v, _)| req.matches(v))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, raw)| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_when_unconstrained() {
        let versions = ["1.0.0", "1.2.0", "1.1.0"];
        assert_eq!(pick_best_version(versions.into_iter(), ""), Some("1.2.0".to_string()));
    }

    #[test]
    fn respects_semver_range() {
        let versions = ["1.0.0", "1.5.0", "2.0.0"];
        assert_eq!(
            pick_best_version(versions.into_iter(), "^1.0.0"),
            Some("1.5.0".to_string())
        );
    }

    #[test]
    fn exact_version_wins_over_range_logic() {
        let versions = ["1.0.0", "1.2.3"];
        assert_eq!(
            pick_best_version(versions.into_iter(), "1.2.3"),
            Some("1.2.3".to_string())
        );
    }

    #[test]
    fn strict_version_miss_does_not_fall_back_to_range_semantics() {
        // "1.2.3" would also satisfy a caret-range reading ("^1.2.3"), but a
        // strict version that isn't present must resolve to nothing, not to
        // a different, higher tag (spec §8).
        let versions = ["1.2.0", "1.9.0"];
        assert_eq!(pick_best_version(versions.into_iter(), "1.2.3"), None);
    }

    #[test]
    fn strict_version_is_detected() {
        assert!(is_strict_version("1.2.3"));
        assert!(is_strict_version("v1.2.3"));
        assert!(!is_strict_version(""));
        assert!(!is_strict_version("*"));
        assert!(!is_strict_version("^1.2.0"));
    }

    #[test]
    fn chart_prefix_is_stable() {
        let a = chart_prefix("nginx", "https://charts.example.com", "1.0.0");
        let b = chart_prefix("nginx", "https://charts.example.com", "1.0.0");
        assert_eq!(a, b);
        assert!(a.starts_with(".chart/"));
    }
}
