//! Deployer (C7): renders a Bundle's Helm chart and installs/upgrades the
//! release (spec §4.7). Shells out to the `helm` binary the way the teacher
//! shells out to `docker`/`git` in `portainer.rs` via `tokio::process::Command`
//! rather than linking a Helm SDK, since no mature pure-Rust Helm engine
//! exists in the ecosystem this crate otherwise draws from.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use kube::api::DynamicObject;

use crate::error::{AppError, AppResult};
use crate::types::bundle::HelmOptions;

use super::lookup_scan;

/// One resource Helm rendered, identified well enough to drive
/// Server-Side Apply and desired-set pruning.
#[derive(Clone, Debug)]
pub struct RenderedResource {
    pub object: DynamicObject,
}

pub struct RenderRequest<'a> {
    pub chart_dir: &'a Path,
    pub release_name: &'a str,
    pub namespace: &'a str,
    pub values: &'a serde_json::Value,
}

pub struct InstallRequest<'a> {
    pub chart_dir: &'a Path,
    pub release_name: &'a str,
    pub namespace: &'a str,
    pub values: &'a serde_json::Value,
    pub options: &'a HelmOptions,
}

#[derive(Clone, Debug, Default)]
pub struct InstallOutcome {
    pub release: String,
    pub resources: Vec<RenderedResource>,
}

/// Abstraction over "a thing that can render and install a Helm chart",
/// so the rollout/reconcile logic can be tested against a fake without
/// shelling out (spec §4.7 is deliberately I/O-free in its pacing/targeting
/// neighbors; this is the one component that can't be).
#[async_trait]
pub trait HelmRenderer: Send + Sync {
    async fn template(&self, req: &RenderRequest<'_>) -> AppResult<Vec<RenderedResource>>;
    async fn install(&self, req: &InstallRequest<'_>) -> AppResult<InstallOutcome>;
    async fn rollback(&self, release_name: &str, namespace: &str) -> AppResult<()>;
}

/// Real implementation, invoking the `helm` CLI found on `$PATH`.
pub struct ShellHelm {
    pub binary: String,
}

impl Default for ShellHelm {
    fn default() -> Self {
        Self {
            binary: "helm".to_string(),
        }
    }
}

impl ShellHelm {
    async fn run(&self, args: &[&str], values: &serde_json::Value) -> AppResult<String> {
        use tokio::io::AsyncWriteExt;
        use tokio::process::Command;

        let mut child = Command::new(&self.binary)
            .args(args)
            .arg("-f")
            .arg("-")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(AppError::Io)?;

        let values_yaml = serde_yaml::to_string(values)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(values_yaml.as_bytes()).await.map_err(AppError::Io)?;
        }

        let output = child.wait_with_output().await.map_err(AppError::Io)?;
        if !output.status.success() {
            return Err(AppError::Helm(format!(
                "helm {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl HelmRenderer for ShellHelm {
    async fn template(&self, req: &RenderRequest<'_>) -> AppResult<Vec<RenderedResource>> {
        scan_chart_templates(req.chart_dir)?;

        let chart_dir = req.chart_dir.to_string_lossy().into_owned();
        let args = vec![
            "template",
            req.release_name,
            chart_dir.as_str(),
            "--namespace",
            req.namespace,
        ];
        let yaml = self.run(&args, req.values).await?;
        parse_rendered_manifests(&yaml)
    }

    async fn install(&self, req: &InstallRequest<'_>) -> AppResult<InstallOutcome> {
        scan_chart_templates(req.chart_dir)?;

        let chart_dir = req.chart_dir.to_string_lossy().into_owned();
        let mut args = vec![
            "upgrade",
            req.release_name,
            chart_dir.as_str(),
            "--install",
            "--namespace",
            req.namespace,
            "--create-namespace",
        ];

        if req.options.atomic {
            args.push("--atomic");
        }
        if req.options.force {
            args.push("--force");
        }
        if req.options.take_ownership {
            args.push("--take-ownership");
        }
        if req.options.wait_for_jobs {
            args.push("--wait-for-jobs");
        }

        let max_history = req.options.max_history.unwrap_or(10).to_string();
        args.push("--history-max");
        args.push(&max_history);

        let timeout = req.options.timeout_seconds.map(|t| format!("{t}s"));
        if let Some(timeout) = &timeout {
            args.push("--timeout");
            args.push(timeout);
        }

        args.push("--output");
        args.push("json");

        let stdout = self.run(&args, req.values).await?;
        let resources = self.template(&RenderRequest {
            chart_dir: req.chart_dir,
            release_name: req.release_name,
            namespace: req.namespace,
            values: req.values,
        }).await?;

        let _ = stdout;
        Ok(InstallOutcome {
            release: req.release_name.to_string(),
            resources,
        })
    }

    async fn rollback(&self, release_name: &str, namespace: &str) -> AppResult<()> {
        let args = vec!["rollback", release_name, "--namespace", namespace];
        self.run(&args, &serde_json::Value::Null).await?;
        Ok(())
    }
}

/// Scans every `.tpl`/`.yaml` template under `chart_dir/templates` for
/// `lookup(...)` calls, erroring before `helm` is even invoked (spec §4.7
/// step 3).
fn scan_chart_templates(chart_dir: &Path) -> AppResult<()> {
    let templates_dir = chart_dir.join("templates");
    if !templates_dir.is_dir() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(&templates_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let hits = lookup_scan::find_lookup_calls(&contents);
        if !hits.is_empty() {
            return Err(AppError::Validation(format!(
                "{} uses the lookup function at line(s) {:?}, which is disallowed for offline rendering",
                entry.path().display(),
                hits
            )));
        }
    }
    Ok(())
}

/// Splits a `helm template` multi-document YAML stream into individual
/// `DynamicObject`s, skipping empty documents (comment-only source, a
/// conditional that rendered nothing).
fn parse_rendered_manifests(yaml: &str) -> AppResult<Vec<RenderedResource>> {
    let mut out = Vec::new();
    for doc in yaml.split("\n---").map(str::trim).filter(|d| !d.is_empty()) {
        let value: serde_yaml::Value = match serde_yaml::from_str(doc) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if matches!(value, serde_yaml::Value::Null) {
            continue;
        }
        let json = serde_json::to_value(&value)?;
        if json.get("kind").is_none() {
            continue;
        }
        let object: DynamicObject = serde_json::from_value(json)?;
        out.push(RenderedResource { object });
    }
    Ok(out)
}

/// Computes the desired set of resource identities from a render pass, for
/// the Drift Monitor's Orphaned/Missing classification (spec §4.8).
pub fn desired_set(resources: &[RenderedResource]) -> BTreeMap<(String, String, Option<String>, String), ()> {
    resources
        .iter()
        .map(|r| {
            let o = &r.object;
            let gvk = o.types.as_ref().map(|t| t.api_version.clone()).unwrap_or_default();
            let kind = o.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
            (
                (gvk, kind, o.metadata.namespace.clone(), o.metadata.name.clone().unwrap_or_default()),
                (),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_document_render_output() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let resources = parse_rendered_manifests(yaml).unwrap();
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn skips_blank_documents() {
        let yaml = "---\n# just a comment\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n";
        let resources = parse_rendered_manifests(yaml).unwrap();
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn desired_set_keys_by_gvk_namespace_name() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: ns\n";
        let resources = parse_rendered_manifests(yaml).unwrap();
        let set = desired_set(&resources);
        assert_eq!(set.len(), 1);
        assert!(set.contains_key(&("v1".to_string(), "ConfigMap".to_string(), Some("ns".to_string()), "a".to_string())));
    }
}
