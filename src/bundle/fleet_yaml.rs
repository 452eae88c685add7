//! Parses `fleet.yaml`/`fleet.yml` (spec §4.3 step 2) into the pieces that
//! seed a Bundle's spec: targets, target restrictions, rollout strategy,
//! and default deployment options.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::types::bundle::{BundleDeploymentOptions, RolloutStrategy};
use crate::types::target::BundleTarget;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FleetYaml {
    #[serde(default)]
    pub targets: Vec<BundleTarget>,

    #[serde(default, rename = "targetCustomizations")]
    pub target_customizations: Vec<BundleTarget>,

    #[serde(default, rename = "rolloutStrategy")]
    pub rollout_strategy: RolloutStrategy,

    #[serde(default, flatten)]
    pub default_options: BundleDeploymentOptions,

    #[serde(default, rename = "disableDepsUpdate")]
    pub disable_deps_update: bool,

    #[serde(default, rename = "ignoreApplyConfigs")]
    pub ignore_apply_configs: bool,
}

pub const FILE_NAMES: &[&str] = &["fleet.yaml", "fleet.yml"];

/// Reads and parses whichever of `fleet.yaml`/`fleet.yml` is present in
/// `dir`. Returns `Ok(None)` when neither exists, matching the "missing
/// fleet.yaml -> skip and log" failure mode in spec §4.3.
pub fn read(dir: &std::path::Path) -> AppResult<Option<FleetYaml>> {
    for name in FILE_NAMES {
        let path = dir.join(name);
        if path.is_file() {
            let contents = std::fs::read_to_string(&path).map_err(AppError::Io)?;
            let parsed: FleetYaml = serde_yaml::from_str(&contents)?;
            return Ok(Some(parsed));
        }
    }
    Ok(None)
}

/// Auto-names targets that omit `name` as `target000`, `target001`, ... in
/// declaration order (spec §4.3 step 8).
pub fn default_target_names(mut targets: Vec<BundleTarget>) -> Vec<BundleTarget> {
    for (i, target) in targets.iter_mut().enumerate() {
        if target.match_.name.is_none() {
            target.match_.name = Some(format!("target{i:03}"));
        }
    }
    targets
}

/// Propagates the root-level `helm.{repo,chart,version}` onto any per-target
/// `BundleDeploymentOptions.helm` that leaves those fields unset (spec §4.3
/// step 8).
pub fn propagate_root_helm(defaults: &BundleDeploymentOptions, targets: &mut [BundleTarget]) {
    let Some(root_helm) = &defaults.helm else {
        return;
    };
    for target in targets.iter_mut() {
        let Some(options) = &mut target.options else {
            continue;
        };
        let helm = options.helm.get_or_insert_with(Default::default);
        if helm.repo.is_none() {
            helm.repo = root_helm.repo.clone();
        }
        if helm.chart.is_none() {
            helm.chart = root_helm.chart.clone();
        }
        if helm.version.is_none() {
            helm.version = root_helm.version.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_fleet_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("fleet.yaml"),
            "targets:\n  - clusterSelector:\n      matchLabels:\n        env: prod\n",
        )
        .unwrap();

        let parsed = read(dir.path()).unwrap().unwrap();
        assert_eq!(parsed.targets.len(), 1);
    }

    #[test]
    fn missing_fleet_yaml_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(dir.path()).unwrap().is_none());
    }

    #[test]
    fn default_names_are_sequential() {
        let targets = vec![BundleTarget::default(), BundleTarget::default()];
        let named = default_target_names(targets);
        assert_eq!(named[0].match_.name.as_deref(), Some("target000"));
        assert_eq!(named[1].match_.name.as_deref(), Some("target001"));
    }
}
