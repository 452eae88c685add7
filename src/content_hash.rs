//! Content addressing: the `deploymentID` invariant from spec §3 (invariant 1)
//! is a SHA-256 over a canonical serialization of (resources, options), so
//! two independently-constructed but equal Bundles always produce the same
//! BundleDeployment identity.

use sha2::{Digest, Sha256};

use crate::types::bundle::{BundleDeploymentOptions, BundleResource};

/// Computes the deployment ID for a set of resources plus the merged
/// deployment options that will be applied with them.
///
/// Resources are sorted by name before hashing so that construction order
/// never affects the result - the Bundle Reader does not guarantee a stable
/// walk order across filesystems.
pub fn compute(resources: &[BundleResource], options: &BundleDeploymentOptions) -> String {
    let mut sorted: Vec<&BundleResource> = resources.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for resource in &sorted {
        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.content.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.encoding.as_bytes());
        hasher.update([0u8]);
    }

    // serde_json serializes struct fields in declaration order, which is
    // fixed at compile time, so this is already canonical without a sort pass.
    let options_json = serde_json::to_vec(options).unwrap_or_default();
    hasher.update(&options_json);

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, content: &str) -> BundleResource {
        BundleResource {
            name: name.to_string(),
            content: content.to_string(),
            encoding: String::new(),
        }
    }

    #[test]
    fn deterministic_across_construction_order() {
        let options = BundleDeploymentOptions::default();
        let a = vec![resource("b.yaml", "2"), resource("a.yaml", "1")];
        let b = vec![resource("a.yaml", "1"), resource("b.yaml", "2")];
        assert_eq!(compute(&a, &options), compute(&b, &options));
    }

    #[test]
    fn differs_when_options_differ() {
        let resources = vec![resource("a.yaml", "1")];
        let mut options_a = BundleDeploymentOptions::default();
        let mut options_b = BundleDeploymentOptions::default();
        options_a.default_namespace = Some("ns-a".to_string());
        options_b.default_namespace = Some("ns-b".to_string());
        assert_ne!(compute(&resources, &options_a), compute(&resources, &options_b));
    }

    #[test]
    fn differs_when_content_differs() {
        let options = BundleDeploymentOptions::default();
        let a = vec![resource("a.yaml", "1")];
        let b = vec![resource("a.yaml", "2")];
        assert_ne!(compute(&a, &options), compute(&b, &options));
    }
}
