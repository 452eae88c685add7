use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONTENT_KIND: &str = "Content";

/// Immutable, content-addressed blob: the gzip+base64-encoded byte payload
/// shared by every Bundle that happens to produce identical resources.
/// Cluster-scoped because the same content can be referenced by Bundles in
/// different namespaces.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitjob.fleet.cattle.io",
    version = "v1alpha1",
    kind = "Content",
    shortname = "bdc",
    status = "ContentStatus"
)]
pub struct ContentSpec {
    /// Hex-encoded SHA-256 of the decompressed payload; also the object name.
    pub sha256sum: String,
    /// base64-encoded gzip bytes.
    pub content: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ContentStatus {}

impl Content {
    pub fn object_name(sha256sum: &str) -> String {
        sha256sum.to_string()
    }
}
