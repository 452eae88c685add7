//! Well-known label/annotation keys used to join objects across the object
//! store (spec §6). Centralized here so the literal strings aren't
//! repeated at every call site.

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "gitjobctl";

pub const REPO_NAME: &str = "fleet.cattle.io/repo-name";
pub const BUNDLE_NAME: &str = "fleet.cattle.io/bundle-name";
pub const BUNDLE_NAMESPACE: &str = "fleet.cattle.io/bundle-namespace";
pub const CLUSTER: &str = "fleet.cattle.io/cluster";
pub const MANAGED: &str = "fleet.cattle.io/managed";
pub const SHARD_REF: &str = "fleet.cattle.io/shard-ref";

pub const API_GROUP: &str = "gitjob.fleet.cattle.io";
pub const API_VERSION: &str = "v1alpha1";
