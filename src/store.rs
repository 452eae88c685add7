//! Thin wrapper over `kube::Api`, generalizing the teacher's
//! `kubernetes::api` module (Server-Side Apply upsert + discovery-driven
//! `DynamicObject` helpers) to the typed CRDs this crate reconciles, plus a
//! small in-memory fake used by unit tests that don't need a real cluster.

use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, GroupVersionKind, Patch, PatchParams, TypeMeta};
use kube::core::discovery;
use kube::discovery::pinned_kind;
use kube::{
    api::{Api, DynamicObject},
    Client, Discovery, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::error::{AppError, AppResult};

const FIELD_MANAGER: &str = "gitjobctl";

/// Server-Side Apply upsert for a typed namespaced resource, mirroring the
/// teacher's `apply()` for `DynamicObject` but keeping static typing where
/// the caller already knows the kind.
pub async fn apply_typed<K>(client: &Client, ns: &str, obj: &K) -> AppResult<K>
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    K::DynamicType: Default,
{
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| AppError::Internal("metadata.name required".to_string()))?;
    let api: Api<K> = Api::namespaced(client.clone(), ns);
    let pp = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&name, &pp, &Patch::Apply(obj))
        .await
        .map_err(AppError::Kubernetes)
}

/// Server-Side Apply upsert for a `DynamicObject`, used by the deployer when
/// applying arbitrary rendered resources whose GVK is only known at runtime.
pub async fn apply_dynamic(client: &Client, ns: &str, obj: DynamicObject) -> AppResult<DynamicObject> {
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| AppError::Internal("metadata.name required".to_string()))?;
    let gvk = GroupVersionKind::try_from(
        obj.types
            .as_ref()
            .ok_or_else(|| AppError::Internal("missing types on DynamicObject".to_string()))?,
    )
    .map_err(|e| AppError::Internal(format!("failed parsing GVK: {e}")))?;

    log::debug!("applying {}/{}", ns, name);

    let (ar, caps) = pinned_kind(client, &gvk)
        .await
        .map_err(|e| AppError::Internal(format!("GVK {gvk:?} not found via discovery: {e}")))?;

    let api: Api<DynamicObject> = match caps.scope {
        discovery::Scope::Namespaced => Api::namespaced_with(client.clone(), ns, &ar),
        discovery::Scope::Cluster => Api::all_with(client.clone(), &ar),
    };

    let pp = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&name, &pp, &Patch::Apply(obj))
        .await
        .map_err(AppError::Kubernetes)
}

pub async fn delete_dynamic(client: Client, obj: &DynamicObject) -> AppResult<()> {
    let name = obj.name_any();
    let ns = obj.metadata.namespace.clone();
    let gvk = GroupVersionKind::try_from(
        obj.types
            .as_ref()
            .ok_or_else(|| AppError::Internal("missing types on DynamicObject".to_string()))?,
    )
    .map_err(|e| AppError::Internal(format!("failed parsing GVK: {e}")))?;

    let (ar, caps) = pinned_kind(&client, &gvk)
        .await
        .map_err(|e| AppError::Internal(format!("GVK {gvk:?} not found via discovery: {e}")))?;

    let api: Api<DynamicObject> = match caps.scope {
        discovery::Scope::Namespaced => {
            let ns = ns.ok_or_else(|| {
                AppError::Internal("namespaced resource missing metadata.namespace".to_string())
            })?;
            Api::namespaced_with(client, &ns, &ar)
        }
        discovery::Scope::Cluster => Api::all_with(client, &ar),
    };

    api.delete(&name, &DeleteParams::default())
        .await
        .map_err(AppError::Kubernetes)?;
    Ok(())
}

/// Enumerates every namespaced object carrying our `managed-by` label, used
/// by the Drift Monitor to find orphaned resources a BundleDeployment no
/// longer declares (spec §4.8, "Orphaned" classification).
pub async fn list_managed_objects(client: &Client, ns: &str) -> AppResult<Vec<DynamicObject>> {
    use kube::api::ListParams;

    let disc = Discovery::new(client.clone()).run().await?;
    let mut out = Vec::new();

    for group in disc.groups() {
        for (ar, caps) in group.recommended_resources() {
            if caps.scope != discovery::Scope::Namespaced || ar.plural.contains('/') {
                continue;
            }
            let types = TypeMeta {
                api_version: ar.api_version.clone(),
                kind: ar.kind.clone(),
            };
            let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), ns, &ar);
            let lp = ListParams::default()
                .labels(&format!("{}={}", crate::labels::MANAGED_BY, crate::labels::MANAGED_BY_VALUE))
                .limit(500);

            let list = match api.list(&lp).await {
                Ok(l) => l,
                Err(kube::Error::Api(e)) if e.code == 405 || e.code == 403 || e.code == 404 => continue,
                Err(_) => continue,
            };

            out.extend(list.items.into_iter().map(|mut o| {
                o.types = o.types.or(Some(types.clone()));
                o
            }));
        }
    }

    Ok(out)
}

#[cfg(test)]
pub mod fake {
    //! An in-memory keyed store used by unit tests for components (rollout,
    //! targeting) that need to read/write objects without a real API server.
    use std::collections::BTreeMap;

    #[derive(Default)]
    pub struct FakeStore<T: Clone> {
        items: BTreeMap<String, T>,
    }

    impl<T: Clone> FakeStore<T> {
        pub fn new() -> Self {
            Self { items: BTreeMap::new() }
        }

        pub fn insert(&mut self, key: impl Into<String>, value: T) {
            self.items.insert(key.into(), value);
        }

        pub fn get(&self, key: &str) -> Option<&T> {
            self.items.get(key)
        }

        pub fn all(&self) -> Vec<&T> {
            self.items.values().collect()
        }
    }
}
