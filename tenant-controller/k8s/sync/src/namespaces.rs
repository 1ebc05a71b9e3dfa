//! Propagates a tenant's labels and annotations onto its namespaces.

use crate::{apply, Cluster, Context, Result};
use std::collections::BTreeMap;
use tenant_controller_core::{join_first_error, retry_on_conflict};
use tenant_controller_k8s_api::{annotations::NODE_SELECTOR, Namespace, ResourceExt, Tenant};

/// The labels and annotations every namespace of a tenant carries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

// === impl Metadata ===

impl Metadata {
    pub fn for_namespace(tenant_label: &str, tenant: &Tenant, namespace: &str) -> Self {
        let mut labels = BTreeMap::new();
        let mut annotations = BTreeMap::new();
        if let Some(extra) = tenant
            .spec
            .namespace_options
            .as_ref()
            .and_then(|o| o.additional_metadata.as_ref())
        {
            labels.extend(extra.labels.clone());
            annotations.extend(extra.annotations.clone());
        }
        labels.insert(tenant_label.to_string(), tenant.name_any());
        labels.insert("name".to_string(), namespace.to_string());

        if !tenant.spec.node_selector.is_empty() {
            let selector = tenant
                .spec
                .node_selector
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            annotations.insert(NODE_SELECTOR.to_string(), selector);
        }

        Self {
            labels,
            annotations,
        }
    }

    /// Merges into `ns`, leaving unrelated keys alone.
    pub fn apply(&self, ns: &mut Namespace) {
        let labels = ns.labels_mut();
        labels.extend(self.labels.clone());
        let annotations = ns.annotations_mut();
        annotations.extend(self.annotations.clone());
    }
}

/// Merges the tenant's metadata into each namespace, writing only those
/// that change.
pub async fn sync<C: Cluster>(
    ctx: Context<'_, C>,
    tenant: &Tenant,
    namespaces: &[String],
) -> Result<()> {
    let tenant_label = ctx.registry.tenant_label();
    join_first_error(namespaces.iter().map(|name| {
        let metadata = Metadata::for_namespace(&tenant_label, tenant, name);
        async move {
            let metadata = &metadata;
            let result = retry_on_conflict(ctx.backoff, move || {
                apply::update::<C, Namespace, _>(ctx.cluster, None, name, move |ns| {
                    metadata.apply(ns);
                    Ok(())
                })
            })
            .await;
            match result {
                Ok(Some(op)) => {
                    tracing::debug!(namespace = %name, result = %op, "Namespace metadata synced")
                }
                Ok(None) => tracing::debug!(namespace = %name, "Namespace is gone"),
                Err(error) => {
                    tracing::warn!(namespace = %name, %error, "Cannot sync namespace metadata");
                    return Err(error);
                }
            }
            Ok(())
        }
    }))
    .await
}
