//! Replicates a tenant's declared objects into each of its namespaces.

use crate::{
    apply,
    cluster::Object,
    pruner, Cluster, Context, Result,
};
use tenant_controller_core::{join_first_error, naming, retry_on_conflict};
use tenant_controller_k8s_api::{
    tenant::AdditionalRoleBinding, LimitRange, LimitRangeSpec, NetworkPolicy, NetworkPolicySpec,
    QuotaScope, ResourceExt, ResourceQuota, ResourceQuotaSpec, RoleBinding, RoleRef, Tenant,
};
use tracing::{info, warn};

/// A namespaced kind whose objects are derived from entries of a tenant's spec.
pub trait Replica: Object + Default {
    type Item: Send + Sync;

    fn items(tenant: &Tenant) -> Vec<Self::Item>;

    /// The value of the type label identifying the object built from `item`.
    fn key(index: usize, _item: &Self::Item) -> String {
        index.to_string()
    }

    fn name(tenant: &str, index: usize, _item: &Self::Item) -> String {
        naming::object_name(tenant, index)
    }

    /// Copies the declared content onto the object.
    fn replicate(&mut self, tenant: &Tenant, item: &Self::Item);
}

impl Replica for NetworkPolicy {
    type Item = NetworkPolicySpec;

    fn items(tenant: &Tenant) -> Vec<Self::Item> {
        tenant.spec.network_policies.items.clone()
    }

    fn replicate(&mut self, _: &Tenant, item: &Self::Item) {
        self.spec = Some(item.clone());
    }
}

impl Replica for LimitRange {
    type Item = LimitRangeSpec;

    fn items(tenant: &Tenant) -> Vec<Self::Item> {
        tenant.spec.limit_ranges.items.clone()
    }

    fn replicate(&mut self, _: &Tenant, item: &Self::Item) {
        self.spec = Some(item.clone());
    }
}

impl Replica for RoleBinding {
    type Item = AdditionalRoleBinding;

    fn items(tenant: &Tenant) -> Vec<Self::Item> {
        tenant.spec.role_bindings()
    }

    fn key(_: usize, item: &Self::Item) -> String {
        item.key()
    }

    fn name(tenant: &str, index: usize, item: &Self::Item) -> String {
        naming::role_binding_name(tenant, index, &item.cluster_role_name)
    }

    fn replicate(&mut self, _: &Tenant, item: &Self::Item) {
        self.role_ref = RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: item.cluster_role_name.clone(),
        };
        self.subjects = Some(item.subjects.clone());
    }
}

impl Replica for ResourceQuota {
    type Item = ResourceQuotaSpec;

    fn items(tenant: &Tenant) -> Vec<Self::Item> {
        tenant.spec.resource_quotas.items.clone()
    }

    /// Tenant-scoped limits are owned by the quota aggregator.
    fn replicate(&mut self, tenant: &Tenant, item: &Self::Item) {
        let spec = self.spec.get_or_insert_with(Default::default);
        spec.scopes = item.scopes.clone();
        spec.scope_selector = item.scope_selector.clone();
        if tenant.spec.resource_quotas.scope == QuotaScope::Namespace {
            spec.hard = item.hard.clone();
        }
    }
}

/// Syncs every object of kind `K` into each namespace, concurrently.
pub async fn sync<C, K>(ctx: Context<'_, C>, tenant: &Tenant, namespaces: &[String]) -> Result<()>
where
    C: Cluster,
    K: Replica,
{
    let items = K::items(tenant);
    let keys = items
        .iter()
        .enumerate()
        .map(|(i, item)| K::key(i, item))
        .collect::<Vec<_>>();
    let (items, keys) = (&items, &keys);

    join_first_error(
        namespaces
            .iter()
            .map(|ns| sync_namespace::<C, K>(ctx, tenant, ns, items, keys)),
    )
    .await
}

async fn sync_namespace<C, K>(
    ctx: Context<'_, C>,
    tenant: &Tenant,
    namespace: &str,
    items: &[K::Item],
    keys: &[String],
) -> Result<()>
where
    C: Cluster,
    K: Replica,
{
    let kind = K::kind(&());
    pruner::prune::<C, K>(ctx, namespace, keys).await?;

    let tenant_name = tenant.name_any();
    let tenant_label = ctx.registry.tenant_label();
    let type_label = ctx.registry.type_label::<K>();
    let (tenant_name, tenant_label, type_label) = (&tenant_name, &tenant_label, &type_label);

    for ((index, item), key) in items.iter().enumerate().zip(keys) {
        let name = K::name(tenant_name, index, item);
        let name = &name;
        let result = retry_on_conflict(ctx.backoff, move || {
            apply::create_or_update::<C, K, _>(ctx.cluster, Some(namespace), name, move |obj| {
                let labels = obj.labels_mut();
                labels.insert(tenant_label.clone(), tenant_name.clone());
                labels.insert(type_label.clone(), key.clone());
                obj.replicate(tenant, item);
                apply::set_controller_reference(obj, tenant)
            })
        })
        .await;

        ctx.record(tenant, namespace, &format!("Ensuring {} {}", kind, name), &result)
            .await;
        match result {
            Ok(op) => info!(%namespace, %name, result = %op, "{} sync result", kind),
            Err(error) => {
                warn!(%namespace, %name, %error, "Cannot sync {}", kind);
                return Err(error);
            }
        }
    }

    Ok(())
}
