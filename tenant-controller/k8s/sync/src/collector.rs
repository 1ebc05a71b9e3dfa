use crate::{Cluster, Context, Result};
use tenant_controller_k8s_api::{self as k8s, Namespace, ResourceExt, Selector, Tenant};

/// Lists the active namespaces that belong to `tenant`, sorted and without
/// duplicates.
///
/// A namespace belongs to a tenant when it carries an owner reference to a
/// `Tenant` of that name or the tenant label with that value.
pub async fn collect<C: Cluster>(ctx: Context<'_, C>, tenant: &Tenant) -> Result<Vec<String>> {
    let namespaces = ctx
        .cluster
        .list::<Namespace>(None, &Selector::default())
        .await?;

    let tenant_name = tenant.name_any();
    let tenant_label = ctx.registry.tenant_label();
    let mut names = namespaces
        .iter()
        .filter(|ns| is_member(ns, &tenant_name, &tenant_label) && k8s::is_active(ns))
        .map(ResourceExt::name_any)
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    tracing::debug!(tenant = %tenant_name, namespaces = names.len(), "Collected namespaces");
    Ok(names)
}

fn is_member(ns: &Namespace, tenant: &str, tenant_label: &str) -> bool {
    let owned = ns
        .owner_references()
        .iter()
        .any(|r| r.kind == "Tenant" && r.name == tenant);
    owned || ns.labels().get(tenant_label).map(String::as_str) == Some(tenant)
}
