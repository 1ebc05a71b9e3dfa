//! Clamps tenant-scoped quotas so a tenant's namespaces jointly stay within
//! the tenant's declared limits.
//!
//! For every declared quota item, the usage reported by each namespace's
//! replica is summed. While the sum is under the declared limit, every
//! replica gets the declared limit; once the sum reaches it, every replica is
//! frozen at its own current usage so no namespace can grow further.

use crate::{apply, Cluster, Context, Error, QuotaMetrics, Result};
use std::collections::BTreeMap;
use tenant_controller_core::{join_first_error, retry_on_conflict, Budget, Quantity};
use tenant_controller_k8s_api::{
    self as k8s,
    annotations::{hard_quota, is_quota_annotation, used_quota},
    QuotaScope, ResourceExt, ResourceQuota, ResourceQuotaSpec,
    Selector, Tenant,
};
use tracing::{debug, warn};

/// The clamp decision for one resource of one quota item.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub budget: Budget,
    /// The limit as declared on the tenant.
    pub declared: k8s::Quantity,
    pub used: Quantity,
    pub hard: Quantity,
}

pub type Decisions = BTreeMap<String, Decision>;

/// Aggregates every quota item of a tenant whose quotas are tenant-scoped.
///
/// The tenant's quota series are rebuilt on every pass, so items and
/// resources it no longer declares stop being reported.
pub async fn aggregate<C: Cluster>(
    ctx: Context<'_, C>,
    tenant: &Tenant,
    namespaces: usize,
    metrics: &QuotaMetrics,
) -> Result<()> {
    let tenant_name = tenant.name_any();
    metrics.remove_tenant(&tenant_name);
    let quota = tenant.spec.namespace_options.as_ref().and_then(|o| o.quota);
    metrics.record_namespaces(&tenant_name, namespaces, quota);

    if tenant.spec.resource_quotas.scope != QuotaScope::Tenant {
        return Ok(());
    }

    join_first_error(
        tenant
            .spec
            .resource_quotas
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| aggregate_item(ctx, tenant, index, item, metrics)),
    )
    .await
}

async fn aggregate_item<C: Cluster>(
    ctx: Context<'_, C>,
    tenant: &Tenant,
    index: usize,
    item: &ResourceQuotaSpec,
    metrics: &QuotaMetrics,
) -> Result<()> {
    let tenant_name = tenant.name_any();
    let selector = Selector::default()
        .with_equals(ctx.registry.tenant_label(), &tenant_name)
        .with_equals(ctx.registry.type_label::<ResourceQuota>(), index);
    let quotas = ctx.cluster.list::<ResourceQuota>(None, &selector).await?;

    let decisions = decide(item, &quotas)?;
    for (resource, decision) in &decisions {
        debug!(
            tenant = %tenant_name,
            index,
            %resource,
            used = %decision.used,
            hard = %decision.hard,
            budget = ?decision.budget,
            "Computed tenant quota usage"
        );
        metrics.record(&tenant_name, index, resource, decision.used, decision.hard);
    }

    let decisions = &decisions;
    let result = join_first_error(quotas.iter().map(|rq| async move {
        let namespace = rq.namespace().unwrap_or_default();
        let name = rq.name_any();
        let (namespace, name) = (namespace.as_str(), name.as_str());
        let result = retry_on_conflict(ctx.backoff, move || {
            apply::update::<C, ResourceQuota, _>(ctx.cluster, Some(namespace), name, move |rq| {
                clamp(rq, decisions);
                Ok(())
            })
        })
        .await;
        match result {
            Ok(Some(op)) => debug!(%namespace, %name, result = %op, "Clamped ResourceQuota"),
            Ok(None) => debug!(%namespace, %name, "ResourceQuota is gone"),
            Err(error) => {
                warn!(%namespace, %name, %error, "Cannot clamp ResourceQuota");
                return Err(error);
            }
        }
        Ok(())
    }))
    .await;

    result.map_err(|source| Error::QuotaUpdate {
        index,
        resources: decisions.keys().cloned().collect::<Vec<_>>().join(", "),
        source: Box::new(source),
    })
}

/// Sums the usage each replica reports against the item's declared limits.
pub fn decide(item: &ResourceQuotaSpec, quotas: &[ResourceQuota]) -> Result<Decisions> {
    let mut decisions = Decisions::new();
    for (resource, declared) in item.hard.iter().flatten() {
        let hard = parse(resource, declared)?;
        let mut used = Quantity::ZERO;
        for rq in quotas {
            if let Some(q) = status_used(rq, resource) {
                used = used + parse(resource, q)?;
            }
        }
        decisions.insert(
            resource.clone(),
            Decision {
                budget: Budget::evaluate(used, hard),
                declared: declared.clone(),
                used,
                hard,
            },
        );
    }
    Ok(decisions)
}

/// Rewrites a replica's limits and aggregate annotations from `decisions`.
///
/// Over budget, a resource is frozen at the replica's own usage, or zero when
/// the replica has not reported any. Limits the item does not declare are
/// dropped, as are annotations for them.
pub fn clamp(rq: &mut ResourceQuota, decisions: &Decisions) {
    let hard = decisions
        .iter()
        .map(|(resource, decision)| {
            let limit = match decision.budget {
                Budget::UnderBudget => decision.declared.clone(),
                Budget::AtOrOverBudget => status_used(rq, resource)
                    .cloned()
                    .unwrap_or_else(|| k8s::Quantity("0".to_string())),
            };
            (resource.clone(), limit)
        })
        .collect::<BTreeMap<_, _>>();
    let spec = rq.spec.get_or_insert_with(Default::default);
    spec.hard = if hard.is_empty() { None } else { Some(hard) };

    let annotations = rq.annotations_mut();
    annotations.retain(|key, _| !is_quota_annotation(key));
    for (resource, decision) in decisions {
        annotations.insert(used_quota(resource), decision.used.to_string());
        annotations.insert(hard_quota(resource), decision.hard.to_string());
    }
}

fn status_used<'r>(rq: &'r ResourceQuota, resource: &str) -> Option<&'r k8s::Quantity> {
    rq.status.as_ref()?.used.as_ref()?.get(resource)
}

fn parse(resource: &str, q: &k8s::Quantity) -> Result<Quantity> {
    q.0.parse()
        .map_err(|source| Error::quantity(resource, &q.0, source))
}
