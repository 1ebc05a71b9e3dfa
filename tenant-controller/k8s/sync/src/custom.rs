//! Counts the custom resources a tenant limits through annotations.

use crate::{apply, Cluster, Context, Event, EventType, Result};
use futures::future;
use std::collections::BTreeMap;
use tenant_controller_core::retry_on_conflict;
use tenant_controller_k8s_api::{
    annotations::{CustomResource, RESOURCE_USED_PREFIX},
    Resource, ResourceExt, Tenant,
};
use tracing::{debug, info, warn};

/// Records on the tenant how many objects of each limited custom resource
/// exist across its namespaces. Usage beyond a declared limit is reported as a
/// warning event on the tenant.
pub async fn count<C: Cluster>(
    ctx: Context<'_, C>,
    tenant: &Tenant,
    namespaces: &[String],
) -> Result<()> {
    let tenant_name = tenant.name_any();
    let (resources, invalid) = CustomResource::from_annotations(tenant.annotations());
    for error in invalid {
        warn!(tenant = %tenant_name, %error, "Ignoring custom resource limit");
    }

    let mut used = BTreeMap::new();
    for resource in resources {
        let counts = future::try_join_all(
            namespaces
                .iter()
                .map(|ns| ctx.cluster.count_custom(&resource, ns)),
        )
        .await?;
        let total = counts.into_iter().sum::<usize>() as i64;
        debug!(tenant = %tenant_name, %resource, total, "Counted custom resources");
        if let Ok(previous) = resource.used(tenant.annotations()) {
            if previous != total {
                info!(
                    tenant = %tenant_name,
                    %resource,
                    previous,
                    total,
                    "Custom resource usage changed"
                );
            }
        }

        match resource.limit(tenant.annotations()) {
            Ok(Some(limit)) if total > limit => {
                warn!(
                    tenant = %tenant_name,
                    %resource,
                    total,
                    limit,
                    "Custom resource usage exceeds limit"
                );
                let event = Event {
                    type_: EventType::Warning,
                    reason: "OverLimit".to_string(),
                    note: format!("{} uses {} of {} allowed", resource, total, limit),
                    action: "Count".to_string(),
                };
                ctx.cluster.publish(&tenant.object_ref(&()), event).await;
            }
            Ok(_) => {}
            Err(error) => warn!(tenant = %tenant_name, %error, "Ignoring custom resource limit"),
        }
        used.insert(resource.used_annotation(), total.to_string());
    }

    let (used, tenant_name) = (&used, tenant_name.as_str());
    let op = retry_on_conflict(ctx.backoff, move || {
        apply::update::<C, Tenant, _>(ctx.cluster, None, tenant_name, move |tenant| {
            let annotations = tenant.annotations_mut();
            annotations
                .retain(|key, _| !key.starts_with(RESOURCE_USED_PREFIX) || used.contains_key(key));
            annotations.extend(used.clone());
            Ok(())
        })
    })
    .await?;
    if let Some(op) = op {
        debug!(tenant = %tenant_name, result = %op, "Custom resource usage recorded");
    }
    Ok(())
}
