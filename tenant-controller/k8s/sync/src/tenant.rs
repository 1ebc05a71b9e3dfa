use crate::{aggregator, collector, custom, namespaces, syncer, Cluster, Context, QuotaMetrics, Result};
use futures::FutureExt;
use tenant_controller_core::{join_first_error, retry_on_conflict, Backoff};
use tenant_controller_k8s_api::{
    LimitRange, NetworkPolicy, Registry, ResourceQuota, RoleBinding, Tenant, TenantStatus,
};
use tracing::{debug, info_span, Instrument};

/// Drives one tenant towards its declared state.
pub struct TenantReconciler<C> {
    cluster: C,
    registry: Registry,
    backoff: Backoff,
    metrics: QuotaMetrics,
}

// === impl TenantReconciler ===

impl<C: Cluster> TenantReconciler<C> {
    pub fn new(cluster: C, registry: Registry, metrics: QuotaMetrics) -> Self {
        Self {
            cluster,
            registry,
            backoff: Backoff::default(),
            metrics,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn ctx(&self) -> Context<'_, C> {
        Context {
            cluster: &self.cluster,
            registry: &self.registry,
            backoff: self.backoff,
        }
    }

    /// Collects the tenant's namespaces, syncs their metadata and replicated
    /// objects, clamps tenant-scoped quotas, and records the result in the
    /// tenant's status. A tenant that no longer exists is a no-op.
    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let Some(tenant) = self.cluster.get::<Tenant>(None, name).await? else {
            debug!(tenant = %name, "Tenant not found");
            self.metrics.remove_tenant(name);
            return Ok(());
        };

        let ctx = self.ctx();
        let members = collector::collect(ctx, &tenant).await?;
        namespaces::sync(ctx, &tenant, &members).await?;

        let (tenant, members) = (&tenant, members.as_slice());
        join_first_error([
            syncer::sync::<C, NetworkPolicy>(ctx, tenant, members)
                .instrument(info_span!("networkpolicies"))
                .boxed(),
            syncer::sync::<C, LimitRange>(ctx, tenant, members)
                .instrument(info_span!("limitranges"))
                .boxed(),
            syncer::sync::<C, RoleBinding>(ctx, tenant, members)
                .instrument(info_span!("rolebindings"))
                .boxed(),
            syncer::sync::<C, ResourceQuota>(ctx, tenant, members)
                .instrument(info_span!("resourcequotas"))
                .boxed(),
        ])
        .await?;

        aggregator::aggregate(ctx, tenant, members.len(), &self.metrics).await?;
        custom::count(ctx, tenant, members).await?;
        self.update_status(name, tenant, members).await
    }

    async fn update_status(&self, name: &str, tenant: &Tenant, namespaces: &[String]) -> Result<()> {
        let status = TenantStatus {
            state: tenant.spec.state(),
            size: namespaces.len() as u32,
            namespaces: namespaces.to_vec(),
        };
        let status = &status;
        retry_on_conflict(self.backoff, move || async move {
            let Some(mut latest) = self.cluster.get::<Tenant>(None, name).await? else {
                return Ok(());
            };
            if latest.status.as_ref() == Some(status) {
                return Ok(());
            }
            latest.status = Some(status.clone());
            self.cluster.replace_status(&latest).await?;
            debug!(tenant = %name, size = status.size, "Updated tenant status");
            Ok(())
        })
        .await
    }
}
