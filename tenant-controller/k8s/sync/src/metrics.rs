use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::{atomic::AtomicU64, Arc};
use tenant_controller_core::Quantity;

/// Per-tenant quota usage and limits, as last computed by the aggregator.
#[derive(Clone, Debug, Default)]
pub struct QuotaMetrics {
    usage: Family<QuotaLabels, Gauge<f64, AtomicU64>>,
    limit: Family<QuotaLabels, Gauge<f64, AtomicU64>>,

    /// The label sets recorded for each tenant, so a deleted tenant's series
    /// can be dropped.
    recorded: Arc<Mutex<AHashMap<String, AHashSet<QuotaLabels>>>>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct QuotaLabels {
    tenant: String,
    resource: String,
    index: String,
}

// === impl QuotaMetrics ===

impl QuotaMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let usage = Family::default();
        prom.register(
            "tenant_resource_usage",
            "Gauge of the resources a tenant uses across its namespaces",
            usage.clone(),
        );

        let limit = Family::default();
        prom.register(
            "tenant_resource_limit",
            "Gauge of the resources a tenant may use across its namespaces",
            limit.clone(),
        );

        Self {
            usage,
            limit,
            recorded: Default::default(),
        }
    }

    pub fn record(&self, tenant: &str, index: usize, resource: &str, used: Quantity, hard: Quantity) {
        let labels = QuotaLabels {
            tenant: tenant.to_string(),
            resource: resource.to_string(),
            index: index.to_string(),
        };
        self.usage.get_or_create(&labels).set(used.as_f64());
        self.limit.get_or_create(&labels).set(hard.as_f64());
        self.remember(labels);
    }

    /// Records how many namespaces a tenant owns and, when capped, how many
    /// it may own. These series carry the `namespaces` resource and no index.
    pub fn record_namespaces(&self, tenant: &str, size: usize, quota: Option<i32>) {
        let labels = QuotaLabels {
            tenant: tenant.to_string(),
            resource: "namespaces".to_string(),
            index: String::new(),
        };
        self.usage.get_or_create(&labels).set(size as f64);
        if let Some(quota) = quota {
            self.limit.get_or_create(&labels).set(f64::from(quota));
        }
        self.remember(labels);
    }

    fn remember(&self, labels: QuotaLabels) {
        self.recorded
            .lock()
            .entry(labels.tenant.clone())
            .or_default()
            .insert(labels);
    }

    /// Drops every series recorded for `tenant`, either because it is gone or
    /// before its series are recorded afresh.
    pub fn remove_tenant(&self, tenant: &str) {
        let Some(labels) = self.recorded.lock().remove(tenant) else {
            return;
        };
        for labels in labels {
            self.usage.remove(&labels);
            self.limit.remove(&labels);
        }
    }
}
