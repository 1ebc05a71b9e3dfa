#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Reconciles tenants and quota pools against the cluster.
//!
//! A [`TenantReconciler`] pass collects a tenant's namespaces, replicates its
//! declared objects into each of them, prunes what is no longer declared, and
//! clamps tenant-scoped quotas so that the tenant as a whole stays within its
//! budget. A [`PoolReconciler`] maintains the aggregate quota of every
//! namespace a [`ResourceQuotaPool`](tenant_controller_k8s_api::ResourceQuotaPool)
//! selects.

pub mod aggregator;
pub mod apply;
mod cluster;
pub mod collector;
pub mod custom;
mod error;
mod metrics;
pub mod namespaces;
pub mod pool;
pub mod pruner;
pub mod syncer;
mod tenant;


pub use self::{
    apply::Operation,
    cluster::{Cluster, Event, EventType, KubeCluster, Object},
    error::{Error, Result},
    metrics::QuotaMetrics,
    pool::PoolReconciler,
    tenant::TenantReconciler,
};

use tenant_controller_core::Backoff;
use tenant_controller_k8s_api::{Registry, Resource, Tenant};

/// Everything a reconcile step needs from its surroundings.
pub struct Context<'a, C> {
    pub cluster: &'a C,
    pub registry: &'a Registry,
    pub backoff: Backoff,
}

// === impl Context ===

impl<C> Clone for Context<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Context<'_, C> {}

impl<'a, C: Cluster> Context<'a, C> {
    pub fn new(cluster: &'a C, registry: &'a Registry) -> Self {
        Self {
            cluster,
            registry,
            backoff: Backoff::default(),
        }
    }

    /// Publishes the outcome of syncing one object as an event on the tenant.
    pub(crate) async fn record(
        &self,
        tenant: &Tenant,
        namespace: &str,
        message: &str,
        result: &Result<Operation>,
    ) {
        let (type_, reason) = match result {
            Ok(op) => (EventType::Normal, op.as_str()),
            Err(_) => (EventType::Warning, "Error"),
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: format!("{} in namespace {}", message, namespace),
            action: "Reconcile".to_string(),
        };
        self.cluster.publish(&tenant.object_ref(&()), event).await;
    }
}
