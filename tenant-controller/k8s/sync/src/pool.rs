//! Maintains the aggregate quotas of [`ResourceQuotaPool`]s.
//!
//! Every namespace a pool's selectors match receives one `ResourceQuota`
//! whose limits are the sum of all the pool's items, the namespace's claims,
//! and the pool's per-namespace defaults. Namespaces that stop matching lose
//! it. Quota items removed from the pool drop out of the pool's status and of
//! every namespace's limits.

use crate::{apply, Cluster, Context, Error, Result};
use ahash::AHashSet;
use std::collections::BTreeMap;
use tenant_controller_core::{join_first_error, naming, retry_on_conflict, Backoff, Quantity};
use tenant_controller_k8s_api::{
    self as k8s,
    pool::ResourceList,
    Namespace, Registry, ResourceExt, ResourceQuota, ResourceQuotaPool, ResourceQuotaPoolSpec,
    ResourceQuotaPoolStatus, Selector,
};
use tracing::{debug, info, warn};

pub struct PoolReconciler<C> {
    cluster: C,
    registry: Registry,
    backoff: Backoff,
}

// === impl PoolReconciler ===

impl<C: Cluster> PoolReconciler<C> {
    pub fn new(cluster: C, registry: Registry) -> Self {
        Self {
            cluster,
            registry,
            backoff: Backoff::default(),
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

    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let Some(pool) = self.cluster.get::<ResourceQuotaPool>(None, name).await? else {
            debug!(pool = %name, "ResourceQuotaPool not found");
            return Ok(());
        };

        let matched = self.matching_namespaces(&pool).await;
        let previous = pool
            .status
            .as_ref()
            .map(|s| s.namespaces.clone())
            .unwrap_or_default();

        let items = &pool.spec.items;
        let latest = self
            .update_status(name, |status| {
                for (index, item) in items {
                    let entry = status.quota.entry(index.clone()).or_default();
                    entry.hard = item.hard.clone();
                }
            })
            .await?;
        let pool = latest.unwrap_or(pool);

        let orphans = orphans(&pool);
        for index in &orphans {
            info!(pool = %name, %index, "Removing orphaned quota item");
        }

        for namespace in &previous {
            if !matched.contains_key(namespace) {
                self.release(&pool, namespace).await?;
            }
        }

        let synced = join_first_error(
            matched
                .keys()
                .map(|namespace| self.sync_namespace(&pool, namespace)),
        )
        .await;
        if let Err(error) = &synced {
            warn!(pool = %name, %error, "Cannot sync pool ResourceQuotas");
        }

        let namespaces = matched
            .iter()
            .filter(|(_, ns)| k8s::is_active(ns))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        let used = self.usage(&pool, &namespaces).await?;
        let (orphans, namespaces, used) = (&orphans, &namespaces, &used);
        self.update_status(name, move |status| {
            status.quota.retain(|index, _| !orphans.contains(index));
            for (index, entry) in status.quota.iter_mut() {
                entry.used = used.get(index).cloned().unwrap_or_default();
            }
            status.namespaces = namespaces.clone();
            status.size = namespaces.len() as u32;
        })
        .await?;

        synced
    }

    /// Namespaces matched by any of the pool's selectors, by name. Selectors
    /// that cannot be evaluated are skipped.
    async fn matching_namespaces(&self, pool: &ResourceQuotaPool) -> BTreeMap<String, Namespace> {
        let pool_name = pool.name_any();
        let tenant_label = self.registry.tenant_label();
        let mut matched = BTreeMap::new();
        for (i, selector) in pool.spec.selectors.iter().enumerate() {
            let labels = match Selector::try_from(&selector.label_selector()) {
                Ok(labels) => labels,
                Err(error) => {
                    warn!(pool = %pool_name, selector = i, %error, "Invalid namespace selector");
                    continue;
                }
            };
            let namespaces = match self.cluster.list::<Namespace>(None, &labels).await {
                Ok(namespaces) => namespaces,
                Err(error) => {
                    warn!(pool = %pool_name, selector = i, %error, "Cannot list namespaces");
                    continue;
                }
            };
            for ns in namespaces {
                if ns.metadata.deletion_timestamp.is_some() {
                    continue;
                }
                if selector.must_tenant_namespace && !ns.labels().contains_key(&tenant_label) {
                    continue;
                }
                matched.entry(ns.name_any()).or_insert(ns);
            }
        }
        debug!(pool = %pool_name, namespaces = matched.len(), "Matched namespaces");
        matched
    }

    /// Sums, per item, the usage that the pool quotas of `namespaces` report
    /// for the resources the item declares. Resources nobody reports are left
    /// out.
    async fn usage(
        &self,
        pool: &ResourceQuotaPool,
        namespaces: &[String],
    ) -> Result<BTreeMap<String, ResourceList>> {
        let pool_name = pool.name_any();
        let selector = Selector::default().with_equals(self.registry.pool_label(), &pool_name);
        let quota_name = naming::pool_quota_name(&pool_name);
        let quotas = self
            .cluster
            .list::<ResourceQuota>(None, &selector)
            .await?
            .into_iter()
            .filter(|rq| {
                rq.name_any() == quota_name
                    && rq
                        .namespace()
                        .is_some_and(|ns| namespaces.iter().any(|n| *n == ns))
            })
            .collect::<Vec<_>>();
        pool_usage(&pool.spec, &quotas)
    }

    /// Removes the pool's quota from a namespace it no longer matches.
    async fn release(&self, pool: &ResourceQuotaPool, namespace: &str) -> Result<()> {
        let pool_name = pool.name_any();
        if self
            .cluster
            .get::<Namespace>(None, namespace)
            .await?
            .is_none()
        {
            debug!(pool = %pool_name, %namespace, "Namespace is gone");
            return Ok(());
        }

        let name = naming::pool_quota_name(&pool_name);
        match self
            .cluster
            .delete::<ResourceQuota>(Some(namespace), &name)
            .await
        {
            Ok(()) => {
                info!(pool = %pool_name, %namespace, "Deleted pool ResourceQuota");
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => {
                warn!(pool = %pool_name, %namespace, %error, "Cannot delete pool ResourceQuota");
                Err(error)
            }
        }
    }

    async fn sync_namespace(&self, pool: &ResourceQuotaPool, namespace: &str) -> Result<()> {
        let ctx = self.ctx();
        let pool_name = pool.name_any();
        let name = naming::pool_quota_name(&pool_name);
        let hard = namespace_hard(&pool.spec, pool.status.as_ref(), namespace)?;
        let pool_label = ctx.registry.pool_label();

        let (name, hard, pool_label, pool_name) = (&name, &hard, &pool_label, &pool_name);
        let op = retry_on_conflict(ctx.backoff, move || {
            apply::create_or_update::<C, ResourceQuota, _>(
                ctx.cluster,
                Some(namespace),
                name,
                move |rq| {
                    rq.labels_mut().insert(pool_label.clone(), pool_name.clone());
                    let spec = rq.spec.get_or_insert_with(Default::default);
                    spec.scopes = pool.spec.scopes.clone();
                    spec.scope_selector = pool.spec.scope_selector.clone();
                    spec.hard = Some(hard.clone());
                    apply::set_controller_reference(rq, pool)
                },
            )
        })
        .await?;
        debug!(pool = %pool_name, %namespace, result = %op, "Pool ResourceQuota synced");
        Ok(())
    }

    /// Re-reads the pool and writes its status if `mutate` changes it.
    /// Returns the latest pool, or `None` if it is gone.
    async fn update_status<F>(&self, name: &str, mutate: F) -> Result<Option<ResourceQuotaPool>>
    where
        F: Fn(&mut ResourceQuotaPoolStatus),
    {
        let mutate = &mutate;
        retry_on_conflict(self.backoff, move || async move {
            let Some(mut pool) = self.cluster.get::<ResourceQuotaPool>(None, name).await? else {
                return Ok(None);
            };
            let original = pool.status.clone();
            mutate(pool.status.get_or_insert_with(Default::default));
            if pool.status == original {
                return Ok(Some(pool));
            }
            self.cluster.replace_status(&pool).await.map(Some)
        })
        .await
    }
}

/// Indices recorded in the pool's status that its spec no longer declares.
/// Their limits drop out of every namespace quota once it is recomputed.
fn orphans(pool: &ResourceQuotaPool) -> AHashSet<String> {
    pool.status
        .iter()
        .flat_map(|s| s.quota.keys())
        .filter(|index| !pool.spec.items.contains_key(*index))
        .cloned()
        .collect()
}

/// Per item, the sum of what `quotas` report as used for each resource the
/// item declares.
pub fn pool_usage(
    spec: &ResourceQuotaPoolSpec,
    quotas: &[ResourceQuota],
) -> Result<BTreeMap<String, ResourceList>> {
    let mut usage = BTreeMap::new();
    for (index, item) in &spec.items {
        let mut used = ResourceList::new();
        for resource in item.hard.keys() {
            let mut total = None;
            for q in quotas.iter().filter_map(|rq| {
                rq.status.as_ref()?.used.as_ref()?.get(resource)
            }) {
                let value = q
                    .0
                    .parse::<Quantity>()
                    .map_err(|source| Error::quantity(resource, &q.0, source))?;
                total = Some(total.unwrap_or(Quantity::ZERO) + value);
            }
            if let Some(total) = total {
                used.insert(resource.clone(), k8s::Quantity(total.to_string()));
            }
        }
        usage.insert(index.clone(), used);
    }
    Ok(usage)
}

/// The limits of a namespace's pool quota: every item's limits, the
/// namespace's claims, and the per-namespace defaults, summed per resource.
pub fn namespace_hard(
    spec: &ResourceQuotaPoolSpec,
    status: Option<&ResourceQuotaPoolStatus>,
    namespace: &str,
) -> Result<ResourceList> {
    let claims = status
        .into_iter()
        .flat_map(|s| s.claims.iter())
        .filter(|c| c.namespace == namespace)
        .flat_map(|c| c.claims.iter());
    let lists = spec
        .items
        .values()
        .flat_map(|item| item.hard.iter())
        .chain(claims)
        .chain(spec.namespace_defaults.iter());

    let mut totals = BTreeMap::<&str, Quantity>::new();
    for (resource, q) in lists {
        let value = q
            .0
            .parse::<Quantity>()
            .map_err(|source| Error::quantity(resource, &q.0, source))?;
        let total = totals.entry(resource.as_str()).or_insert(Quantity::ZERO);
        *total = *total + value;
    }
    Ok(totals
        .into_iter()
        .map(|(resource, total)| (resource.to_string(), k8s::Quantity(total.to_string())))
        .collect())
}
