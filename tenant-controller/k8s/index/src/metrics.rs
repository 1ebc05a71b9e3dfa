use std::sync::Arc;

use kube::Resource;
use kubert::index::{ClusterRemoved, NamespacedRemoved};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Records how many objects of each kind an index holds and how often it
/// changes.
pub struct IndexMetrics<T> {
    inner: T,

    index_size: Family<IndexLabels, Gauge>,
    index_applies: Family<IndexLabels, Counter>,
    index_deletes: Family<IndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

pub trait SizedIndex<R> {
    fn size(&self) -> usize;
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self) -> usize {
        self.read().size()
    }
}

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            inner,
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

impl<T> IndexMetrics<Arc<RwLock<T>>> {
    fn labels<R: Resource<DynamicType = ()>>() -> IndexLabels {
        IndexLabels {
            kind: R::kind(&()).to_string(),
        }
    }

    fn observe_size<R: Resource<DynamicType = ()>>(&self)
    where
        T: SizedIndex<R>,
    {
        let size = SizedIndex::<R>::size(&self.inner);
        self.index_size
            .get_or_create(&Self::labels::<R>())
            .set(size as i64);
    }
}

impl<R, T> kubert::index::IndexClusterResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexClusterResource<R>,
    R: Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.index_applies.get_or_create(&Self::labels::<R>()).inc();
        self.inner.write().apply(resource);
        self.observe_size::<R>();
    }

    fn delete(&mut self, name: String) {
        self.index_deletes.get_or_create(&Self::labels::<R>()).inc();
        self.inner.write().delete(name);
        self.observe_size::<R>();
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        self.index_resets.get_or_create(&Self::labels::<R>()).inc();
        self.inner.write().reset(resources, removed);
        self.observe_size::<R>();
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.index_applies.get_or_create(&Self::labels::<R>()).inc();
        self.inner.write().apply(resource);
        self.observe_size::<R>();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.index_deletes.get_or_create(&Self::labels::<R>()).inc();
        self.inner.write().delete(namespace, name);
        self.observe_size::<R>();
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        self.index_resets.get_or_create(&Self::labels::<R>()).inc();
        self.inner.write().reset(resources, removed);
        self.observe_size::<R>();
    }
}
