use crate::metrics::SizedIndex;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};
use tenant_controller_k8s_api::{
    self as k8s, Labels, LimitRange, Namespace, NetworkPolicy, Registry, Resource, ResourceExt,
    ResourceQuota, ResourceQuotaPool, RoleBinding, Selector, Tenant,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

pub type SharedIndex = Arc<RwLock<Index>>;

/// A reconcile the controller must run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Request {
    Tenant(String),
    Pool(String),
}

/// Maps cluster events to the tenants and pools they affect.
pub struct Index {
    registry: Registry,
    requests: UnboundedSender<Request>,

    tenants: HashSet<String>,
    pools: HashMap<String, Vec<NamespaceSelector>>,
    namespaces: HashMap<String, NamespaceState>,

    /// The tenant or pool each replicated object belongs to.
    owners: HashMap<ObjectRef, Request>,
}

/// What the index needs to know about a namespace to route its changes.
#[derive(Clone, Debug, PartialEq, Eq)]
struct NamespaceState {
    labels: Labels,
    tenant: Option<String>,
    tenant_labeled: bool,
    active: bool,
}

#[derive(Clone, Debug)]
struct NamespaceSelector {
    selector: Selector,
    must_tenant_namespace: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ObjectRef {
    kind: String,
    namespace: String,
    name: String,
}

// === impl Index ===

impl Index {
    pub fn shared(registry: Registry, requests: UnboundedSender<Request>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            registry,
            requests,
            tenants: HashSet::default(),
            pools: HashMap::default(),
            namespaces: HashMap::default(),
            owners: HashMap::default(),
        }))
    }

    /// Every tenant and pool currently in the cluster, tenants first.
    pub fn known(&self) -> Vec<Request> {
        let mut tenants = self
            .tenants
            .iter()
            .cloned()
            .map(Request::Tenant)
            .collect::<Vec<_>>();
        tenants.sort();
        let mut pools = self
            .pools
            .keys()
            .cloned()
            .map(Request::Pool)
            .collect::<Vec<_>>();
        pools.sort();
        tenants.extend(pools);
        tenants
    }

    /// The tenant or pool managing an object of kind `K`, if it is known.
    pub fn owner_of<K>(&self, namespace: &str, name: &str) -> Option<&Request>
    where
        K: Resource<DynamicType = ()>,
    {
        self.owners.get(&ObjectRef::new::<K>(namespace, name))
    }

    fn request(&self, request: Request) {
        debug!(?request, "Requesting reconcile");
        if self.requests.send(request).is_err() {
            warn!("Controller is no longer accepting requests");
        }
    }

    fn namespace_state(&self, ns: &Namespace) -> NamespaceState {
        let tenant_label = self.registry.tenant_label();
        let label = ns.labels().get(&tenant_label).cloned();
        let tenant = ns
            .owner_references()
            .iter()
            .find(|r| r.kind == Tenant::kind(&()))
            .map(|r| r.name.clone())
            .or_else(|| label.clone());
        NamespaceState {
            labels: ns.labels().clone().into(),
            tenant,
            tenant_labeled: label.is_some(),
            active: k8s::is_active(ns),
        }
    }

    /// Requests every tenant and pool that a namespace belonged to before or
    /// belongs to after a change.
    fn namespace_changed(&self, old: Option<&NamespaceState>, new: Option<&NamespaceState>) {
        let mut requests = BTreeSet::new();
        for state in old.into_iter().chain(new) {
            requests.extend(state.tenant.clone().map(Request::Tenant));
            requests.extend(
                self.pools
                    .iter()
                    .filter(|(_, selectors)| selectors.iter().any(|s| s.matches(state)))
                    .map(|(pool, _)| Request::Pool(pool.clone())),
            );
        }
        for request in requests {
            self.request(request);
        }
    }

    fn apply_owned<K>(&mut self, obj: K)
    where
        K: ResourceExt + Resource<DynamicType = ()>,
    {
        let Some(namespace) = obj.namespace() else {
            return;
        };
        let labels = obj.labels();
        let owner = labels
            .get(&self.registry.tenant_label())
            .cloned()
            .map(Request::Tenant)
            .or_else(|| {
                labels
                    .get(&self.registry.pool_label())
                    .cloned()
                    .map(Request::Pool)
            });

        let id = ObjectRef::new::<K>(&namespace, &obj.name_any());
        let previous = match owner.clone() {
            Some(owner) => self.owners.insert(id, owner),
            None => self.owners.remove(&id),
        };
        if let Some(previous) = previous.filter(|p| Some(p) != owner.as_ref()) {
            self.request(previous);
        }
        if let Some(owner) = owner {
            self.request(owner);
        }
    }

    fn delete_owned<K>(&mut self, namespace: String, name: String)
    where
        K: Resource<DynamicType = ()>,
    {
        if let Some(owner) = self.owners.remove(&ObjectRef::new::<K>(&namespace, &name)) {
            self.request(owner);
        }
    }

    fn owned_size<K>(&self) -> usize
    where
        K: Resource<DynamicType = ()>,
    {
        let kind = K::kind(&());
        self.owners.keys().filter(|id| id.kind == kind).count()
    }
}

impl kubert::index::IndexClusterResource<Tenant> for Index {
    fn apply(&mut self, tenant: Tenant) {
        let name = tenant.name_any();
        self.tenants.insert(name.clone());
        self.request(Request::Tenant(name));
    }

    fn delete(&mut self, name: String) {
        self.tenants.remove(&name);
        self.request(Request::Tenant(name));
    }
}

impl kubert::index::IndexClusterResource<ResourceQuotaPool> for Index {
    fn apply(&mut self, pool: ResourceQuotaPool) {
        let name = pool.name_any();
        let selectors = pool
            .spec
            .selectors
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match Selector::try_from(&s.label_selector()) {
                Ok(selector) => Some(NamespaceSelector {
                    selector,
                    must_tenant_namespace: s.must_tenant_namespace,
                }),
                Err(error) => {
                    warn!(pool = %name, selector = i, %error, "Ignoring invalid namespace selector");
                    None
                }
            })
            .collect();
        self.pools.insert(name.clone(), selectors);
        self.request(Request::Pool(name));
    }

    fn delete(&mut self, name: String) {
        self.pools.remove(&name);
    }
}

impl kubert::index::IndexClusterResource<Namespace> for Index {
    fn apply(&mut self, ns: Namespace) {
        let state = self.namespace_state(&ns);
        let previous = self.namespaces.insert(ns.name_any(), state.clone());
        if previous.as_ref() != Some(&state) {
            self.namespace_changed(previous.as_ref(), Some(&state));
        }
    }

    fn delete(&mut self, name: String) {
        if let Some(previous) = self.namespaces.remove(&name) {
            self.namespace_changed(Some(&previous), None);
        }
    }
}

impl SizedIndex<Tenant> for Index {
    fn size(&self) -> usize {
        self.tenants.len()
    }
}

impl SizedIndex<ResourceQuotaPool> for Index {
    fn size(&self) -> usize {
        self.pools.len()
    }
}

impl SizedIndex<Namespace> for Index {
    fn size(&self) -> usize {
        self.namespaces.len()
    }
}

macro_rules! index_owned {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl kubert::index::IndexNamespacedResource<$kind> for Index {
                fn apply(&mut self, obj: $kind) {
                    self.apply_owned(obj);
                }

                fn delete(&mut self, namespace: String, name: String) {
                    self.delete_owned::<$kind>(namespace, name);
                }
            }

            impl SizedIndex<$kind> for Index {
                fn size(&self) -> usize {
                    self.owned_size::<$kind>()
                }
            }
        )+
    };
}

index_owned!(NetworkPolicy, LimitRange, RoleBinding, ResourceQuota);

// === impl NamespaceSelector ===

impl NamespaceSelector {
    fn matches(&self, ns: &NamespaceState) -> bool {
        if !ns.active || (self.must_tenant_namespace && !ns.tenant_labeled) {
            return false;
        }
        self.selector.matches(&ns.labels)
    }
}

// === impl ObjectRef ===

impl ObjectRef {
    fn new<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}
