//! The seam between reconcilers and the API server.

use crate::{Error, Result};
use async_trait::async_trait;
use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::events::{self, Recorder, Reporter},
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tenant_controller_k8s_api::{
    self as k8s, annotations::CustomResource, Api, Client, DeleteParams, ListParams, PostParams,
    Resource, ResourceExt, Selector,
};

/// A resource kind the controller reads or writes.
pub trait Object:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced {
    ($($ty:ty),+) => {
        $(
            impl Object for $ty {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::all(client),
                    }
                }
            }
        )+
    };
}

macro_rules! cluster_scoped {
    ($($ty:ty),+) => {
        $(
            impl Object for $ty {
                fn api(client: Client, _: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )+
    };
}

namespaced!(
    k8s::LimitRange,
    k8s::NetworkPolicy,
    k8s::ResourceQuota,
    k8s::RoleBinding
);
cluster_scoped!(k8s::Namespace, k8s::Tenant, k8s::ResourceQuotaPool);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// An event recorded against a reconciled object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub type_: EventType,
    pub reason: String,
    pub note: String,
    pub action: String,
}

/// Reads and writes cluster state.
///
/// Writes carry the object's resource version; a stale version fails with
/// [`Error::Conflict`]. Missing objects surface as `None` from `get` and as
/// [`Error::NotFound`] from writes.
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    async fn list<K: Object>(&self, namespace: Option<&str>, selector: &Selector)
        -> Result<Vec<K>>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces everything but the status.
    async fn replace<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces only the status.
    async fn replace_status<K: Object>(&self, obj: &K) -> Result<K>;

    async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<()>;

    async fn delete_collection<K: Object>(&self, namespace: &str, selector: &Selector)
        -> Result<()>;

    /// Counts the non-terminating objects of a custom resource in a namespace.
    async fn count_custom(&self, resource: &CustomResource, namespace: &str) -> Result<usize>;

    /// Records an event. Failures are logged, never returned.
    async fn publish(&self, regarding: &k8s::ObjectReference, event: Event);
}

/// A [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    recorder: Recorder,
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: tenant_controller_core::CONTROLLER_NAME.to_string(),
            instance,
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Self { client, recorder }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        K::api(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error::<K>(name, e))
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>> {
        let params = list_params(selector);
        let list = K::api(self.client.clone(), namespace)
            .list(&params)
            .await
            .map_err(|e| api_error::<K>("", e))?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        K::api(self.client.clone(), obj.namespace().as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| api_error::<K>(&obj.name_any(), e))
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        K::api(self.client.clone(), obj.namespace().as_deref())
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| api_error::<K>(&name, e))
    }

    async fn replace_status<K: Object>(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        K::api(self.client.clone(), obj.namespace().as_deref())
            .replace_status(&name, &PostParams::default(), serde_json::to_vec(obj)?)
            .await
            .map_err(|e| api_error::<K>(&name, e))
    }

    async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        K::api(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| api_error::<K>(name, e))?;
        Ok(())
    }

    async fn delete_collection<K: Object>(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<()> {
        K::api(self.client.clone(), Some(namespace))
            .delete_collection(&DeleteParams::default(), &list_params(selector))
            .await
            .map_err(|e| api_error::<K>("", e))?;
        Ok(())
    }

    async fn count_custom(&self, resource: &CustomResource, namespace: &str) -> Result<usize> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.resource);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &resource.resource);
        let api = Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, &ar);
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .filter(|obj| obj.metadata.deletion_timestamp.is_none())
            .count())
    }

    async fn publish(&self, regarding: &k8s::ObjectReference, event: Event) {
        let event = events::Event {
            type_: match event.type_ {
                EventType::Normal => events::EventType::Normal,
                EventType::Warning => events::EventType::Warning,
            },
            reason: event.reason,
            note: Some(event.note),
            action: event.action,
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&event, regarding).await {
            tracing::warn!(%error, "Failed to publish event");
        }
    }
}

fn list_params(selector: &Selector) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector.to_string())
    }
}

fn api_error<K: Object>(name: &str, error: kube::Error) -> Error {
    let kind = K::kind(&()).to_string();
    let name = name.to_string();
    match error {
        kube::Error::Api(ref rsp) if rsp.code == 404 => Error::NotFound { kind, name },
        kube::Error::Api(ref rsp) if rsp.code == 409 && rsp.reason == "AlreadyExists" => {
            Error::AlreadyExists { kind, name }
        }
        kube::Error::Api(ref rsp) if rsp.code == 409 => Error::Conflict { kind, name },
        error => Error::Api(error),
    }
}
