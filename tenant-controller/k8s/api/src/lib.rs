#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod labels;
pub mod pool;
mod registry;
pub mod tenant;

pub use self::{
    labels::{Labels, Selector},
    pool::{ResourceQuotaPool, ResourceQuotaPoolSpec, ResourceQuotaPoolStatus},
    registry::Registry,
    tenant::{QuotaScope, Tenant, TenantSpec, TenantState, TenantStatus},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            LimitRange, LimitRangeSpec, Namespace, NamespaceStatus, ObjectReference,
            ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus,
        },
        networking::v1::{NetworkPolicy, NetworkPolicySpec},
        rbac::v1::{RoleBinding, RoleRef, Subject},
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement, OwnerReference, Time},
    },
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};

/// Whether a namespace is live: not terminating and not marked for deletion.
pub fn is_active(ns: &Namespace) -> bool {
    let terminating = ns
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == "Terminating")
        .unwrap_or(false);
    !terminating && ns.metadata.deletion_timestamp.is_none()
}
