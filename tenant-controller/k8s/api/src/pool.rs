use k8s_openapi::{
    api::core::v1::ScopeSelector,
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement},
    },
};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ResourceList = BTreeMap<String, Quantity>;

/// A quota shared by every namespace its selectors match, independent of
/// tenant ownership.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "capsule.clastix.io",
    version = "v1beta2",
    kind = "ResourceQuotaPool",
    status = "ResourceQuotaPoolStatus",
    derive = "PartialEq",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaPoolSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<PoolSelector>,

    /// Quota items keyed by an opaque index.
    #[serde(default)]
    pub items: BTreeMap<String, PoolItem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_selector: Option<ScopeSelector>,

    /// Granted to every matched namespace on top of its claims.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_defaults: ResourceList,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSelector {
    /// Only match namespaces that belong to a tenant.
    #[serde(rename = "tenant", default = "must_tenant_namespace")]
    pub must_tenant_namespace: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PoolItem {
    #[serde(default)]
    pub hard: ResourceList,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaPoolStatus {
    #[serde(default)]
    pub quota: BTreeMap<String, PoolQuotaStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub size: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<PoolClaim>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PoolQuotaStatus {
    #[serde(default)]
    pub used: ResourceList,

    #[serde(default)]
    pub hard: ResourceList,
}

/// Resources a namespace has claimed from the pool.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PoolClaim {
    pub namespace: String,

    #[serde(default)]
    pub claims: ResourceList,
}

fn must_tenant_namespace() -> bool {
    true
}

// === impl PoolSelector ===

impl PoolSelector {
    pub fn label_selector(&self) -> LabelSelector {
        LabelSelector {
            match_labels: self.match_labels.clone(),
            match_expressions: self.match_expressions.clone(),
        }
    }
}
