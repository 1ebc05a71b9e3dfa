use k8s_openapi::api::{
    core::v1::{LimitRangeSpec, ResourceQuotaSpec},
    networking::v1::NetworkPolicySpec,
    rbac::v1::Subject,
};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tenant_controller_core::naming;

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "capsule.clastix.io",
    version = "v1beta2",
    kind = "Tenant",
    status = "TenantStatus",
    derive = "PartialEq",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<OwnerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_options: Option<NamespaceOptions>,

    /// Propagated to every tenant namespace as the scheduler's node selector.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub network_policies: NetworkPolicies,

    #[serde(default)]
    pub limit_ranges: LimitRanges,

    #[serde(default)]
    pub resource_quotas: ResourceQuotas,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_role_bindings: Vec<AdditionalRoleBinding>,

    #[serde(default)]
    pub cordoned: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSpec {
    pub kind: OwnerKind,
    pub name: String,

    #[serde(default = "default_cluster_roles")]
    pub cluster_roles: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum OwnerKind {
    User,
    Group,
    ServiceAccount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOptions {
    /// Maximum number of namespaces the tenant may own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_metadata: Option<AdditionalMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AdditionalMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct NetworkPolicies {
    #[serde(default)]
    pub items: Vec<NetworkPolicySpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct LimitRanges {
    #[serde(default)]
    pub items: Vec<LimitRangeSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ResourceQuotas {
    #[serde(default)]
    pub scope: QuotaScope,

    #[serde(default)]
    pub items: Vec<ResourceQuotaSpec>,
}

/// Whether declared quotas bound the whole tenant or each namespace alone.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum QuotaScope {
    #[default]
    Tenant,
    Namespace,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalRoleBinding {
    pub cluster_role_name: String,

    #[serde(default)]
    pub subjects: Vec<Subject>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    #[serde(default)]
    pub state: TenantState,

    #[serde(default)]
    pub size: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum TenantState {
    #[default]
    Active,
    Cordoned,
}

fn default_cluster_roles() -> Vec<String> {
    vec!["admin".to_string(), "capsule-namespace-deleter".to_string()]
}

// === impl TenantSpec ===

impl TenantSpec {
    /// The role bindings every tenant namespace receives: one per owner and
    /// cluster role, followed by the additional bindings.
    pub fn role_bindings(&self) -> Vec<AdditionalRoleBinding> {
        self.owners
            .iter()
            .flat_map(|owner| {
                owner
                    .cluster_roles
                    .iter()
                    .map(move |cluster_role| AdditionalRoleBinding {
                        cluster_role_name: cluster_role.clone(),
                        subjects: vec![owner.subject()],
                    })
            })
            .chain(self.additional_role_bindings.iter().cloned())
            .collect()
    }

    pub fn state(&self) -> TenantState {
        if self.cordoned {
            TenantState::Cordoned
        } else {
            TenantState::Active
        }
    }
}

// === impl OwnerSpec ===

impl OwnerSpec {
    /// The RBAC subject for this owner. Service accounts are named
    /// `system:serviceaccount:<namespace>:<name>`.
    pub fn subject(&self) -> Subject {
        match self.kind {
            OwnerKind::ServiceAccount => {
                let mut parts = self.name.rsplit(':');
                let name = parts.next().unwrap_or_default().to_string();
                let namespace = parts.next().map(ToString::to_string);
                Subject {
                    kind: "ServiceAccount".to_string(),
                    name,
                    namespace,
                    api_group: None,
                }
            }
            kind => Subject {
                kind: kind.as_str().to_string(),
                name: self.name.clone(),
                namespace: None,
                api_group: Some("rbac.authorization.k8s.io".to_string()),
            },
        }
    }
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
            Self::ServiceAccount => "ServiceAccount",
        }
    }
}

// === impl AdditionalRoleBinding ===

impl AdditionalRoleBinding {
    /// The content hash used as this binding's index label.
    pub fn key(&self) -> String {
        naming::role_binding_key(
            &self.cluster_role_name,
            self.subjects
                .iter()
                .map(|s| (s.kind.as_str(), s.name.as_str())),
        )
    }
}
