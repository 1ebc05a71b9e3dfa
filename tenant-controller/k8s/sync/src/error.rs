use tenant_controller_core::{ConflictError, QuantityError};
use tenant_controller_k8s_api::labels::InvalidSelector;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} is already controlled by {owner}")]
    AlreadyOwned {
        kind: String,
        name: String,
        owner: String,
    },

    #[error("{kind} {name} has no uid and cannot own other objects")]
    MissingUid { kind: String, name: String },

    #[error("invalid quantity {value:?} for {resource}: {source}")]
    Quantity {
        resource: String,
        value: String,
        #[source]
        source: QuantityError,
    },

    #[error(transparent)]
    Selector(#[from] InvalidSelector),

    #[error("failed to update ResourceQuotas of item {index} ({resources}): {source}")]
    QuotaUpdate {
        index: usize,
        resources: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Api(#[from] kube::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn quantity(resource: &str, value: &str, source: QuantityError) -> Self {
        Self::Quantity {
            resource: resource.to_string(),
            value: value.to_string(),
            source,
        }
    }
}

/// Any HTTP 409 is retried.
impl ConflictError for Error {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}
