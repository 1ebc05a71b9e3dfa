//! Annotation keys shared with the admission webhooks.

use std::{collections::BTreeMap, fmt, str::FromStr};

pub const USED_QUOTA_PREFIX: &str = "quota.capsule.clastix.io/used-";
pub const HARD_QUOTA_PREFIX: &str = "quota.capsule.clastix.io/hard-";

pub const RESOURCE_LIMIT_PREFIX: &str = "quota.resources.capsule.clastix.io/";
pub const RESOURCE_USED_PREFIX: &str = "used.resources.capsule.clastix.io/";

pub const NODE_SELECTOR: &str = "scheduler.alpha.kubernetes.io/node-selector";

/// The annotation recording a tenant's aggregate usage of `resource`.
pub fn used_quota(resource: &str) -> String {
    format!("{}{}", USED_QUOTA_PREFIX, resource.replace('/', "_"))
}

/// The annotation recording a tenant's declared limit of `resource`.
pub fn hard_quota(resource: &str) -> String {
    format!("{}{}", HARD_QUOTA_PREFIX, resource.replace('/', "_"))
}

pub fn is_quota_annotation(key: &str) -> bool {
    key.starts_with(USED_QUOTA_PREFIX) || key.starts_with(HARD_QUOTA_PREFIX)
}

/// A counted custom resource, addressed as `<resource>.<group>_<version>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CustomResource {
    pub resource: String,
    pub group: String,
    pub version: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidAnnotation {
    #[error("{0:?} is not a custom resource limit annotation")]
    NotALimit(String),

    #[error("{0:?} must be formatted as <resource>.<group>_<version>")]
    Malformed(String),

    #[error("annotation {key:?} has a non-integer value {value:?}")]
    Value { key: String, value: String },
}

// === impl CustomResource ===

impl CustomResource {
    /// Parses a limit annotation key into the resource it limits.
    pub fn from_limit_annotation(key: &str) -> Result<Self, InvalidAnnotation> {
        key.strip_prefix(RESOURCE_LIMIT_PREFIX)
            .ok_or_else(|| InvalidAnnotation::NotALimit(key.to_string()))?
            .parse()
    }

    /// Every well-formed limit annotation in `annotations`, along with the
    /// keys that could not be parsed.
    pub fn from_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> (Vec<Self>, Vec<InvalidAnnotation>) {
        let mut resources = Vec::new();
        let mut invalid = Vec::new();
        for key in annotations.keys() {
            if !key.starts_with(RESOURCE_LIMIT_PREFIX) {
                continue;
            }
            match Self::from_limit_annotation(key) {
                Ok(resource) => resources.push(resource),
                Err(error) => invalid.push(error),
            }
        }
        (resources, invalid)
    }

    pub fn used_annotation(&self) -> String {
        format!("{}{}", RESOURCE_USED_PREFIX, self)
    }

    pub fn limit_annotation(&self) -> String {
        format!("{}{}", RESOURCE_LIMIT_PREFIX, self)
    }

    /// The declared limit; an absent annotation means the resource is unlimited.
    pub fn limit(
        &self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Option<i64>, InvalidAnnotation> {
        let key = self.limit_annotation();
        annotations
            .get(&key)
            .map(|value| parse_count(&key, value))
            .transpose()
    }

    /// The recorded usage; an absent annotation means nothing is used yet.
    pub fn used(&self, annotations: &BTreeMap<String, String>) -> Result<i64, InvalidAnnotation> {
        let key = self.used_annotation();
        match annotations.get(&key) {
            Some(value) => parse_count(&key, value),
            None => Ok(0),
        }
    }
}

fn parse_count(key: &str, value: &str) -> Result<i64, InvalidAnnotation> {
    value.trim().parse().map_err(|_| InvalidAnnotation::Value {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl FromStr for CustomResource {
    type Err = InvalidAnnotation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || InvalidAnnotation::Malformed(s.to_string());
        let (resource_group, version) = s.split_once('_').ok_or_else(malformed)?;
        if version.is_empty() || version.contains('_') {
            return Err(malformed());
        }
        let (resource, group) = resource_group.split_once('.').ok_or_else(malformed)?;
        if resource.is_empty() || group.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            resource: resource.to_string(),
            group: group.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for CustomResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}_{}", self.resource, self.group, self.version)
    }
}
