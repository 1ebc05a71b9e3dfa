use crate::{cluster::Object, Cluster, Error, Result};
use std::fmt;
use tenant_controller_k8s_api::{OwnerReference, Resource, ResourceExt};

/// The outcome of reconciling one object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Created,
    Updated,
    Unchanged,
}

// === impl Operation ===

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Unchanged => "Unchanged",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetches the named object (or starts from an empty one), applies `mutate`,
/// and writes it only if the result differs from what was read.
pub async fn create_or_update<C, K, F>(
    cluster: &C,
    namespace: Option<&str>,
    name: &str,
    mutate: F,
) -> Result<Operation>
where
    C: Cluster,
    K: Object + Default,
    F: FnOnce(&mut K) -> Result<()>,
{
    match cluster.get::<K>(namespace, name).await? {
        None => {
            let mut obj = K::default();
            obj.meta_mut().name = Some(name.to_string());
            obj.meta_mut().namespace = namespace.map(ToString::to_string);
            mutate(&mut obj)?;
            cluster.create(&obj).await?;
            Ok(Operation::Created)
        }
        Some(current) => apply_mutation(cluster, current, mutate).await,
    }
}

/// Like [`create_or_update`], but an absent object is left absent.
pub async fn update<C, K, F>(
    cluster: &C,
    namespace: Option<&str>,
    name: &str,
    mutate: F,
) -> Result<Option<Operation>>
where
    C: Cluster,
    K: Object,
    F: FnOnce(&mut K) -> Result<()>,
{
    match cluster.get::<K>(namespace, name).await? {
        None => Ok(None),
        Some(current) => apply_mutation(cluster, current, mutate).await.map(Some),
    }
}

async fn apply_mutation<C, K, F>(cluster: &C, current: K, mutate: F) -> Result<Operation>
where
    C: Cluster,
    K: Object,
    F: FnOnce(&mut K) -> Result<()>,
{
    let mut obj = current.clone();
    mutate(&mut obj)?;
    if serde_json::to_value(&obj)? == serde_json::to_value(&current)? {
        return Ok(Operation::Unchanged);
    }
    cluster.replace(&obj).await?;
    Ok(Operation::Updated)
}

/// Makes `owner` the controller of `obj`, refusing to take over an object
/// another owner controls.
pub fn set_controller_reference<O, K>(obj: &mut K, owner: &O) -> Result<()>
where
    O: Resource<DynamicType = ()>,
    K: Resource<DynamicType = ()>,
{
    let reference = owner
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingUid {
            kind: O::kind(&()).to_string(),
            name: owner.meta().name.clone().unwrap_or_default(),
        })?;

    if let Some(other) = obj
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != reference.uid)
    {
        return Err(Error::AlreadyOwned {
            kind: K::kind(&()).to_string(),
            name: obj.name_any(),
            owner: format!("{} {}", other.kind, other.name),
        });
    }

    upsert_reference(obj.owner_references_mut(), reference);
    Ok(())
}

fn upsert_reference(refs: &mut Vec<OwnerReference>, reference: OwnerReference) {
    match refs.iter_mut().find(|r| r.uid == reference.uid) {
        Some(existing) => *existing = reference,
        None => refs.push(reference),
    }
}
