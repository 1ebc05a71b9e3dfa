//! Leader election over a `coordination.k8s.io` Lease.
//!
//! Only the replica holding the lease writes to the cluster. The lease is
//! created once, owned by the controller's Deployment when it can be found,
//! and then contended for by every replica through kubert's `LeaseManager`.

use crate::{
    core::CONTROLLER_NAME,
    k8s::{self, ObjectMeta, OwnerReference, Resource},
};
use anyhow::Result;
use k8s_openapi::api::{apps::v1::Deployment, coordination::v1::Lease};
use std::sync::Arc;
use tokio::{sync::watch, time::Duration};

const LEASE_NAME: &str = "tenant-controller-write";

/// Where the lease lives and how it is held.
#[derive(Clone, Debug)]
pub struct LeaseParams {
    pub namespace: String,
    /// The Deployment that owns the lease, so uninstalling removes it.
    pub deployment: String,
    pub duration: Duration,
    pub renew_grace_period: Duration,
}

impl LeaseParams {
    pub fn new(namespace: impl ToString, deployment: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            duration: Duration::from_secs(30),
            renew_grace_period: Duration::from_secs(1),
        }
    }
}

/// Ensures the lease exists, competes for it as `hostname`, and reports
/// whether this replica currently holds it.
pub async fn leadership<T>(
    runtime: &kubert::Runtime<T>,
    params: &LeaseParams,
    hostname: &str,
) -> Result<watch::Receiver<bool>> {
    let deployments = k8s::Api::<Deployment>::namespaced(runtime.client(), &params.namespace);
    let owner = match deployments.get_opt(&params.deployment).await? {
        Some(deployment) => deployment.controller_owner_ref(&()),
        None => {
            tracing::warn!(
                deployment = %params.deployment,
                "Controller Deployment not found; the Lease will have no owner"
            );
            None
        }
    };

    let api = k8s::Api::<Lease>::namespaced(runtime.client(), &params.namespace);
    let patch = k8s::PatchParams::apply(CONTROLLER_NAME);
    match api
        .patch(
            LEASE_NAME,
            &patch,
            &k8s::Patch::Apply(lease(&params.namespace, owner)),
        )
        .await
    {
        Ok(_) => tracing::info!(name = LEASE_NAME, "Created Lease"),
        Err(k8s::Error::Api(rsp)) if rsp.code == 409 => {
            tracing::debug!(name = LEASE_NAME, "Lease already exists")
        }
        Err(error) => return Err(error.into()),
    }

    let claim = kubert::lease::ClaimParams {
        lease_duration: params.duration,
        renew_grace_period: params.renew_grace_period,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, LEASE_NAME)
        .await?
        .spawn(hostname, claim)
        .await?;
    Ok(track(claims, hostname.to_string()))
}

/// A Lease that is only created if absent: a resource version of "0" makes
/// the apply fail when the object already exists.
fn lease(namespace: &str, owner: Option<OwnerReference>) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("0".to_string()),
            owner_references: owner.map(|o| vec![o]),
            labels: Some(
                [
                    ("app.kubernetes.io/component", "tenant-controller"),
                    ("app.kubernetes.io/part-of", "capsule"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    }
}

fn track(
    mut claims: watch::Receiver<Arc<kubert::lease::Claim>>,
    hostname: String,
) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(claims.borrow_and_update().is_current_for(&hostname));
    tokio::spawn(async move {
        loop {
            tokio::select! {
                res = claims.changed() => {
                    if res.is_err() {
                        tracing::warn!("Lease manager stopped");
                        tx.send_replace(false);
                        return;
                    }
                }
                () = tx.closed() => return,
            }
            let leader = claims.borrow_and_update().is_current_for(&hostname);
            tx.send_if_modified(|current| {
                let changed = *current != leader;
                *current = leader;
                changed
            });
        }
    });
    rx
}

/// Leadership for a controller that never competes for the lease.
pub fn always_leader() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(true);
    tokio::spawn(async move { tx.closed().await });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_create_only() {
        let lease = lease("capsule-system", None);
        assert_eq!(lease.metadata.name.as_deref(), Some(LEASE_NAME));
        assert_eq!(lease.metadata.namespace.as_deref(), Some("capsule-system"));
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("0"));
        assert_eq!(lease.metadata.owner_references, None);
        assert_eq!(
            lease.metadata.labels.unwrap()["app.kubernetes.io/part-of"],
            "capsule"
        );
    }

    #[test]
    fn lease_is_owned_by_the_deployment() {
        let owner = OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "capsule-controller-manager".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            ..Default::default()
        };
        let lease = lease("capsule-system", Some(owner.clone()));
        assert_eq!(lease.metadata.owner_references, Some(vec![owner]));
    }

    #[tokio::test]
    async fn always_leader_stays_leader() {
        let rx = always_leader();
        assert!(*rx.borrow());
    }
}
