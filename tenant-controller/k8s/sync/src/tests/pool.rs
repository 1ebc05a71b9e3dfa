use super::*;
use crate::PoolReconciler;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use tenant_controller_k8s_api::{
    pool::{PoolClaim, PoolItem, PoolQuotaStatus, PoolSelector},
    LabelSelectorRequirement, Quantity, Registry, ResourceQuota, ResourceQuotaPool,
    ResourceQuotaPoolSpec, ResourceQuotaPoolStatus, ResourceQuotaStatus,
};

fn q(s: &str) -> Quantity {
    Quantity(s.to_string())
}

fn gold_selector() -> PoolSelector {
    PoolSelector {
        must_tenant_namespace: true,
        match_labels: Some(btreemap! { "tier".to_string() => "gold".to_string() }),
        match_expressions: None,
    }
}

fn gold_namespace(name: &str) -> Namespace {
    let mut ns = mk_namespace(name, Some("t1"));
    ns.labels_mut().insert("tier".to_string(), "gold".to_string());
    ns
}

fn setup(namespaces: &[&str]) -> (FakeCluster, PoolReconciler<FakeCluster>) {
    let cluster = FakeCluster::default();
    cluster.seed(ResourceQuotaPool::new(
        "gold",
        ResourceQuotaPoolSpec {
            selectors: vec![gold_selector()],
            items: btreemap! {
                "compute".to_string() => PoolItem {
                    hard: btreemap! { "requests.cpu".to_string() => q("2") },
                },
            },
            ..Default::default()
        },
    ));
    for ns in namespaces {
        cluster.seed(gold_namespace(ns));
    }
    let reconciler = PoolReconciler::new(cluster.clone(), Registry::default());
    (cluster, reconciler)
}

fn pool_quotas(cluster: &FakeCluster) -> Vec<(String, String)> {
    cluster
        .all::<ResourceQuota>()
        .iter()
        .map(|rq| (rq.namespace().unwrap_or_default(), rq.name_any()))
        .collect()
}

fn hard(cluster: &FakeCluster, namespace: &str) -> BTreeMap<String, Quantity> {
    cluster
        .fetch::<ResourceQuota>(Some(namespace), "capsule-pool-gold")
        .and_then(|rq| rq.spec)
        .and_then(|s| s.hard)
        .expect("quota must have limits")
}

fn status(cluster: &FakeCluster) -> ResourceQuotaPoolStatus {
    cluster
        .fetch::<ResourceQuotaPool>(None, "gold")
        .and_then(|p| p.status)
        .expect("pool status must be set")
}

#[tokio::test]
async fn matched_namespaces_receive_the_pool_quota() {
    let (cluster, reconciler) = setup(&["a", "b"]);
    cluster.seed(mk_namespace("c", Some("t1")));

    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    assert_eq!(
        pool_quotas(&cluster),
        vec![
            ("a".to_string(), "capsule-pool-gold".to_string()),
            ("b".to_string(), "capsule-pool-gold".to_string()),
        ]
    );
    let rq = cluster
        .fetch::<ResourceQuota>(Some("a"), "capsule-pool-gold")
        .expect("quota must exist");
    assert_eq!(rq.labels()["projectcapsule.dev/pool"], "gold");
    assert_eq!(
        rq.spec.and_then(|s| s.hard),
        Some(btreemap! { "requests.cpu".to_string() => q("2") })
    );
    assert_eq!(
        rq.metadata.owner_references.map(|r| r[0].kind.clone()),
        Some("ResourceQuotaPool".to_string())
    );

    let status = status(&cluster);
    assert_eq!(status.namespaces, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(status.size, 2);
    assert_eq!(
        status.quota,
        btreemap! {
            "compute".to_string() => PoolQuotaStatus {
                used: Default::default(),
                hard: btreemap! { "requests.cpu".to_string() => q("2") },
            },
        }
    );
}

#[tokio::test]
async fn deleted_namespaces_leave_the_pool() {
    let (cluster, reconciler) = setup(&["a", "b"]);
    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    cluster.delete::<Namespace>(None, "b").await.expect("namespace must exist");
    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    let status = status(&cluster);
    assert_eq!(status.namespaces, vec!["a".to_string()]);
    assert_eq!(status.size, 1);
    assert_eq!(
        pool_quotas(&cluster),
        vec![("a".to_string(), "capsule-pool-gold".to_string())]
    );
}

#[tokio::test]
async fn unmatched_namespaces_are_released() {
    let (cluster, reconciler) = setup(&["a", "b"]);
    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    cluster.modify::<Namespace>(None, "a", |ns| {
        ns.labels_mut().insert("tier".to_string(), "silver".to_string());
    });
    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    assert_eq!(
        pool_quotas(&cluster),
        vec![("b".to_string(), "capsule-pool-gold".to_string())]
    );
    assert_eq!(status(&cluster).namespaces, vec!["b".to_string()]);
}

#[tokio::test]
async fn removed_items_are_garbage_collected() {
    let (cluster, reconciler) = setup(&["a", "b"]);
    cluster.modify::<ResourceQuotaPool>(None, "gold", |pool| {
        pool.spec.items.insert(
            "storage".to_string(),
            PoolItem {
                hard: btreemap! { "requests.storage".to_string() => q("10Gi") },
            },
        );
    });
    reconciler.reconcile("gold").await.expect("reconcile must succeed");
    assert!(status(&cluster).quota.contains_key("storage"));
    assert_eq!(
        hard(&cluster, "a"),
        btreemap! {
            "requests.cpu".to_string() => q("2"),
            "requests.storage".to_string() => q("10Gi"),
        }
    );
    let uid = |ns: &str| {
        cluster
            .fetch::<ResourceQuota>(Some(ns), "capsule-pool-gold")
            .and_then(|rq| rq.uid())
    };
    let uids = (uid("a"), uid("b"));

    cluster.modify::<ResourceQuotaPool>(None, "gold", |pool| {
        pool.spec.items.remove("storage");
    });
    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    assert_eq!(
        status(&cluster).quota.keys().collect::<Vec<_>>(),
        vec!["compute"]
    );
    for ns in ["a", "b"] {
        assert_eq!(
            hard(&cluster, ns),
            btreemap! { "requests.cpu".to_string() => q("2") }
        );
    }
    assert_eq!(
        pool_quotas(&cluster),
        vec![
            ("a".to_string(), "capsule-pool-gold".to_string()),
            ("b".to_string(), "capsule-pool-gold".to_string()),
        ]
    );
    // The quotas are updated in place, never recreated.
    assert_eq!((uid("a"), uid("b")), uids);
}

#[tokio::test]
async fn item_usage_sums_matched_namespaces() {
    let (cluster, reconciler) = setup(&["a", "b"]);
    cluster.modify::<ResourceQuotaPool>(None, "gold", |pool| {
        pool.spec.items.insert(
            "memory".to_string(),
            PoolItem {
                hard: btreemap! { "requests.memory".to_string() => q("4Gi") },
            },
        );
    });
    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    let report = |ns: &str, used: BTreeMap<String, Quantity>| {
        cluster.modify::<ResourceQuota>(Some(ns), "capsule-pool-gold", |rq| {
            rq.status = Some(ResourceQuotaStatus {
                used: Some(used),
                ..Default::default()
            });
        });
    };
    report(
        "a",
        btreemap! {
            "requests.cpu".to_string() => q("500m"),
            "requests.memory".to_string() => q("1Gi"),
        },
    );
    report("b", btreemap! { "requests.cpu".to_string() => q("1") });
    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    let quota = status(&cluster).quota;
    assert_eq!(
        quota["compute"].used,
        btreemap! { "requests.cpu".to_string() => q("1500m") }
    );
    assert_eq!(
        quota["memory"].used,
        btreemap! { "requests.memory".to_string() => q("1Gi") }
    );

    // A namespace that leaves the pool stops counting.
    cluster.modify::<Namespace>(None, "b", |ns| {
        ns.labels_mut().insert("tier".to_string(), "silver".to_string());
    });
    reconciler.reconcile("gold").await.expect("reconcile must succeed");
    assert_eq!(
        status(&cluster).quota["compute"].used,
        btreemap! { "requests.cpu".to_string() => q("500m") }
    );
}

#[tokio::test]
async fn selectors_may_admit_non_tenant_namespaces() {
    let (cluster, reconciler) = setup(&["a"]);
    let mut shared = mk_namespace("shared", None);
    shared.labels_mut().insert("tier".to_string(), "gold".to_string());
    cluster.seed(shared);
    reconciler.reconcile("gold").await.expect("reconcile must succeed");
    assert_eq!(status(&cluster).namespaces, vec!["a".to_string()]);

    cluster.modify::<ResourceQuotaPool>(None, "gold", |pool| {
        pool.spec.selectors[0].must_tenant_namespace = false;
    });
    reconciler.reconcile("gold").await.expect("reconcile must succeed");
    assert_eq!(
        status(&cluster).namespaces,
        vec!["a".to_string(), "shared".to_string()]
    );
}

#[tokio::test]
async fn invalid_selectors_are_skipped() {
    let (cluster, reconciler) = setup(&["a"]);
    cluster.modify::<ResourceQuotaPool>(None, "gold", |pool| {
        pool.spec.selectors.insert(
            0,
            PoolSelector {
                must_tenant_namespace: true,
                match_labels: None,
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "Bogus".to_string(),
                    values: None,
                }]),
            },
        );
    });

    reconciler.reconcile("gold").await.expect("reconcile must succeed");
    assert_eq!(status(&cluster).namespaces, vec!["a".to_string()]);
}

#[tokio::test]
async fn claims_and_defaults_extend_a_namespace_quota() {
    let (cluster, reconciler) = setup(&["a", "b"]);
    cluster.modify::<ResourceQuotaPool>(None, "gold", |pool| {
        pool.spec.namespace_defaults = btreemap! { "requests.cpu".to_string() => q("500m") };
        pool.status = Some(ResourceQuotaPoolStatus {
            claims: vec![PoolClaim {
                namespace: "b".to_string(),
                claims: btreemap! { "requests.cpu".to_string() => q("1") },
            }],
            ..Default::default()
        });
    });

    reconciler.reconcile("gold").await.expect("reconcile must succeed");

    let hard = |ns: &str| {
        cluster
            .fetch::<ResourceQuota>(Some(ns), "capsule-pool-gold")
            .and_then(|rq| rq.spec)
            .and_then(|s| s.hard)
            .expect("quota must have limits")
    };
    assert_eq!(hard("a"), btreemap! { "requests.cpu".to_string() => q("2500m") });
    assert_eq!(hard("b"), btreemap! { "requests.cpu".to_string() => q("3500m") });
}
