use super::*;
use crate::{syncer, Context, EventType};
use k8s_openapi::api::core::v1::LimitRangeItem;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use tenant_controller_k8s_api::{
    tenant::{AdditionalRoleBinding, OwnerKind, OwnerSpec},
    LimitRange, LimitRangeSpec, NetworkPolicy, NetworkPolicySpec, Quantity, Registry, RoleBinding,
    Subject, TenantSpec,
};

fn network_policy(policy_type: &str) -> NetworkPolicySpec {
    NetworkPolicySpec {
        policy_types: Some(vec![policy_type.to_string()]),
        ..Default::default()
    }
}

fn tenant_with_policies(cluster: &FakeCluster, policies: Vec<NetworkPolicySpec>) -> Tenant {
    let mut spec = TenantSpec::default();
    spec.network_policies.items = policies;
    cluster.seed(Tenant::new("t1", spec))
}

fn names<K: Object>(cluster: &FakeCluster) -> Vec<(String, String)> {
    cluster
        .all::<K>()
        .iter()
        .map(|o| (o.namespace().unwrap_or_default(), o.name_any()))
        .collect()
}

#[tokio::test]
async fn second_sync_writes_nothing() {
    let cluster = FakeCluster::default();
    let registry = Registry::default();
    let ctx = Context::new(&cluster, &registry);
    let tenant = tenant_with_policies(
        &cluster,
        vec![network_policy("Ingress"), network_policy("Egress")],
    );
    let namespaces = vec!["a".to_string(), "b".to_string()];

    syncer::sync::<_, NetworkPolicy>(ctx, &tenant, &namespaces)
        .await
        .expect("sync must succeed");
    assert_eq!(cluster.writes(), 4);
    assert_eq!(
        names::<NetworkPolicy>(&cluster),
        vec![
            ("a".to_string(), "capsule-t1-0".to_string()),
            ("a".to_string(), "capsule-t1-1".to_string()),
            ("b".to_string(), "capsule-t1-0".to_string()),
            ("b".to_string(), "capsule-t1-1".to_string()),
        ]
    );

    syncer::sync::<_, NetworkPolicy>(ctx, &tenant, &namespaces)
        .await
        .expect("sync must succeed");
    assert_eq!(cluster.writes(), 4, "unchanged objects must not be written");

    let reasons = cluster
        .events()
        .into_iter()
        .map(|e| e.reason)
        .collect::<Vec<_>>();
    assert_eq!(reasons.iter().filter(|r| *r == "Created").count(), 4);
    assert_eq!(reasons.iter().filter(|r| *r == "Unchanged").count(), 4);
}

#[tokio::test]
async fn replicas_are_labeled_and_owned() {
    let cluster = FakeCluster::default();
    let registry = Registry::default();
    let ctx = Context::new(&cluster, &registry);
    let tenant = tenant_with_policies(&cluster, vec![network_policy("Ingress")]);

    syncer::sync::<_, NetworkPolicy>(ctx, &tenant, &["a".to_string()])
        .await
        .expect("sync must succeed");

    let np = cluster
        .fetch::<NetworkPolicy>(Some("a"), "capsule-t1-0")
        .expect("policy must exist");
    assert_eq!(
        np.labels(),
        &btreemap! {
            "capsule.clastix.io/network-policy".to_string() => "0".to_string(),
            "capsule.clastix.io/tenant".to_string() => "t1".to_string(),
        }
    );
    assert_eq!(np.spec, Some(network_policy("Ingress")));
    let owner = &np.owner_references()[0];
    assert_eq!(owner.kind, "Tenant");
    assert_eq!(Some(owner.uid.clone()), tenant.uid());

    let event = &cluster.events()[0];
    assert_eq!(event.type_, EventType::Normal);
    assert_eq!(event.note, "Ensuring NetworkPolicy capsule-t1-0 in namespace a");
}

#[tokio::test]
async fn drift_is_reverted() {
    let cluster = FakeCluster::default();
    let registry = Registry::default();
    let ctx = Context::new(&cluster, &registry);
    let tenant = tenant_with_policies(&cluster, vec![network_policy("Ingress")]);
    let namespaces = vec!["a".to_string()];

    syncer::sync::<_, NetworkPolicy>(ctx, &tenant, &namespaces)
        .await
        .expect("sync must succeed");
    cluster.modify::<NetworkPolicy>(Some("a"), "capsule-t1-0", |np| {
        np.spec = Some(network_policy("Egress"));
    });

    syncer::sync::<_, NetworkPolicy>(ctx, &tenant, &namespaces)
        .await
        .expect("sync must succeed");
    let np = cluster
        .fetch::<NetworkPolicy>(Some("a"), "capsule-t1-0")
        .expect("policy must exist");
    assert_eq!(np.spec, Some(network_policy("Ingress")));
    assert_eq!(cluster.events().last().map(|e| e.reason.as_str()), Some("Updated"));
}

#[tokio::test]
async fn undeclared_replicas_are_pruned() {
    let cluster = FakeCluster::default();
    let registry = Registry::default();
    let ctx = Context::new(&cluster, &registry);
    let limits = (1..=3)
        .map(|cpu| LimitRangeSpec {
            limits: vec![LimitRangeItem {
                type_: "Container".to_string(),
                max: Some(btreemap! { "cpu".to_string() => Quantity(cpu.to_string()) }),
                ..Default::default()
            }],
        })
        .collect::<Vec<_>>();
    let mut spec = TenantSpec::default();
    spec.limit_ranges.items = limits.clone();
    let mut tenant = cluster.seed(Tenant::new("t1", spec));
    let namespaces = vec!["a".to_string(), "b".to_string()];

    // An unmanaged object must survive pruning.
    cluster.seed(LimitRange {
        metadata: ObjectMeta {
            name: Some("custom".to_string()),
            namespace: Some("a".to_string()),
            ..Default::default()
        },
        ..Default::default()
    });

    syncer::sync::<_, LimitRange>(ctx, &tenant, &namespaces)
        .await
        .expect("sync must succeed");
    assert_eq!(cluster.all::<LimitRange>().len(), 7);

    tenant.spec.limit_ranges.items = limits[..1].to_vec();
    syncer::sync::<_, LimitRange>(ctx, &tenant, &namespaces)
        .await
        .expect("sync must succeed");
    assert_eq!(
        names::<LimitRange>(&cluster),
        vec![
            ("a".to_string(), "capsule-t1-0".to_string()),
            ("a".to_string(), "custom".to_string()),
            ("b".to_string(), "capsule-t1-0".to_string()),
        ]
    );

    tenant.spec.limit_ranges.items.clear();
    syncer::sync::<_, LimitRange>(ctx, &tenant, &namespaces)
        .await
        .expect("sync must succeed");
    assert_eq!(
        names::<LimitRange>(&cluster),
        vec![("a".to_string(), "custom".to_string())]
    );
}

#[tokio::test]
async fn role_bindings_are_keyed_by_content() {
    let cluster = FakeCluster::default();
    let registry = Registry::default();
    let ctx = Context::new(&cluster, &registry);
    let spec = TenantSpec {
        owners: vec![OwnerSpec {
            kind: OwnerKind::User,
            name: "alice".to_string(),
            cluster_roles: vec!["admin".to_string()],
        }],
        additional_role_bindings: vec![AdditionalRoleBinding {
            cluster_role_name: "view".to_string(),
            subjects: vec![Subject {
                kind: "Group".to_string(),
                name: "auditors".to_string(),
                ..Default::default()
            }],
        }],
        ..Default::default()
    };
    let tenant = cluster.seed(Tenant::new("t1", spec));

    syncer::sync::<_, RoleBinding>(ctx, &tenant, &["a".to_string()])
        .await
        .expect("sync must succeed");

    let bindings = cluster.all::<RoleBinding>();
    assert_eq!(
        bindings.iter().map(|rb| rb.name_any()).collect::<Vec<_>>(),
        vec!["capsule-t1-0-admin", "capsule-t1-1-view"]
    );
    let expected = tenant.spec.role_bindings();
    for (rb, binding) in bindings.iter().zip(&expected) {
        assert_eq!(rb.labels()["capsule.clastix.io/role-binding"], binding.key());
        assert_eq!(rb.role_ref.kind, "ClusterRole");
        assert_eq!(rb.role_ref.name, binding.cluster_role_name);
        assert_eq!(rb.subjects.as_ref(), Some(&binding.subjects));
    }
}

#[tokio::test]
async fn foreign_objects_are_not_taken_over() {
    let cluster = FakeCluster::default();
    let registry = Registry::default();
    let ctx = Context::new(&cluster, &registry);
    let tenant = tenant_with_policies(&cluster, vec![network_policy("Ingress")]);
    cluster.seed(NetworkPolicy {
        metadata: ObjectMeta {
            name: Some("capsule-t1-0".to_string()),
            namespace: Some("a".to_string()),
            owner_references: Some(vec![OwnerReference {
                kind: "Tenant".to_string(),
                name: "t2".to_string(),
                uid: "someone-else".to_string(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        ..Default::default()
    });

    let error = syncer::sync::<_, NetworkPolicy>(ctx, &tenant, &["a".to_string()])
        .await
        .expect_err("sync must fail");
    assert!(matches!(error, Error::AlreadyOwned { .. }), "{error}");
    let event = cluster.events().pop().expect("an event must be recorded");
    assert_eq!(event.type_, EventType::Warning);
    assert_eq!(event.reason, "Error");
}
