use crate::{
    controller::{Controller, ControllerMetrics, Reconcilers},
    index::{Index, IndexMetrics},
    k8s, lease,
    sync::{KubeCluster, PoolReconciler, QuotaMetrics, TenantReconciler},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "tenant", about = "A tenant resource controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "tenant=info,warn",
        env = "TENANT_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace the controller runs in, where its write lease lives.
    #[clap(long, default_value = "capsule-system")]
    controller_namespace: String,

    #[clap(long, default_value = "capsule-controller-manager")]
    controller_deployment_name: String,

    /// Reconciles without holding the write lease. Only safe with a single
    /// replica.
    #[clap(long)]
    leader_election_disabled: bool,

    /// How often every tenant and pool is reconciled regardless of events.
    #[clap(long, default_value = "300")]
    resync_period_secs: u64,

    #[clap(long, default_value = "300")]
    requeue_max_backoff_secs: u64,

    /// Domain of the labels stamped on replicated objects.
    #[clap(long, default_value = "capsule.clastix.io")]
    label_domain: String,

    #[clap(long, default_value = "projectcapsule.dev")]
    pool_label_domain: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            controller_namespace,
            controller_deployment_name,
            leader_election_disabled,
            resync_period_secs,
            requeue_max_backoff_secs,
            label_domain,
            pool_label_domain,
        } = self;

        let registry = k8s::Registry::new(label_domain, pool_label_domain);

        // Every watch event lands in the index, which turns it into a request
        // for the controller.
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let index = Index::shared(registry.clone(), requests_tx.clone());

        let mut prom = <Registry>::default();
        let quota_metrics = QuotaMetrics::register(&mut prom);
        let index_metrics =
            IndexMetrics::register(index.clone(), prom.sub_registry_with_prefix("index")).shared();
        let controller_metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let leader = if leader_election_disabled {
            info!("Leader election disabled");
            lease::always_leader()
        } else {
            let params =
                lease::LeaseParams::new(&controller_namespace, &controller_deployment_name);
            lease::leadership(&runtime, &params, &hostname).await?
        };

        // Spawn resource watches.

        let tenants = runtime.watch_all::<k8s::Tenant>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index_metrics.clone(), tenants).instrument(info_span!("tenants")),
        );

        let pools = runtime.watch_all::<k8s::ResourceQuotaPool>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index_metrics.clone(), pools)
                .instrument(info_span!("resourcequotapools")),
        );

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index_metrics.clone(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        // Tenant replicas all carry the tenant label. Quotas are watched
        // unfiltered since pool quotas carry the pool label instead.
        let tenant_label = registry.tenant_label();

        let network_policies = runtime.watch_all::<k8s::NetworkPolicy>(
            watcher::Config::default().labels(&tenant_label),
        );
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), network_policies)
                .instrument(info_span!("networkpolicies")),
        );

        let limit_ranges =
            runtime.watch_all::<k8s::LimitRange>(watcher::Config::default().labels(&tenant_label));
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), limit_ranges)
                .instrument(info_span!("limitranges")),
        );

        let role_bindings =
            runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default().labels(&tenant_label));
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), role_bindings)
                .instrument(info_span!("rolebindings")),
        );

        let quotas = runtime.watch_all::<k8s::ResourceQuota>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index_metrics, quotas)
                .instrument(info_span!("resourcequotas")),
        );

        let cluster = KubeCluster::new(runtime.client(), Some(hostname));
        let reconcilers = Reconcilers::new(
            TenantReconciler::new(cluster.clone(), registry.clone(), quota_metrics),
            PoolReconciler::new(cluster, registry),
        );
        let controller = Controller::new(
            reconcilers,
            index,
            (requests_tx, requests_rx),
            leader,
            controller_metrics,
        )
        .with_resync_period(Duration::from_secs(resync_period_secs))
        .with_max_backoff(Duration::from_secs(requeue_max_backoff_secs));
        tokio::spawn(
            controller
                .run(runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
