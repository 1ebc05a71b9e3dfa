use crate::{
    index::{Request, SharedIndex},
    sync::{self, Cluster, PoolReconciler, TenantReconciler},
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::collections::VecDeque;
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration},
};
use tracing::{debug, info, info_span, warn, Instrument};

const REQUEUE_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(300);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Runs the reconcile for a single request.
#[async_trait::async_trait]
pub trait Reconcile {
    async fn reconcile(&self, request: &Request) -> sync::Result<()>;
}

/// Dispatches requests to the tenant and pool reconcilers.
pub struct Reconcilers<C> {
    tenants: TenantReconciler<C>,
    pools: PoolReconciler<C>,
}

/// Drains reconcile requests, one at a time, while this replica leads.
pub struct Controller<R> {
    reconciler: R,
    index: SharedIndex,
    requests: mpsc::UnboundedReceiver<Request>,
    requeues: mpsc::UnboundedSender<Request>,
    leader: watch::Receiver<bool>,
    resync_period: Duration,
    max_backoff: Duration,
    metrics: ControllerMetrics,

    queue: Queue,
    failures: HashMap<Request, u32>,
}

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    reconciles: Family<RequestLabels, Counter>,
    reconcile_errors: Family<RequestLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    kind: String,
}

/// Pending requests in arrival order, each at most once.
#[derive(Debug, Default)]
struct Queue {
    order: VecDeque<Request>,
    pending: HashSet<Request>,
}

// === impl Reconcilers ===

impl<C> Reconcilers<C> {
    pub fn new(tenants: TenantReconciler<C>, pools: PoolReconciler<C>) -> Self {
        Self { tenants, pools }
    }
}

#[async_trait::async_trait]
impl<C: Cluster> Reconcile for Reconcilers<C> {
    async fn reconcile(&self, request: &Request) -> sync::Result<()> {
        match request {
            Request::Tenant(name) => {
                self.tenants
                    .reconcile(name)
                    .instrument(info_span!("tenant", %name))
                    .await
            }
            Request::Pool(name) => {
                self.pools
                    .reconcile(name)
                    .instrument(info_span!("pool", %name))
                    .await
            }
        }
    }
}

// === impl Controller ===

impl<R: Reconcile> Controller<R> {
    /// Failed requests are sent back on `requeues`, which must feed
    /// `requests`.
    pub fn new(
        reconciler: R,
        index: SharedIndex,
        (requeues, requests): (mpsc::UnboundedSender<Request>, mpsc::UnboundedReceiver<Request>),
        leader: watch::Receiver<bool>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            reconciler,
            index,
            requests,
            requeues,
            leader,
            resync_period: DEFAULT_RESYNC_PERIOD,
            max_backoff: DEFAULT_MAX_BACKOFF,
            metrics,
            queue: Queue::default(),
            failures: HashMap::default(),
        }
    }

    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    pub async fn run(mut self, drain: drain::Watch) {
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        let mut resync = time::interval(self.resync_period);
        resync.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            while let Ok(request) = self.requests.try_recv() {
                self.queue.push(request);
            }

            let leader = *self.leader.borrow();
            if let Some(request) = leader.then(|| self.queue.pop()).flatten() {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        info!("Shutting down with a reconcile in flight");
                        return;
                    }
                    () = self.process(request) => {}
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutting down");
                    return;
                }
                res = self.leader.changed() => {
                    if res.is_err() {
                        warn!("Leadership is no longer tracked");
                        return;
                    }
                    if *self.leader.borrow_and_update() {
                        info!("Became leader; resyncing");
                        self.resync();
                    } else {
                        info!("Lost leadership");
                    }
                }
                _ = resync.tick() => self.resync(),
                request = self.requests.recv() => match request {
                    Some(request) => self.queue.push(request),
                    None => {
                        warn!("Request channel closed");
                        return;
                    }
                },
            }
        }
    }

    fn resync(&mut self) {
        let known = self.index.read().known();
        debug!(requests = known.len(), "Resyncing");
        for request in known {
            self.queue.push(request);
        }
    }

    async fn process(&mut self, request: Request) {
        let labels = RequestLabels::from(&request);
        self.metrics.reconciles.get_or_create(&labels).inc();
        match self.reconciler.reconcile(&request).await {
            Ok(()) => {
                self.failures.remove(&request);
            }
            Err(error) => {
                self.metrics.reconcile_errors.get_or_create(&labels).inc();
                let failures = self.failures.entry(request.clone()).or_default();
                *failures += 1;
                let delay = backoff(*failures, self.max_backoff);
                warn!(?request, %error, ?delay, "Reconcile failed; requeueing");

                tokio::spawn(requeue(self.requeues.clone(), request, delay));
            }
        }
    }
}

/// Sends `request` back to the controller after `delay`. Returns false if the
/// controller is gone.
async fn requeue(
    requeues: mpsc::UnboundedSender<Request>,
    request: Request,
    delay: Duration,
) -> bool {
    time::sleep(delay).await;
    match requeues.send(request) {
        Ok(()) => true,
        Err(mpsc::error::SendError(request)) => {
            debug!(?request, "Controller stopped; dropping requeue");
            false
        }
    }
}

/// Doubles the delay on every consecutive failure, up to `max`.
fn backoff(failures: u32, max: Duration) -> Duration {
    let exp = failures.saturating_sub(1).min(31);
    REQUEUE_BASE_DELAY
        .checked_mul(1 << exp)
        .unwrap_or(max)
        .min(max)
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Family::default();
        prom.register(
            "reconciles",
            "Count of reconciles run by the controller",
            reconciles.clone(),
        );

        let reconcile_errors = Family::default();
        prom.register(
            "reconcile_errors",
            "Count of reconciles that failed and were requeued",
            reconcile_errors.clone(),
        );

        Self {
            reconciles,
            reconcile_errors,
        }
    }
}

impl From<&Request> for RequestLabels {
    fn from(request: &Request) -> Self {
        let kind = match request {
            Request::Tenant(_) => "Tenant",
            Request::Pool(_) => "ResourceQuotaPool",
        };
        Self {
            kind: kind.to_string(),
        }
    }
}

// === impl Queue ===

impl Queue {
    fn push(&mut self, request: Request) {
        if self.pending.insert(request.clone()) {
            self.order.push_back(request);
        }
    }

    fn pop(&mut self) -> Option<Request> {
        let request = self.order.pop_front()?;
        self.pending.remove(&request);
        Some(request)
    }
}
