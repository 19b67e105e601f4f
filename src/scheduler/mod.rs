//! Rate-limited gateway to the enrichment provider.
//!
//! A single actor task owns the pending queue and the usage window. Callers
//! hold a cloneable [`RequestScheduler`] handle and `submit` closures; the
//! actor admits the head of the queue only when the trailing window plus the
//! call's estimate stays within `quota × safety_margin`, runs one call at a
//! time with a minimum spacing, and requeues provider quota rejections at the
//! front of their band after a backoff.

pub mod queue;
pub mod usage;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::enrich::{Completion, DynEnricher, EnrichError, Metered, Prompt};
use queue::PendingQueue;
use usage::UsageTracker;

/// Floor applied to every quota backoff, provider-supplied or not.
pub const MIN_QUOTA_BACKOFF: Duration = Duration::from_secs(2);

const MAX_BACKOFF_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Provider token quota per window.
    pub token_quota: u64,
    /// Provider request quota per window, if it has one.
    pub request_quota: Option<u64>,
    pub safety_margin: f64,
    pub window: Duration,
    pub min_spacing: Duration,
    pub default_backoff: Duration,
    /// Ceiling for any quota backoff, including provider-supplied ones.
    pub max_backoff: Duration,
    pub call_timeout: Duration,
    /// Waiting time per one-band priority promotion. `None` disables aging.
    pub aging: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            token_quota: 200_000,
            request_quota: None,
            safety_margin: 0.9,
            window: Duration::from_secs(60),
            min_spacing: Duration::from_millis(100),
            default_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
            aging: Some(Duration::from_secs(30)),
        }
    }
}

impl SchedulerConfig {
    pub fn token_limit(&self) -> u64 {
        (self.token_quota as f64 * self.safety_margin).floor() as u64
    }

    pub fn request_limit(&self) -> Option<u64> {
        self.request_quota
            .map(|q| ((q as f64 * self.safety_margin).floor() as u64).max(1))
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        let bad = |m: &str| Err(SchedulerError::InvalidConfig(m.to_string()));
        if !(self.safety_margin > 0.0 && self.safety_margin <= 1.0) {
            return bad("safety_margin must be in (0, 1]");
        }
        if self.token_limit() == 0 {
            return bad("token_quota × safety_margin must be at least 1");
        }
        if self.request_quota == Some(0) {
            return bad("request_quota must be positive when set");
        }
        if self.window.is_zero() {
            return bad("window must be positive");
        }
        if self.default_backoff < MIN_QUOTA_BACKOFF {
            return bad("default_backoff must be at least 2s");
        }
        if self.max_backoff < self.default_backoff {
            return bad("max_backoff must be at least default_backoff");
        }
        if self.max_backoff > MAX_BACKOFF_CEILING {
            return bad("max_backoff must be at most 24h");
        }
        if self.call_timeout.is_zero() {
            return bad("call_timeout must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Call(#[from] EnrichError),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("estimated cost {cost} exceeds usable limit {limit}")]
    CostExceedsLimit { cost: u64, limit: u64 },

    #[error("scheduler is shut down")]
    Shutdown,

    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
}

/// Read-only view for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub queue_depth: usize,
    pub in_flight: bool,
    pub window_tokens: u64,
    pub window_requests: usize,
    pub token_limit: u64,
    pub headroom: u64,
    /// Until the oldest sample leaves the window; 0 when the window is empty.
    pub ms_until_reset: u64,
    /// Remaining quota backoff; 0 when not backing off.
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct Published {
    queue_depth: usize,
    in_flight: bool,
    samples: Vec<usage::Sample>,
    backoff_until: Option<Instant>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

enum Attempt {
    Succeeded { actual_cost: Option<u64> },
    QuotaExceeded { retry_after: Option<Duration> },
    Failed,
}

/// Type-erased call: the actor only needs to run it, learn the outcome class,
/// and know whether anyone still waits for it.
trait ErasedCall: Send {
    fn attempt(&mut self, limit: Duration) -> BoxFuture<'_, Attempt>;
    fn is_abandoned(&self) -> bool;
    fn reject(self: Box<Self>, err: SchedulerError);
}

struct TypedCall<T, F> {
    invoke: F,
    reply: Option<oneshot::Sender<Result<T, SchedulerError>>>,
}

impl<T, F> TypedCall<T, F> {
    fn respond(&mut self, result: Result<T, SchedulerError>) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(result);
        }
    }
}

impl<T, F, Fut> ErasedCall for TypedCall<T, F>
where
    T: Metered + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, EnrichError>> + Send + 'static,
{
    fn attempt(&mut self, limit: Duration) -> BoxFuture<'_, Attempt> {
        let fut = (self.invoke)();
        Box::pin(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(Ok(value)) => {
                    let actual_cost = value.actual_cost();
                    self.respond(Ok(value));
                    Attempt::Succeeded { actual_cost }
                }
                Ok(Err(EnrichError::QuotaExceeded { retry_after })) => {
                    Attempt::QuotaExceeded { retry_after }
                }
                Ok(Err(e)) => {
                    self.respond(Err(SchedulerError::Call(e)));
                    Attempt::Failed
                }
                Err(_) => {
                    self.respond(Err(SchedulerError::Timeout(limit)));
                    Attempt::Failed
                }
            }
        })
    }

    fn is_abandoned(&self) -> bool {
        self.reply.as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn reject(mut self: Box<Self>, err: SchedulerError) {
        self.respond(Err(err));
    }
}

struct QueuedCall {
    id: u64,
    cost: u64,
    priority: i32,
    created_at: Instant,
    call: Box<dyn ErasedCall>,
}

/// Handle to the scheduler actor. Cheap to clone; every clone feeds the same
/// queue and window.
#[derive(Clone)]
pub struct RequestScheduler {
    tx: mpsc::UnboundedSender<QueuedCall>,
    status: watch::Receiver<Published>,
    token_limit: u64,
    window: Duration,
    next_id: Arc<AtomicU64>,
}

impl RequestScheduler {
    /// Validate `cfg` and start the actor on the current runtime.
    pub fn spawn(cfg: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::spawn_with_shutdown(cfg, CancellationToken::new())
    }

    /// Like [`spawn`](Self::spawn); cancelling `shutdown` fails every queued
    /// call with [`SchedulerError::Shutdown`] and stops the actor once the
    /// in-flight call returns.
    pub fn spawn_with_shutdown(
        cfg: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, SchedulerError> {
        cfg.validate()?;
        crate::telemetry::ensure_metrics_described();

        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Published::default());
        let token_limit = cfg.token_limit();
        let window = cfg.window;

        let actor = Actor {
            rx,
            open: true,
            queue: PendingQueue::new(cfg.aging),
            usage: UsageTracker::new(cfg.window, token_limit, cfg.request_limit()),
            status_tx,
            in_flight: false,
            last_start: None,
            backoff_until: None,
            shutdown,
            cfg,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            tx,
            status: status_rx,
            token_limit,
            window,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Queue `invoke` and wait until it has run to completion or failed
    /// permanently.
    ///
    /// `priority`: lower runs first; equal priorities run in submission order.
    /// `invoke` may be called more than once when the provider answers with
    /// a quota rejection. Dropping the returned future withdraws a call that
    /// has not started yet.
    pub async fn submit<T, F, Fut>(
        &self,
        invoke: F,
        estimated_cost: u64,
        priority: i32,
    ) -> Result<T, SchedulerError>
    where
        T: Metered + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, EnrichError>> + Send + 'static,
    {
        if estimated_cost > self.token_limit {
            return Err(SchedulerError::CostExceedsLimit {
                cost: estimated_cost,
                limit: self.token_limit,
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = QueuedCall {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cost: estimated_cost,
            priority,
            created_at: Instant::now(),
            call: Box::new(TypedCall {
                invoke,
                reply: Some(reply_tx),
            }),
        };
        self.tx
            .send(queued)
            .map_err(|_| SchedulerError::Shutdown)?;
        reply_rx.await.unwrap_or(Err(SchedulerError::Shutdown))
    }

    /// Send `prompt` to `enricher` through the queue.
    pub async fn complete(
        &self,
        enricher: &DynEnricher,
        prompt: Prompt,
        estimated_cost: u64,
        priority: i32,
    ) -> Result<Completion, SchedulerError> {
        let enricher = Arc::clone(enricher);
        let prompt = Arc::new(prompt);
        self.submit(
            move || {
                let enricher = Arc::clone(&enricher);
                let prompt = Arc::clone(&prompt);
                async move { enricher.complete(&prompt).await }
            },
            estimated_cost,
            priority,
        )
        .await
    }

    pub fn status(&self) -> SchedulerStatus {
        let now = Instant::now();
        let p = self.status.borrow();
        let live: Vec<&usage::Sample> = p
            .samples
            .iter()
            .filter(|s| s.at + self.window > now)
            .collect();
        let window_tokens: u64 = live.iter().map(|s| s.cost).sum();
        let ms_until_reset = live
            .first()
            .map(|s| (s.at + self.window).saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0);
        let backoff_ms = p
            .backoff_until
            .map(|t| t.saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0);

        SchedulerStatus {
            queue_depth: p.queue_depth,
            in_flight: p.in_flight,
            window_tokens,
            window_requests: live.len(),
            token_limit: self.token_limit,
            headroom: self.token_limit.saturating_sub(window_tokens),
            ms_until_reset,
            backoff_ms,
        }
    }

    pub fn token_limit(&self) -> u64 {
        self.token_limit
    }
}

struct Actor {
    rx: mpsc::UnboundedReceiver<QueuedCall>,
    open: bool,
    queue: PendingQueue<QueuedCall>,
    usage: UsageTracker,
    status_tx: watch::Sender<Published>,
    in_flight: bool,
    last_start: Option<Instant>,
    backoff_until: Option<Instant>,
    shutdown: CancellationToken,
    cfg: SchedulerConfig,
}

impl Actor {
    async fn run(mut self) {
        info!(
            target: "scheduler",
            token_limit = self.usage.token_limit(),
            window_s = self.cfg.window.as_secs(),
            "request scheduler started"
        );
        loop {
            if self.shutdown.is_cancelled() {
                self.shut_down();
                break;
            }
            self.accept_pending();
            self.drop_abandoned();
            self.publish();

            let now = Instant::now();
            let Some(idx) = self.queue.head(now) else {
                if !self.open {
                    break;
                }
                self.wait_for(None).await;
                continue;
            };

            if let Some(wake) = self.blocked_until(idx, now) {
                self.wait_for(Some(wake)).await;
                continue;
            }

            let entry = self.queue.remove(idx);
            self.execute(entry).await;
        }
        debug!(target: "scheduler", "request scheduler stopped");
    }

    fn enqueue(&mut self, call: QueuedCall) {
        let priority = call.priority;
        let created = call.created_at;
        self.queue.push(call, priority, created);
    }

    fn accept(&mut self, msg: Option<QueuedCall>) {
        match msg {
            Some(call) => self.enqueue(call),
            None => self.open = false,
        }
    }

    fn accept_pending(&mut self) {
        while let Ok(call) = self.rx.try_recv() {
            self.enqueue(call);
        }
    }

    fn drop_abandoned(&mut self) {
        let gone = self.queue.extract_if_not(|c| !c.call.is_abandoned());
        if !gone.is_empty() {
            debug!(target: "scheduler", count = gone.len(), "dropped withdrawn calls");
            counter!("scheduler_calls_total", "outcome" => "withdrawn").increment(gone.len() as u64);
        }
    }

    /// `None` when the head may start now; otherwise the next instant worth
    /// re-checking.
    fn blocked_until(&mut self, idx: usize, now: Instant) -> Option<Instant> {
        let cost = self.queue.get(idx).map(|e| e.item.cost).unwrap_or(0);
        let mut wake: Option<Instant> = None;
        let mut later = |t: Instant| {
            if t > now {
                wake = Some(wake.map_or(t, |w: Instant| w.max(t)));
            }
        };

        if let Some(until) = self.backoff_until {
            later(until);
        }
        if let Some(last) = self.last_start {
            later(last + self.cfg.min_spacing);
        }
        if !self.usage.admits(now, cost) {
            let expiry = self
                .usage
                .window()
                .next_expiry()
                .unwrap_or(now + self.cfg.window);
            later(expiry);
        }
        wake
    }

    /// Sleep until `deadline` (or indefinitely), waking early for new
    /// submissions or shutdown.
    async fn wait_for(&mut self, deadline: Option<Instant>) {
        let sleep = async {
            match deadline {
                Some(t) => tokio::time::sleep_until(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = sleep => {}
            _ = self.shutdown.cancelled() => {}
            msg = self.rx.recv(), if self.open => self.accept(msg),
        }
    }

    async fn execute(&mut self, entry: queue::Entry<QueuedCall>) {
        let queue::Entry {
            priority,
            enqueued_at,
            item: mut queued,
            ..
        } = entry;

        let started = Instant::now();
        histogram!("scheduler_wait_ms")
            .record(started.saturating_duration_since(queued.created_at).as_secs_f64() * 1_000.0);
        debug!(
            target: "scheduler",
            id = queued.id,
            cost = queued.cost,
            priority,
            window_tokens = self.usage.window().tokens(),
            "admitting call"
        );

        self.in_flight = true;
        self.last_start = Some(started);
        self.publish();

        let outcome = {
            let mut fut = queued.call.attempt(self.cfg.call_timeout);
            loop {
                tokio::select! {
                    out = &mut fut => break out,
                    msg = self.rx.recv(), if self.open => {
                        self.accept(msg);
                        self.publish();
                    }
                }
            }
        };
        self.in_flight = false;

        let now = Instant::now();
        match outcome {
            Attempt::Succeeded { actual_cost } => {
                let cost = actual_cost.unwrap_or(queued.cost);
                self.usage.commit(now, cost);
                counter!("scheduler_calls_total", "outcome" => "ok").increment(1);
            }
            Attempt::QuotaExceeded { retry_after } => {
                let backoff = retry_after
                    .unwrap_or(self.cfg.default_backoff)
                    .clamp(MIN_QUOTA_BACKOFF, self.cfg.max_backoff);
                self.backoff_until = Some(
                    now.checked_add(backoff)
                        .unwrap_or(now + self.cfg.max_backoff),
                );
                counter!("scheduler_quota_retries_total").increment(1);
                warn!(
                    target: "scheduler",
                    id = queued.id,
                    backoff_ms = backoff.as_millis() as u64,
                    "provider quota exceeded; requeueing at front"
                );
                if !queued.call.is_abandoned() {
                    self.queue.push_front(queued, priority, enqueued_at);
                }
            }
            Attempt::Failed => {
                counter!("scheduler_calls_total", "outcome" => "failed").increment(1);
            }
        }
    }

    fn shut_down(&mut self) {
        self.rx.close();
        self.accept_pending();
        let n = self.queue.len();
        for entry in self.queue.drain() {
            entry.item.call.reject(SchedulerError::Shutdown);
        }
        self.publish();
        info!(target: "scheduler", rejected = n, "request scheduler shutting down");
    }

    fn publish(&self) {
        let window = self.usage.window();
        gauge!("scheduler_queue_depth").set(self.queue.len() as f64);
        gauge!("scheduler_window_tokens").set(window.tokens() as f64);
        self.status_tx.send_replace(Published {
            queue_depth: self.queue.len(),
            in_flight: self.in_flight,
            samples: window.samples().copied().collect(),
            backoff_until: self.backoff_until,
        });
    }
}
