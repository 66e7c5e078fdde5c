//! Render-quiescence coordinator.
//!
//! Decides the single instant at which a dashboard is visually settled.
//! Widgets announce "still rendering" with
//! [`request_async_render`](RenderCoordinatorHandle::request_async_render)
//! and "done" with
//! [`resolve_async_render`](RenderCoordinatorHandle::resolve_async_render),
//! keyed by component id. Three layered timers bound the wait:
//!
//! - **requested** (A): how long to wait for the first widget to announce
//!   itself before concluding nothing renders asynchronously;
//! - **resolved** (B): debounce after the outstanding set drains, in case a
//!   widget re-requests right after the last resolve;
//! - **max** (C): absolute ceiling from cycle start, after which resolution
//!   is forced whatever is still outstanding.
//!
//! The coordinator runs as its own tokio task with private state. It never
//! fails and emits exactly one `RenderResolved` per cycle, unless the cycle
//! is superseded by a newer one first.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::event::{DashboardEvent, EventBus, EventKind};

/// Timeouts of the render coordinator.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dashboard_core::RenderConfig;
///
/// let config = RenderConfig {
///     max_timeout: Duration::from_secs(60),
///     ..RenderConfig::default()
/// };
/// assert_eq!(config.async_render_requested_timeout, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Grace window for the first async render request.
    ///
    /// Default: 2 seconds.
    pub async_render_requested_timeout: Duration,

    /// Debounce after the outstanding set becomes empty.
    ///
    /// Default: 2 seconds.
    pub async_render_resolved_timeout: Duration,

    /// Absolute ceiling measured from cycle start. A value too large to
    /// add to the current instant (e.g. `Duration::MAX`) means no ceiling.
    ///
    /// Default: 20 minutes.
    pub max_timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            async_render_requested_timeout: Duration::from_secs(2),
            async_render_resolved_timeout: Duration::from_secs(2),
            max_timeout: Duration::from_secs(20 * 60),
        }
    }
}

/// Observable coordinator state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStatus {
    /// Most recently started cycle, `None` before the first one.
    pub cycle: Option<u64>,
    /// Component ids still rendering, sorted.
    pub outstanding: Vec<String>,
    /// Whether `cycle` has resolved.
    pub resolved: bool,
    /// Whether resolution was forced by the max timeout.
    pub forced: bool,
}

#[derive(Debug)]
enum RenderMessage {
    StartCycle(u64),
    Request(String),
    Resolve(String),
}

/// Per-cycle state. Dropping it cancels all of its timers.
#[derive(Debug)]
struct Cycle {
    id: u64,
    /// Outstanding render tokens with their latest request time.
    tokens: HashMap<String, Instant>,
    seen_request: bool,
    requested_deadline: Option<Instant>,
    resolved_deadline: Option<Instant>,
    max_deadline: Option<Instant>,
}

struct Coordinator {
    config: RenderConfig,
    bus: EventBus,
    status: watch::Sender<RenderStatus>,
    cycle: Option<Cycle>,
}

impl Coordinator {
    fn deadlines(&self) -> (Option<Instant>, Option<Instant>, Option<Instant>) {
        match &self.cycle {
            Some(c) => (c.requested_deadline, c.resolved_deadline, c.max_deadline),
            None => (None, None, None),
        }
    }

    fn handle(&mut self, msg: RenderMessage) {
        match msg {
            RenderMessage::StartCycle(id) => self.start_cycle(id),
            RenderMessage::Request(component_id) => self.request(component_id),
            RenderMessage::Resolve(component_id) => self.resolve(&component_id),
        }
    }

    fn start_cycle(&mut self, id: u64) {
        if let Some(previous) = self.cycle.take() {
            tracing::debug!(
                cycle = previous.id,
                outstanding = previous.tokens.len(),
                "render cycle superseded"
            );
        }
        let now = Instant::now();
        self.cycle = Some(Cycle {
            id,
            tokens: HashMap::new(),
            seen_request: false,
            requested_deadline: deadline_after(now, self.config.async_render_requested_timeout),
            resolved_deadline: None,
            max_deadline: deadline_after(now, self.config.max_timeout),
        });
        tracing::info!(cycle = id, "render requested");
        self.bus
            .publish(DashboardEvent::system(EventKind::RenderRequested { cycle: id }));
        self.publish_status();
    }

    fn request(&mut self, component_id: String) {
        let Some(cycle) = self.cycle.as_mut() else {
            tracing::debug!(%component_id, "async render request outside a cycle ignored");
            return;
        };
        let now = Instant::now();
        if cycle.tokens.is_empty() {
            cycle.requested_deadline =
                deadline_after(now, self.config.async_render_requested_timeout);
        }
        cycle.seen_request = true;
        cycle.resolved_deadline = None;
        let refreshed = cycle.tokens.insert(component_id.clone(), now).is_some();
        tracing::debug!(
            cycle = cycle.id,
            %component_id,
            refreshed,
            outstanding = cycle.tokens.len(),
            "async render requested"
        );
        self.publish_status();
    }

    fn resolve(&mut self, component_id: &str) {
        let Some(cycle) = self.cycle.as_mut() else {
            tracing::debug!(%component_id, "async render resolve outside a cycle ignored");
            return;
        };
        let Some(requested_at) = cycle.tokens.remove(component_id) else {
            tracing::debug!(cycle = cycle.id, %component_id, "unmatched async render resolve");
            return;
        };
        tracing::debug!(
            cycle = cycle.id,
            %component_id,
            took_ms = requested_at.elapsed().as_millis() as u64,
            outstanding = cycle.tokens.len(),
            "async render resolved"
        );
        if cycle.tokens.is_empty() {
            cycle.resolved_deadline =
                deadline_after(Instant::now(), self.config.async_render_resolved_timeout);
        }
        self.publish_status();
    }

    fn on_requested_timeout(&mut self) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };
        cycle.requested_deadline = None;
        if !cycle.seen_request && cycle.tokens.is_empty() {
            self.finish(false);
        }
    }

    fn on_resolved_timeout(&mut self) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };
        cycle.resolved_deadline = None;
        if cycle.tokens.is_empty() {
            self.finish(false);
        }
    }

    fn finish(&mut self, forced: bool) {
        let Some(cycle) = self.cycle.take() else {
            return;
        };
        let mut outstanding: Vec<String> = cycle.tokens.into_keys().collect();
        outstanding.sort();
        if forced {
            tracing::warn!(
                cycle = cycle.id,
                ?outstanding,
                "render resolution forced by max timeout"
            );
        } else {
            tracing::info!(cycle = cycle.id, "render resolved");
        }
        self.bus.publish(DashboardEvent::system(EventKind::RenderResolved {
            cycle: cycle.id,
            forced,
            outstanding: outstanding.clone(),
        }));
        self.status.send_replace(RenderStatus {
            cycle: Some(cycle.id),
            outstanding,
            resolved: true,
            forced,
        });
    }

    fn publish_status(&self) {
        let Some(cycle) = &self.cycle else {
            return;
        };
        let mut outstanding: Vec<String> = cycle.tokens.keys().cloned().collect();
        outstanding.sort();
        self.status.send_replace(RenderStatus {
            cycle: Some(cycle.id),
            outstanding,
            resolved: false,
            forced: false,
        });
    }
}

/// `None` when the timeout is too large to represent; such a timer never fires.
fn deadline_after(now: Instant, timeout: Duration) -> Option<Instant> {
    now.checked_add(timeout)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs the coordinator until every handle has been dropped.
async fn run_coordinator(
    mut coordinator: Coordinator,
    mut rx: mpsc::UnboundedReceiver<RenderMessage>,
) {
    loop {
        let (requested, resolved, max) = coordinator.deadlines();
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(msg) => coordinator.handle(msg),
                None => break,
            },
            () = sleep_until_opt(max) => coordinator.finish(true),
            () = sleep_until_opt(resolved) => coordinator.on_resolved_timeout(),
            () = sleep_until_opt(requested) => coordinator.on_requested_timeout(),
        }
    }
    tracing::debug!("render coordinator stopped");
}

/// Spawn a coordinator task on the current tokio runtime.
pub fn spawn_coordinator(config: RenderConfig, bus: EventBus) -> RenderCoordinatorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(RenderStatus::default());
    let coordinator = Coordinator {
        config,
        bus,
        status: status_tx,
        cycle: None,
    };
    tokio::spawn(run_coordinator(coordinator, rx));
    RenderCoordinatorHandle {
        sender: tx,
        status: status_rx,
        next_cycle: Arc::new(AtomicU64::new(1)),
    }
}

/// Cloneable handle widgets and handlers use to reach the coordinator.
///
/// All signalling methods are non-blocking and infallible; once the
/// coordinator task is gone they are silently dropped.
#[derive(Debug, Clone)]
pub struct RenderCoordinatorHandle {
    sender: mpsc::UnboundedSender<RenderMessage>,
    status: watch::Receiver<RenderStatus>,
    next_cycle: Arc<AtomicU64>,
}

impl RenderCoordinatorHandle {
    /// Start a new render cycle, cancelling the previous one. Returns the
    /// new cycle id.
    pub fn request_render(&self) -> u64 {
        let cycle = self.next_cycle.fetch_add(1, Ordering::SeqCst);
        self.send(RenderMessage::StartCycle(cycle));
        cycle
    }

    /// Register or refresh the render token of `component_id`.
    pub fn request_async_render(&self, component_id: impl Into<String>) {
        self.send(RenderMessage::Request(component_id.into()));
    }

    /// Drop the render token of `component_id`. Unknown ids are ignored.
    pub fn resolve_async_render(&self, component_id: impl Into<String>) {
        self.send(RenderMessage::Resolve(component_id.into()));
    }

    /// Latest published state.
    pub fn status(&self) -> RenderStatus {
        self.status.borrow().clone()
    }

    /// Wait until `cycle` resolves or is superseded by a newer cycle.
    ///
    /// Returns the status observed at that point. If the coordinator task
    /// has stopped, returns the last published status.
    pub async fn wait_resolved(&self, cycle: u64) -> RenderStatus {
        let mut rx = self.status.clone();
        let done = rx
            .wait_for(|s| match s.cycle {
                Some(c) if c == cycle => s.resolved,
                Some(c) => c > cycle,
                None => false,
            })
            .await
            .map(|s| s.clone());
        match done {
            Ok(status) => status,
            Err(_) => rx.borrow().clone(),
        }
    }

    fn send(&self, msg: RenderMessage) {
        if self.sender.send(msg).is_err() {
            tracing::debug!("render coordinator is gone; message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn spawn() -> (RenderCoordinatorHandle, broadcast::Receiver<DashboardEvent>) {
        spawn_with(RenderConfig::default())
    }

    fn spawn_with(
        config: RenderConfig,
    ) -> (RenderCoordinatorHandle, broadcast::Receiver<DashboardEvent>) {
        let bus = EventBus::new(64);
        let rx = bus.subscribe();
        (spawn_coordinator(config, bus), rx)
    }

    /// Next `RenderResolved` payload, skipping other events.
    async fn next_resolved(
        rx: &mut broadcast::Receiver<DashboardEvent>,
    ) -> (u64, bool, Vec<String>) {
        loop {
            let event = rx.recv().await.expect("bus open");
            if let EventKind::RenderResolved {
                cycle,
                forced,
                outstanding,
            } = event.kind
            {
                assert_eq!(event.correlation_id, None);
                return (cycle, forced, outstanding);
            }
        }
    }

    fn assert_near(actual: Duration, expected: Duration) {
        let slack = Duration::from_millis(20);
        assert!(
            actual >= expected && actual <= expected + slack,
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_after_requested_timeout_when_nothing_renders() {
        let (handle, mut rx) = spawn();
        let start = Instant::now();

        let cycle = handle.request_render();
        let first = rx.recv().await.expect("requested");
        assert_eq!(first.kind, EventKind::RenderRequested { cycle });

        let (resolved_cycle, forced, outstanding) = next_resolved(&mut rx).await;

        assert_eq!(resolved_cycle, cycle);
        assert!(!forced);
        assert!(outstanding.is_empty());
        assert_near(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_after_resolved_timeout_once_set_drains() {
        let (handle, mut rx) = spawn();
        let start = Instant::now();

        handle.request_render();
        handle.request_async_render("w1");
        handle.request_async_render("w2");
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.resolve_async_render("w1");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.status().resolved, "w2 still outstanding");
        handle.resolve_async_render("w2");

        let (_, forced, _) = next_resolved(&mut rx).await;

        assert!(!forced);
        assert_near(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn re_request_during_debounce_cancels_resolution() {
        let (handle, mut rx) = spawn();
        let start = Instant::now();

        handle.request_render();
        handle.request_async_render("w");
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.resolve_async_render("w");
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.request_async_render("w");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.status().resolved);
        handle.resolve_async_render("w");

        next_resolved(&mut rx).await;

        assert_near(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_widget_is_forced_at_max_timeout() {
        let (handle, mut rx) = spawn();
        let start = Instant::now();

        let cycle = handle.request_render();
        handle.request_async_render("stuck");
        handle.request_async_render("fine");
        handle.resolve_async_render("fine");
        // `fine` draining first must not resolve while `stuck` is pending.
        handle.request_async_render("stuck");

        let (resolved_cycle, forced, outstanding) = next_resolved(&mut rx).await;

        assert_eq!(resolved_cycle, cycle);
        assert!(forced);
        assert_eq!(outstanding, vec!["stuck".to_owned()]);
        assert_near(start.elapsed(), Duration::from_secs(20 * 60));
        let status = handle.wait_resolved(cycle).await;
        assert!(status.resolved && status.forced);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_requests_and_resolves_are_idempotent() {
        let (handle, mut rx) = spawn();
        let start = Instant::now();

        handle.request_render();
        handle.request_async_render("w");
        handle.request_async_render("w");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status().outstanding, vec!["w".to_owned()]);

        handle.resolve_async_render("w");
        handle.resolve_async_render("w");
        handle.resolve_async_render("never-requested");

        next_resolved(&mut rx).await;
        assert_near(start.elapsed(), Duration::from_millis(2010));
    }

    #[tokio::test(start_paused = true)]
    async fn new_cycle_cancels_the_previous_one() {
        let (handle, mut rx) = spawn();

        let first = handle.request_render();
        handle.request_async_render("w");
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = handle.request_render();

        let (cycle, forced, _) = next_resolved(&mut rx).await;

        assert_eq!(cycle, second);
        assert!(!forced, "old token was discarded with its cycle");
        assert_ne!(first, second);
        let status = handle.wait_resolved(first).await;
        assert_eq!(status.cycle, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn signals_outside_a_cycle_are_ignored() {
        let (handle, _rx) = spawn();

        handle.request_async_render("w");
        handle.resolve_async_render("w");
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(handle.status(), RenderStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_resolution_per_cycle() {
        let (handle, mut rx) = spawn();

        handle.request_render();
        next_resolved(&mut rx).await;
        // Late traffic after resolution belongs to no cycle.
        handle.request_async_render("late");
        handle.resolve_async_render("late");
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_max_timeout_still_resolves_on_requested_timeout() {
        let (handle, mut rx) = spawn_with(RenderConfig {
            max_timeout: Duration::MAX,
            ..RenderConfig::default()
        });
        let start = Instant::now();

        let cycle = handle.request_render();
        let (resolved_cycle, forced, _) = next_resolved(&mut rx).await;

        assert_eq!(resolved_cycle, cycle);
        assert!(!forced);
        assert_near(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeouts_leave_the_coordinator_responsive() {
        let (handle, _rx) = spawn_with(RenderConfig {
            async_render_requested_timeout: Duration::MAX,
            async_render_resolved_timeout: Duration::MAX,
            max_timeout: Duration::MAX,
        });

        let first = handle.request_render();
        handle.request_async_render("w");
        handle.resolve_async_render("w");
        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(handle.status().cycle, Some(first));
        assert!(!handle.status().resolved);

        // The task survived: a new cycle is still accepted and tracked.
        let second = handle.request_render();
        handle.request_async_render("again");
        tokio::time::sleep(Duration::from_millis(1)).await;
        let status = handle.status();
        assert_eq!(status.cycle, Some(second));
        assert_eq!(status.outstanding, vec!["again".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeouts_resolve_each_cycle_exactly_once() {
        let (handle, mut rx) = spawn_with(RenderConfig {
            async_render_requested_timeout: Duration::ZERO,
            async_render_resolved_timeout: Duration::ZERO,
            max_timeout: Duration::ZERO,
        });
        let start = Instant::now();

        let cycle = handle.request_render();
        let status = handle.wait_resolved(cycle).await;
        let (resolved_cycle, _, _) = next_resolved(&mut rx).await;

        assert!(status.resolved);
        assert_eq!(resolved_cycle, cycle);
        assert_near(start.elapsed(), Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(
            std::iter::from_fn(|| rx.try_recv().ok())
                .all(|e| !matches!(e.kind, EventKind::RenderResolved { .. }))
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RenderConfig =
            serde_json::from_str(r#"{"max_timeout": {"secs": 60, "nanos": 0}}"#)
                .expect("deserialize");
        assert_eq!(config.max_timeout, Duration::from_secs(60));
        assert_eq!(
            config.async_render_resolved_timeout,
            RenderConfig::default().async_render_resolved_timeout
        );
    }
}
