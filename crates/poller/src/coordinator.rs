use std::{sync::Arc, time::Duration};

use {
    ebike_flow_common::{Clock, SystemClock},
    tokio::{
        sync::{Mutex, watch},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    source::SnapshotSource,
    status::{Availability, CoordinatorStatus, PollState},
};

/// The connect module uploads new data about every five minutes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated,
    /// Transient failure; the previous snapshot is still published.
    Failed,
    Halted,
}

/// Why [`Coordinator::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Cancelled,
    NeedsReconfiguration,
}

/// Polls a [`SnapshotSource`] on a fixed interval and publishes the latest
/// snapshot through a `watch` channel.
pub struct Coordinator<S> {
    source: S,
    interval: Duration,
    clock: Arc<dyn Clock>,
    status: watch::Sender<CoordinatorStatus>,
    /// Serializes timer-driven and on-demand polls.
    poll_lock: Mutex<()>,
}

impl<S: SnapshotSource + 'static> Coordinator<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        let (status, _) = watch::channel(CoordinatorStatus::default());
        Self {
            source,
            interval,
            clock: Arc::new(SystemClock),
            status,
            poll_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    /// Run one poll cycle now, waiting for any cycle already in flight.
    pub async fn poll_now(&self) -> PollOutcome {
        let _guard = self.poll_lock.lock().await;
        self.poll_locked().await
    }

    /// One cycle; the caller holds `poll_lock`.
    async fn poll_locked(&self) -> PollOutcome {
        if self.status.borrow().state == PollState::Halted {
            return PollOutcome::Halted;
        }

        self.status.send_modify(|s| s.state = PollState::Polling);
        let result = self.source.fetch().await;

        match result {
            Ok(snapshot) => {
                let now = self.clock.now();
                let snapshot = Arc::new(snapshot);
                self.status.send_modify(|s| {
                    s.state = PollState::Idle;
                    s.availability = Availability::Available;
                    s.snapshot = Some(snapshot);
                    s.consecutive_failures = 0;
                    s.last_error = None;
                    s.last_success_at = Some(now);
                });
                debug!("poll succeeded");
                record_poll("success");
                PollOutcome::Updated
            },
            Err(e) if e.is_terminal() => {
                warn!(error = %e, "authentication lost, polling halted until the account is set up again");
                self.status.send_modify(|s| {
                    s.state = PollState::Halted;
                    s.availability = Availability::NeedsReconfiguration;
                    s.last_error = Some(e.to_string());
                });
                record_poll("halted");
                PollOutcome::Halted
            },
            Err(e) => {
                let mut failures = 0;
                self.status.send_modify(|s| {
                    s.state = PollState::Idle;
                    s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                    s.last_error = Some(e.to_string());
                    failures = s.consecutive_failures;
                });
                warn!(consecutive_failures = failures, error = %e, "poll failed, keeping last snapshot");
                record_poll("failure");
                PollOutcome::Failed
            },
        }
    }

    /// Poll on the configured interval until cancelled or halted.
    ///
    /// The first poll runs immediately. A cycle that overruns the interval
    /// delays the next tick instead of overlapping it.
    pub async fn run(&self, cancel: CancellationToken) -> PollExit {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "polling started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let _guard = tokio::select! {
                () = cancel.cancelled() => break,
                guard = self.poll_lock.lock() => guard,
            };
            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    // We hold the poll lock, so `Polling` belongs to the aborted
                    // fetch, which never published anything.
                    self.status.send_if_modified(|s| {
                        let was_polling = s.state == PollState::Polling;
                        if was_polling {
                            s.state = PollState::Idle;
                        }
                        was_polling
                    });
                    break;
                },
                outcome = self.poll_locked() => outcome,
            };

            if outcome == PollOutcome::Halted {
                return PollExit::NeedsReconfiguration;
            }
        }

        info!("polling cancelled");
        PollExit::Cancelled
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<PollExit> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(feature = "metrics")]
fn record_poll(outcome: &'static str) {
    metrics::counter!("ebike_flow_polls_total", "outcome" => outcome).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_poll(_outcome: &'static str) {}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use {
        async_trait::async_trait,
        chrono::{DateTime, Utc},
        ebike_flow_api::{ApiError, BikeSnapshot, snapshot},
        ebike_flow_oauth::AuthError,
        serde_json::json,
    };

    use super::*;

    /// Replays queued results, then keeps succeeding.
    #[derive(Default)]
    struct ScriptedSource {
        results: std::sync::Mutex<VecDeque<Result<BikeSnapshot, ApiError>>>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<BikeSnapshot, ApiError>>) -> Self {
            Self {
                results: std::sync::Mutex::new(results.into()),
                ..Self::default()
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl SnapshotSource for Arc<ScriptedSource> {
        async fn fetch(&self) -> Result<BikeSnapshot, ApiError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let next = self.results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(snap(call as f64)))
        }
    }

    fn snap(level: f64) -> BikeSnapshot {
        let profile = json!({"batteries": [{"batteryLevel": level}]});
        snapshot::combine("bike-1", &profile, None, fetched_at())
    }

    fn fetched_at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn timeout() -> ApiError {
        ApiError::Status {
            status: 504,
            body: "gateway timeout".into(),
        }
    }

    fn coordinator(source: &Arc<ScriptedSource>) -> Arc<Coordinator<Arc<ScriptedSource>>> {
        Arc::new(Coordinator::new(Arc::clone(source), DEFAULT_POLL_INTERVAL))
    }

    #[tokio::test]
    async fn starts_unavailable_and_publishes_first_snapshot() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snap(80.0))]));
        let coord = coordinator(&source);
        let mut rx = coord.subscribe();
        assert_eq!(coord.status().availability, Availability::Unavailable);
        assert!(coord.status().snapshot.is_none());

        assert_eq!(coord.poll_now().await, PollOutcome::Updated);
        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.availability, Availability::Available);
        assert_eq!(status.state, PollState::Idle);
        assert_eq!(status.snapshot.unwrap().battery_level, Some(80.0));
        assert!(status.last_success_at.is_some());
    }

    #[tokio::test]
    async fn failure_keeps_last_known_good_snapshot() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snap(80.0)), Err(timeout()), Err(timeout())]));
        let coord = coordinator(&source);

        coord.poll_now().await;
        let first = coord.status().snapshot.unwrap();

        assert_eq!(coord.poll_now().await, PollOutcome::Failed);
        assert_eq!(coord.poll_now().await, PollOutcome::Failed);
        let status = coord.status();
        assert!(Arc::ptr_eq(status.snapshot.as_ref().unwrap(), &first));
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.availability, Availability::Available);
        assert!(status.last_error.unwrap().contains("504"));

        assert_eq!(coord.poll_now().await, PollOutcome::Updated);
        let status = coord.status();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn failure_before_first_snapshot_stays_unavailable() {
        let source = Arc::new(ScriptedSource::new(vec![Err(ApiError::RateLimited)]));
        let coord = coordinator(&source);

        assert_eq!(coord.poll_now().await, PollOutcome::Failed);
        assert_eq!(coord.status().availability, Availability::Unavailable);
    }

    #[tokio::test]
    async fn terminal_error_halts_polling() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(snap(80.0)),
            Err(ApiError::Auth(AuthError::ReauthorizationRequired("refresh token was rejected".into()))),
        ]));
        let coord = coordinator(&source);

        coord.poll_now().await;
        assert_eq!(coord.poll_now().await, PollOutcome::Halted);
        let status = coord.status();
        assert_eq!(status.state, PollState::Halted);
        assert_eq!(status.availability, Availability::NeedsReconfiguration);
        // The last snapshot is still there for inspection.
        assert!(status.snapshot.is_some());

        assert_eq!(coord.poll_now().await, PollOutcome::Halted);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_on_interval() {
        let source = Arc::new(ScriptedSource::default());
        let coord = coordinator(&source);
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&coord).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(298)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), PollExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_poll_delays_next_tick() {
        let source = Arc::new(ScriptedSource::default().with_delay(Duration::from_secs(400)));
        let coord = coordinator(&source);
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&coord).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(350)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), PollExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_in_flight_poll_without_publishing() {
        let source = Arc::new(ScriptedSource::default().with_delay(Duration::from_secs(60)));
        let coord = coordinator(&source);
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&coord).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coord.status().state, PollState::Polling);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), PollExit::Cancelled);
        let status = coord.status();
        assert_eq!(status.state, PollState::Idle);
        assert!(status.snapshot.is_none());
        assert_eq!(status.availability, Availability::Unavailable);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_leaves_manual_poll_in_flight_untouched() {
        let source = Arc::new(ScriptedSource::default().with_delay(Duration::from_secs(60)));
        let coord = coordinator(&source);
        let manual = tokio::spawn({
            let coord = Arc::clone(&coord);
            async move { coord.poll_now().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coord.status().state, PollState::Polling);

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&coord).spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), PollExit::Cancelled);
        assert_eq!(coord.status().state, PollState::Polling);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        assert_eq!(manual.await.unwrap(), PollOutcome::Updated);
        let status = coord.status();
        assert_eq!(status.state, PollState::Idle);
        assert!(status.snapshot.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_authentication_is_lost() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snap(50.0)), Err(ApiError::AuthenticationLost)]));
        let coord = coordinator(&source);

        let exit = coord.run(CancellationToken::new()).await;
        assert_eq!(exit, PollExit::NeedsReconfiguration);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(coord.status().availability, Availability::NeedsReconfiguration);
    }

    #[tokio::test]
    async fn poll_now_waits_for_cycle_in_flight() {
        let source = Arc::new(ScriptedSource::default().with_delay(Duration::from_millis(20)));
        let coord = coordinator(&source);

        let (a, b) = tokio::join!(coord.poll_now(), coord.poll_now());
        assert_eq!((a, b), (PollOutcome::Updated, PollOutcome::Updated));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
