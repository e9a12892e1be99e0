//! Scheduled refresh of the whole catalog.
//!
//! A cycle moves `Idle -> Fetching -> Publishing -> Idle`. A cycle that starts while
//! another is still running is skipped, never queued. The published snapshot is
//! swapped in atomically, so readers always see either the previous or the new
//! snapshot in full.

use crate::api::Error;
use crate::catalog::{self, EntityError, FetchReport};
use crate::model::{Api, Snapshot};
use crate::session::SessionManager;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub poll_interval: Duration,
    /// Consecutive failed cycles before `refresh` returns `Error::UpdateFailed`.
    pub failure_threshold: u32,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            poll_interval: DEFAULT_POLL_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl CoordinatorOptions {
    /// Out-of-range values are clamped, with a warning.
    pub fn new(poll_interval: Duration, failure_threshold: u32) -> Self {
        let clamped = poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        if clamped != poll_interval {
            log::warn!(
                "Poll interval of {}s is out of range, using {}s",
                poll_interval.as_secs(),
                clamped.as_secs()
            );
        }
        if failure_threshold == 0 {
            log::warn!("Failure threshold must be at least 1, using 1");
        }

        CoordinatorOptions {
            poll_interval: clamped,
            failure_threshold: failure_threshold.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Fetching,
    Publishing,
}

const IDLE: u8 = 0;
const FETCHING: u8 = 1;
const PUBLISHING: u8 = 2;

impl Phase {
    fn from_u8(raw: u8) -> Phase {
        match raw {
            FETCHING => Phase::Fetching,
            PUBLISHING => Phase::Publishing,
            _ => Phase::Idle,
        }
    }
}

/// Returns the coordinator to `Idle` however the cycle ends, cancellation included.
struct CycleGuard<'a>(&'a AtomicU8);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::Release);
    }
}

/// What subscribers are told at the end of every cycle that ran.
#[derive(Debug, Clone)]
pub enum Update {
    Published(Arc<Snapshot>),
    Failed {
        error: Error,
        consecutive_failures: u32,
    },
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Published {
        snapshot: Arc<Snapshot>,
        /// Entities left out of `snapshot`.
        errors: Vec<EntityError>,
    },
    /// Another cycle was already running.
    Skipped,
    /// The cycle failed; the previous snapshot is still current.
    Failed(Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub phase: Phase,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_partial_errors: usize,
    pub last_published: Option<DateTime<Utc>>,
    pub token_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&Update) + Send + Sync>;

#[derive(Default)]
struct Health {
    consecutive_failures: u32,
    last_error: Option<Error>,
    last_partial_errors: usize,
}

pub struct Coordinator {
    session: Arc<SessionManager>,
    api: Api,
    options: CoordinatorOptions,
    phase: AtomicU8,
    snapshot: ArcSwap<Snapshot>,
    health: Mutex<Health>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl Coordinator {
    pub fn new(session: Arc<SessionManager>, api: Api, options: CoordinatorOptions) -> Self {
        Coordinator {
            session,
            api,
            options,
            phase: AtomicU8::new(IDLE),
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            health: Mutex::new(Health::default()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> CoordinatorOptions {
        self.options
    }

    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for every future `Update`. Callbacks run on the polling
    /// task and must not block.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(subscription, _)| *subscription != id);
    }

    fn notify(&self, update: &Update) {
        /* callbacks may subscribe themselves, so they run outside the lock */
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();

        for subscriber in subscribers {
            subscriber(update);
        }
    }

    /// The last published snapshot; empty and without a timestamp before the first one.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn status(&self) -> Status {
        let health = self.health();
        Status {
            phase: self.phase(),
            consecutive_failures: health.consecutive_failures,
            last_error: health.last_error.as_ref().map(ToString::to_string),
            last_partial_errors: health.last_partial_errors,
            last_published: self.snapshot.load().timestamp,
            token_valid: self.session.has_valid_token(),
        }
    }

    async fn fetch(&self) -> Result<FetchReport, Error> {
        let token = self.session.valid_token().await?;

        match catalog::fetch_snapshot(&self.api, &token).await {
            Err(error) if error.is_auth() => {
                self.session.invalidate(&token);
                Err(error)
            }
            result => result,
        }
    }

    fn publish(&self, report: FetchReport) -> RefreshOutcome {
        self.phase.store(PUBLISHING, Ordering::Release);

        let snapshot = Arc::new(report.snapshot);
        self.snapshot.store(Arc::clone(&snapshot));
        {
            let mut health = self.health();
            health.consecutive_failures = 0;
            health.last_error = None;
            health.last_partial_errors = report.errors.len();
        }

        if !report.errors.is_empty() {
            log::warn!(
                "Published partial snapshot, {} entities unavailable",
                report.errors.len()
            );
        }
        self.notify(&Update::Published(Arc::clone(&snapshot)));

        RefreshOutcome::Published {
            snapshot,
            errors: report.errors,
        }
    }

    fn fail(&self, error: Error) -> Result<RefreshOutcome, Error> {
        let failures = {
            let mut health = self.health();
            health.consecutive_failures += 1;
            health.last_error = Some(error.clone());
            health.consecutive_failures
        };
        log::error!("Update failed ({} in a row): {}", failures, error);

        self.notify(&Update::Failed {
            error: error.clone(),
            consecutive_failures: failures,
        });

        if failures >= self.options.failure_threshold {
            Err(Error::UpdateFailed {
                failures,
                last: Box::new(error),
            })
        } else {
            Ok(RefreshOutcome::Failed(error))
        }
    }

    /// Run one cycle now.
    ///
    /// A failed cycle keeps the previous snapshot. It is returned as
    /// `RefreshOutcome::Failed` until `failure_threshold` cycles in a row have
    /// failed, then as `Err(Error::UpdateFailed)`.
    pub async fn refresh(&self) -> Result<RefreshOutcome, Error> {
        if self
            .phase
            .compare_exchange(IDLE, FETCHING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Previous update still running, skipping this one");
            return Ok(RefreshOutcome::Skipped);
        }
        let _cycle = CycleGuard(&self.phase);

        log::debug!("Starting update");
        match self.fetch().await {
            Ok(report) => Ok(self.publish(report)),
            Err(error) => self.fail(error),
        }
    }

    /// Run the initial cycle; any failure is an error so setup can report "not ready".
    pub async fn first_refresh(&self) -> Result<Arc<Snapshot>, Error> {
        match self.refresh().await? {
            RefreshOutcome::Published { snapshot, .. } => Ok(snapshot),
            RefreshOutcome::Failed(error) => Err(error),
            RefreshOutcome::Skipped => Err(Error::Internal(String::from(
                "first update overlapped a running one",
            ))),
        }
    }

    /// Poll every `poll_interval` until `cancel` fires.
    ///
    /// Each tick runs its cycle on a task of its own, so a slow cycle makes the next
    /// tick observe `Fetching` and skip. Cancellation abandons in-flight cycles; the
    /// returned task ends once every cycle it started has been torn down.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.options.poll_interval;
        /* setup already ran the first cycle when a snapshot exists */
        let start = match self.snapshot.load().timestamp {
            Some(_) => Instant::now() + period,
            None => Instant::now(),
        };

        tokio::spawn(async move {
            let cycles = TaskTracker::new();
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            log::info!("Polling every {}s", period.as_secs());
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let coordinator = Arc::clone(&self);
                        let cancel = cancel.clone();
                        cycles.spawn(async move {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    log::debug!("Update abandoned on shutdown");
                                }
                                result = coordinator.refresh() => {
                                    if let Err(e) = result {
                                        log::error!("{}", e);
                                    }
                                }
                            }
                        });
                    }
                }
            }

            cycles.close();
            cycles.wait().await;
            log::info!("Polling stopped");
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn poll_interval_is_clamped() {
        let options = CoordinatorOptions::new(Duration::from_secs(5), 3);
        assert_eq!(MIN_POLL_INTERVAL, options.poll_interval);

        let options = CoordinatorOptions::new(Duration::from_secs(7200), 3);
        assert_eq!(MAX_POLL_INTERVAL, options.poll_interval);

        let options = CoordinatorOptions::new(Duration::from_secs(90), 0);
        assert_eq!(Duration::from_secs(90), options.poll_interval);
        assert_eq!(1, options.failure_threshold);
    }

    #[test]
    fn cycle_guard_resets_phase() {
        let phase = AtomicU8::new(FETCHING);
        {
            let _cycle = CycleGuard(&phase);
            phase.store(PUBLISHING, Ordering::Release);
        }
        assert_eq!(Phase::Idle, Phase::from_u8(phase.load(Ordering::Acquire)));
    }
}
