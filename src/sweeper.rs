use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::clock::Clock;
use crate::manager::ReservationError;
use crate::model::*;
use crate::notify::{Notification, NotificationSink};
use crate::observability::*;
use crate::store::ReservationStore;

/// Outcome of one sweep cycle.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Reservations this cycle moved to Completed.
    pub completed: Vec<Reservation>,
    /// Countdown notifications sent.
    pub countdowns: usize,
}

/// Background task that completes reservations whose end time has passed.
pub struct Sweeper {
    store: Arc<ReservationStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<ReservationStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            sink,
            interval,
        }
    }

    /// Sweep every `interval` until `shutdown` fires. A failed cycle is
    /// logged and dropped; the next tick starts from scratch.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("sweeper running every {:?}", self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.sweep_once().await {
                        Ok(report) if !report.completed.is_empty() => {
                            info!("sweep completed {} reservations", report.completed.len());
                        }
                        Ok(_) => {}
                        Err(e) => {
                            metrics::counter!(SWEEP_FAILURES_TOTAL).increment(1);
                            error!("sweep cycle abandoned: {e}");
                        }
                    }
                    metrics::histogram!(SWEEP_DURATION_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                }
            }
        }
    }

    /// One cycle: complete everything expired at the clock's `now` in a
    /// single log record, then send countdowns for the rest.
    pub async fn sweep_once(&self) -> Result<SweepReport, ReservationError> {
        let now = self.clock.now();

        let mut candidates: Vec<(Ulid, Ulid)> = Vec::new();
        let mut running: Vec<(Ulid, Ulid, Ms)> = Vec::new();
        for rid in self.store.resource_ids() {
            let Some(tl) = self.store.timeline(&rid) else {
                continue;
            };
            let guard = tl.read().await;
            for r in guard.active() {
                if r.has_ended(now) {
                    candidates.push((rid, r.id));
                } else {
                    running.push((rid, r.id, r.span.end - now));
                }
            }
        }

        let completed = self.complete(now, candidates).await?;
        for r in &completed {
            debug!("reservation {} completed", r.id);
            self.sink.notify(
                r.resource_id,
                Notification::Completed {
                    reservation_id: r.id,
                },
            );
        }
        metrics::counter!(RESERVATIONS_COMPLETED_TOTAL).increment(completed.len() as u64);

        for &(rid, reservation_id, remaining_ms) in &running {
            self.sink.notify(
                rid,
                Notification::Countdown {
                    reservation_id,
                    remaining_ms,
                },
            );
        }

        Ok(SweepReport {
            completed,
            countdowns: running.len(),
        })
    }

    /// Conditional Active → Completed for `candidates`. Each one is checked
    /// again under the write locks; anything canceled since the scan is left
    /// alone.
    async fn complete(&self, now: Ms, candidates: Vec<(Ulid, Ulid)>) -> Result<Vec<Reservation>, ReservationError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut txn = self
            .store
            .begin_many(candidates.iter().map(|(rid, _)| *rid).collect())
            .await;

        let mut confirmed = Vec::with_capacity(candidates.len());
        let mut completed = Vec::with_capacity(candidates.len());
        for tl in txn.timelines() {
            for (rid, id) in candidates.iter().filter(|(rid, _)| *rid == tl.resource_id) {
                if let Some(r) = tl.get(*id)
                    && r.is_active()
                    && r.has_ended(now)
                {
                    confirmed.push((*rid, *id));
                    let mut done = r.clone();
                    done.state = ReservationState::Completed;
                    completed.push(done);
                }
            }
        }
        if confirmed.is_empty() {
            return Ok(Vec::new());
        }

        let event = Event::SweepCompleted {
            at: now,
            completed: confirmed,
        };
        self.store.commit_many(&mut txn, &event).await?;
        Ok(completed)
    }
}

/// Compact the log whenever more than `threshold` records were appended
/// since the last compaction.
pub async fn run_compactor(
    store: Arc<ReservationStore>,
    threshold: u64,
    check_every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(check_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if store.appends_since_compact().await <= threshold {
                    continue;
                }
                match store.compact().await {
                    Ok(records) => {
                        metrics::counter!(COMPACTIONS_TOTAL).increment(1);
                        info!("compacted log to {records} records");
                    }
                    Err(e) => error!("compaction failed: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use crate::clock::ManualClock;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Ulid, Notification)>>);

    impl NotificationSink for Recorder {
        fn notify(&self, resource_id: Ulid, notification: Notification) {
            self.0.lock().unwrap().push((resource_id, notification));
        }
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn seed(store: &ReservationStore, rid: Ulid, start: Ms, end: Ms) -> Ulid {
        let id = Ulid::new();
        let mut txn = store.begin(rid).await;
        let event = Event::ReservationCreated {
            id,
            resource_id: rid,
            owner_id: "alice".into(),
            span: Span::new(start, end),
            created_at: 0,
        };
        store.commit(&mut txn, &event).await.unwrap();
        id
    }

    #[tokio::test]
    async fn expired_reservations_complete_in_one_record() {
        let store = Arc::new(ReservationStore::open(test_wal_path("one_record.wal")).unwrap());
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(Recorder::default());
        let (r1, r2) = (Ulid::new(), Ulid::new());
        let a = seed(&store, r1, 0, HOUR_MS).await;
        let b = seed(&store, r2, 0, HOUR_MS).await;
        let c = seed(&store, r2, HOUR_MS, 3 * HOUR_MS).await;
        let before = store.appends_since_compact().await;

        let sweeper = Sweeper::new(store.clone(), clock.clone(), sink.clone(), Duration::from_secs(1));
        clock.set(HOUR_MS);
        let report = sweeper.sweep_once().await.unwrap();

        let mut done: Vec<Ulid> = report.completed.iter().map(|r| r.id).collect();
        done.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(done, expected);
        assert_eq!(report.countdowns, 1);
        assert_eq!(store.appends_since_compact().await, before + 1);

        let tl = store.timeline(&r2).unwrap();
        assert_eq!(tl.read().await.get(c).unwrap().state, ReservationState::Active);

        let sent = sink.0.lock().unwrap();
        assert!(sent.contains(&(
            r2,
            Notification::Countdown {
                reservation_id: c,
                remaining_ms: 2 * HOUR_MS
            }
        )));
        assert!(sent.contains(&(r1, Notification::Completed { reservation_id: a })));
    }

    #[tokio::test]
    async fn second_sweep_is_a_noop() {
        let store = Arc::new(ReservationStore::open(test_wal_path("idempotent.wal")).unwrap());
        let clock = Arc::new(ManualClock::new(0));
        let rid = Ulid::new();
        let id = seed(&store, rid, 0, HOUR_MS).await;
        let sweeper = Sweeper::new(store.clone(), clock.clone(), Arc::new(Recorder::default()), Duration::from_secs(1));

        clock.set(2 * HOUR_MS);
        assert_eq!(sweeper.sweep_once().await.unwrap().completed.len(), 1);
        let appends = store.appends_since_compact().await;
        assert!(sweeper.sweep_once().await.unwrap().completed.is_empty());
        assert_eq!(store.appends_since_compact().await, appends);

        let tl = store.timeline(&rid).unwrap();
        assert_eq!(tl.read().await.get(id).unwrap().state, ReservationState::Completed);
    }

    #[tokio::test]
    async fn nothing_expired_writes_nothing() {
        let store = Arc::new(ReservationStore::open(test_wal_path("nothing.wal")).unwrap());
        let clock = Arc::new(ManualClock::new(0));
        seed(&store, Ulid::new(), 0, HOUR_MS).await;
        let sweeper = Sweeper::new(store.clone(), clock, Arc::new(Recorder::default()), Duration::from_secs(1));

        let report = sweeper.sweep_once().await.unwrap();
        assert!(report.completed.is_empty());
        assert_eq!(report.countdowns, 1);
        assert_eq!(store.appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let store = Arc::new(ReservationStore::open(test_wal_path("run_cancel.wal")).unwrap());
        let clock = Arc::new(ManualClock::new(2 * HOUR_MS));
        let rid = Ulid::new();
        let id = seed(&store, rid, 0, HOUR_MS).await;
        let sweeper = Sweeper::new(store.clone(), clock, Arc::new(Recorder::default()), Duration::from_millis(10));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(shutdown.clone()));
        let tl = store.timeline(&rid).unwrap();
        for _ in 0..200 {
            if tl.read().await.get(id).unwrap().state == ReservationState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tl.read().await.get(id).unwrap().state, ReservationState::Completed);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn failed_cycle_changes_nothing() {
        let store = Arc::new(ReservationStore::open(test_wal_path("failed_cycle.wal")).unwrap());
        let clock = Arc::new(ManualClock::new(2 * HOUR_MS));
        let sink = Arc::new(Recorder::default());
        let rid = Ulid::new();
        let id = seed(&store, rid, 0, HOUR_MS).await;
        let sweeper = Sweeper::new(store.clone(), clock, sink.clone(), Duration::from_secs(1));

        store.fail_next_log_writes(1).await;
        assert!(matches!(
            sweeper.sweep_once().await,
            Err(ReservationError::StorageUnavailable(_))
        ));
        let tl = store.timeline(&rid).unwrap();
        assert_eq!(tl.read().await.get(id).unwrap().state, ReservationState::Active);
        assert!(sink.0.lock().unwrap().is_empty());

        assert_eq!(sweeper.sweep_once().await.unwrap().completed.len(), 1);
    }

    #[tokio::test]
    async fn run_recovers_after_failed_cycle() {
        let store = Arc::new(ReservationStore::open(test_wal_path("run_recovers.wal")).unwrap());
        let clock = Arc::new(ManualClock::new(2 * HOUR_MS));
        let rid = Ulid::new();
        let id = seed(&store, rid, 0, HOUR_MS).await;
        let sweeper = Sweeper::new(store.clone(), clock, Arc::new(Recorder::default()), Duration::from_millis(10));

        store.fail_next_log_writes(1).await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(shutdown.clone()));

        let tl = store.timeline(&rid).unwrap();
        for _ in 0..200 {
            if tl.read().await.get(id).unwrap().state == ReservationState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tl.read().await.get(id).unwrap().state, ReservationState::Completed);
        // The injected failure was used up by an earlier tick.
        assert_eq!(store.fail_next_log_writes(0).await, 0);
        assert!(!handle.is_finished());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let store = Arc::new(ReservationStore::open(test_wal_path("compactor.wal")).unwrap());
        let rid = Ulid::new();
        for i in 0..5 {
            seed(&store, rid, i * HOUR_MS, (i + 1) * HOUR_MS).await;
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_compactor(store.clone(), 3, Duration::from_millis(10), shutdown.clone()));
        for _ in 0..200 {
            if store.appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.appends_since_compact().await, 0);
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(store.reservation_count(), 5);
    }
}
