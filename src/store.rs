use std::collections::HashMap;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{error, info};
use ulid::Ulid;

use crate::manager::ReservationError;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedTimeline = Arc<RwLock<Timeline>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    #[cfg(test)]
    FailNextBatches {
        batches: u32,
        response: oneshot::Sender<u32>,
    },
}

/// Owns the log. Blocks for the first append, drains whatever else is
/// already queued, and commits the whole batch with one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let (events, responders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    let result = wal.append_batch(&events);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("log append of {} records failed: {e}", events.len());
    }

    for tx in responders {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::FailNextBatches { batches, response } => {
            let _ = response.send(wal.fail_next_batches(batches));
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Apply a committed event to one timeline (caller holds its write lock).
/// Events touching several resources only apply their own entries.
fn apply_event(tl: &mut Timeline, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationCreated {
            id,
            resource_id,
            owner_id,
            span,
            created_at,
        } => {
            tl.insert(Reservation {
                id: *id,
                resource_id: *resource_id,
                owner_id: owner_id.clone(),
                span: *span,
                state: ReservationState::Active,
                created_at: *created_at,
            });
            index.insert(*id, *resource_id);
        }
        Event::ReservationRestored {
            id,
            resource_id,
            owner_id,
            span,
            state,
            created_at,
        } => {
            tl.insert(Reservation {
                id: *id,
                resource_id: *resource_id,
                owner_id: owner_id.clone(),
                span: *span,
                state: *state,
                created_at: *created_at,
            });
            index.insert(*id, *resource_id);
        }
        Event::ReservationCanceled { id, .. } => {
            tl.set_state(*id, ReservationState::Canceled);
        }
        Event::ReservationRescheduled { id, span, .. } => {
            if let Some(mut r) = tl.remove(*id) {
                r.span = *span;
                tl.insert(r);
            }
        }
        Event::SweepCompleted { completed, .. } => {
            for (rid, id) in completed {
                if *rid == tl.resource_id {
                    tl.set_state(*id, ReservationState::Completed);
                }
            }
        }
    }
}

/// Exclusive access to one resource's timeline.
///
/// While a transaction is open no other writer can touch the resource, so a
/// check made through it still holds when `ReservationStore::commit` runs.
pub struct TimelineTxn {
    _gate: OwnedRwLockReadGuard<()>,
    timeline: OwnedRwLockWriteGuard<Timeline>,
}

impl Deref for TimelineTxn {
    type Target = Timeline;

    fn deref(&self) -> &Timeline {
        &self.timeline
    }
}

impl DerefMut for TimelineTxn {
    fn deref_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }
}

/// Exclusive access to several timelines, locked in resource-id order.
pub struct MultiTxn {
    _gate: OwnedRwLockReadGuard<()>,
    timelines: Vec<OwnedRwLockWriteGuard<Timeline>>,
}

impl MultiTxn {
    pub fn timelines(&self) -> impl Iterator<Item = &Timeline> {
        self.timelines.iter().map(|g| &**g)
    }
}

/// Durable reservation table.
///
/// Each resource has its own timeline behind its own lock; every mutation
/// is logged (fsynced) before it is applied in memory. Lock order is always
/// compaction gate, then timelines in ascending resource id.
pub struct ReservationStore {
    timelines: DashMap<Ulid, SharedTimeline>,
    /// Reverse lookup: reservation id → resource id.
    index: DashMap<Ulid, Ulid>,
    /// Shared by writers, taken exclusively by compaction.
    gate: Arc<RwLock<()>>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl ReservationStore {
    /// Replay the log at `wal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let index = DashMap::new();
        let mut timelines: HashMap<Ulid, Timeline> = HashMap::new();
        for event in &events {
            for rid in event.resource_ids() {
                let tl = timelines.entry(rid).or_insert_with(|| Timeline::new(rid));
                apply_event(tl, event, &index);
            }
        }
        info!(
            "replayed {} log records ({} reservations) from {}",
            events.len(),
            index.len(),
            wal_path.display()
        );

        Ok(Self {
            timelines: timelines
                .into_iter()
                .map(|(id, tl)| (id, Arc::new(RwLock::new(tl))))
                .collect(),
            index,
            gate: Arc::new(RwLock::new(())),
            wal_tx,
        })
    }

    pub fn timeline(&self, resource_id: &Ulid) -> Option<SharedTimeline> {
        self.timelines.get(resource_id).map(|e| e.value().clone())
    }

    /// Resource ids with at least one reservation, ascending.
    pub fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.timelines.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn resource_of(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.index.get(reservation_id).map(|e| *e.value())
    }

    pub fn reservation_count(&self) -> usize {
        self.index.len()
    }

    /// Lock one resource's timeline for writing, creating it if needed.
    pub async fn begin(&self, resource_id: Ulid) -> TimelineTxn {
        let gate = self.gate.clone().read_owned().await;
        let tl = self
            .timelines
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(Timeline::new(resource_id))))
            .value()
            .clone();
        TimelineTxn {
            _gate: gate,
            timeline: tl.write_owned().await,
        }
    }

    /// Lock the timeline holding `reservation_id`.
    pub async fn begin_for(&self, reservation_id: Ulid) -> Result<TimelineTxn, ReservationError> {
        let resource_id = self
            .resource_of(&reservation_id)
            .ok_or(ReservationError::NotFound(reservation_id))?;
        Ok(self.begin(resource_id).await)
    }

    /// Lock several existing timelines at once. Unknown ids are skipped.
    pub async fn begin_many(&self, mut resource_ids: Vec<Ulid>) -> MultiTxn {
        resource_ids.sort();
        resource_ids.dedup();
        let gate = self.gate.clone().read_owned().await;
        let mut timelines = Vec::with_capacity(resource_ids.len());
        for rid in resource_ids {
            if let Some(tl) = self.timeline(&rid) {
                timelines.push(tl.write_owned().await);
            }
        }
        MultiTxn {
            _gate: gate,
            timelines,
        }
    }

    /// Log `event` durably, then apply it. Nothing is applied if the log
    /// write fails.
    pub async fn commit(&self, txn: &mut TimelineTxn, event: &Event) -> Result<(), ReservationError> {
        self.wal_append(event).await?;
        apply_event(&mut txn.timeline, event, &self.index);
        Ok(())
    }

    pub async fn commit_many(&self, txn: &mut MultiTxn, event: &Event) -> Result<(), ReservationError> {
        self.wal_append(event).await?;
        for tl in txn.timelines.iter_mut() {
            apply_event(tl, event, &self.index);
        }
        Ok(())
    }

    async fn wal_append(&self, event: &Event) -> Result<(), ReservationError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| ReservationError::StorageUnavailable("log writer shut down".into()))?;
        rx.await
            .map_err(|_| ReservationError::StorageUnavailable("log writer dropped response".into()))?
            .map_err(|e| ReservationError::StorageUnavailable(e.to_string()))
    }

    /// Rewrite the log as one snapshot record per reservation. Returns the
    /// number of records written.
    pub async fn compact(&self) -> Result<usize, ReservationError> {
        let _exclusive = self.gate.write().await;
        let mut events = Vec::new();
        for rid in self.resource_ids() {
            let Some(tl) = self.timeline(&rid) else {
                continue;
            };
            let guard = tl.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationRestored {
                id: r.id,
                resource_id: r.resource_id,
                owner_id: r.owner_id.clone(),
                span: r.span,
                state: r.state,
                created_at: r.created_at,
            }));
        }
        let written = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| ReservationError::StorageUnavailable("log writer shut down".into()))?;
        rx.await
            .map_err(|_| ReservationError::StorageUnavailable("log writer dropped response".into()))?
            .map_err(|e| ReservationError::StorageUnavailable(e.to_string()))?;
        Ok(written)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Make the next `batches` log writes fail. Returns how many injected
    /// failures were still pending.
    #[cfg(test)]
    pub(crate) async fn fail_next_log_writes(&self, batches: u32) -> u32 {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .wal_tx
            .send(WalCommand::FailNextBatches {
                batches,
                response: tx,
            })
            .await;
        rx.await.unwrap_or(0)
    }
}
