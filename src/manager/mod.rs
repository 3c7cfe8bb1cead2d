mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{merge_overlapping, subtract_intervals};
pub use error::ReservationError;

use std::sync::Arc;

use crate::clock::Clock;
use crate::limits::MAX_ACTIVE_PER_RESOURCE;
use crate::model::{HOUR_MS, Ms};
use crate::notify::NotificationSink;
use crate::registry::ResourceRegistry;
use crate::store::ReservationStore;

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Shortest reservation accepted (inclusive).
    pub min_duration_ms: Ms,
    pub max_active_per_resource: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: HOUR_MS,
            max_active_per_resource: MAX_ACTIVE_PER_RESOURCE,
        }
    }
}

/// The only writer of reservations besides the sweeper.
///
/// Admission for one resource runs entirely under that resource's store
/// transaction: overlap check, log append and apply happen with the write
/// lock held, so two overlapping requests can never both pass the check.
/// Requests for different resources take different locks and run in
/// parallel.
pub struct ReservationManager {
    store: Arc<ReservationStore>,
    registry: Arc<dyn ResourceRegistry>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    config: ManagerConfig,
}

impl ReservationManager {
    pub fn new(
        store: Arc<ReservationStore>,
        registry: Arc<dyn ResourceRegistry>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            sink,
            config,
        }
    }

    pub fn store(&self) -> &Arc<ReservationStore> {
        &self.store
    }

    async fn ensure_resource(&self, resource_id: ulid::Ulid) -> Result<(), ReservationError> {
        if self.registry.resource_exists(resource_id).await {
            Ok(())
        } else {
            Err(ReservationError::ResourceNotFound(resource_id))
        }
    }
}
