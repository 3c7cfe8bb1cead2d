use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::manager::ReservationError;

/// Existence check the reservation core calls before admitting a booking.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn resource_exists(&self, id: Ulid) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The rooms a deployment starts with when none are configured.
pub fn default_rooms() -> Vec<Room> {
    [
        (1, "Blue", "A cozy room with blue walls."),
        (2, "Red", "A vibrant room with red walls."),
        (3, "Green", "A calming room with green walls."),
    ]
    .into_iter()
    .map(|(n, name, description)| Room {
        id: Ulid(n),
        name: name.into(),
        description: Some(description.into()),
    })
    .collect()
}

/// In-process room table.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<Ulid, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rooms(rooms: impl IntoIterator<Item = Room>) -> Result<Self, ReservationError> {
        let registry = Self::new();
        for room in rooms {
            registry.insert(room)?;
        }
        Ok(registry)
    }

    pub fn insert(&self, room: Room) -> Result<(), ReservationError> {
        if self.rooms.len() >= MAX_ROOMS {
            return Err(ReservationError::LimitExceeded("too many rooms"));
        }
        if room.name.len() > MAX_NAME_LEN {
            return Err(ReservationError::LimitExceeded("room name too long"));
        }
        if room.description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
            return Err(ReservationError::LimitExceeded("room description too long"));
        }
        self.rooms.insert(room.id, room);
        Ok(())
    }

    /// Rooms ordered by name.
    pub fn list(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }
}

#[async_trait]
impl ResourceRegistry for RoomRegistry {
    async fn resource_exists(&self, id: Ulid) -> bool {
        self.rooms.contains_key(&id)
    }
}
