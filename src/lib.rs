pub mod clock;
pub mod config;
pub mod limits;
pub mod manager;
pub mod model;
pub mod notify;
pub mod observability;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod wal;
