//! # Distributed Sync
//!
//! Cross-instance propagation of cache writes over the backing store's
//! pub/sub channel. See [`bus::DistributedSyncBus`].

pub mod bus;
pub mod message;

pub use bus::DistributedSyncBus;
pub use message::{SyncMessage, SyncMessageType};
