//! Disk cache of notified provider lists.
//!
//! The file is a flat `service key = space separated urls` properties file
//! guarded by a `<file>.lock` sidecar so several processes can share it.

pub mod lock;
pub mod properties;
pub mod store;

pub use properties::Snapshot;
pub use store::{load_snapshot, CacheStore};
