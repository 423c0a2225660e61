//! Client-side service registry core.
//!
//! Tracks the endpoints this process registered, the service keys it watches
//! and the last provider list pushed for each, and mirrors the provider lists
//! into a disk cache that several processes may share.

pub mod backend;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod matcher;
pub mod registry;

pub use backend::{Backend, NoopBackend};
pub use cache::CacheStore;
pub use config::{CacheLocation, RegistryConfig};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use listener::{ListenerHandle, NotifyListener};
pub use matcher::{DefaultMatcher, UrlMatcher};
pub use registry::{filter_empty, Registry, RegistryBuilder};
