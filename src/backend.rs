//! Coordination backend seam.
//!
//! The registry keeps local state and the disk cache; a [`Backend`] carries
//! registrations and subscriptions to the remote directory service and pushes
//! provider lists back through [`Registry::notify`].

use crate::endpoint::Endpoint;
use crate::registry::Registry;

pub trait Backend: Send + Sync {
    fn register(&self, _url: &Endpoint) -> anyhow::Result<()> {
        Ok(())
    }

    fn unregister(&self, _url: &Endpoint) -> anyhow::Result<()> {
        Ok(())
    }

    /// Starts watching `url`. Implementations deliver at least one
    /// [`Registry::notify`] for it before returning; `Registry::lookup`
    /// relies on that handshake. Storing a clone of `registry` inside the
    /// backend keeps the registry alive forever.
    fn subscribe(&self, _registry: &Registry, _url: &Endpoint) -> anyhow::Result<()> {
        Ok(())
    }

    fn unsubscribe(&self, _url: &Endpoint) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Backend that accepts everything and never pushes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl Backend for NoopBackend {}
