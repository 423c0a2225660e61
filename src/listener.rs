use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::endpoint::Endpoint;

/// Receives the latest endpoint list for one category of a subscription.
pub trait NotifyListener: Send + Sync {
    fn notify(&self, urls: &[Endpoint]) -> anyhow::Result<()>;
}

impl<F> NotifyListener for F
where
    F: Fn(&[Endpoint]) -> anyhow::Result<()> + Send + Sync,
{
    fn notify(&self, urls: &[Endpoint]) -> anyhow::Result<()> {
        self(urls)
    }
}

/// Shared listener compared by identity, so the same `Arc` is only
/// subscribed once per url.
#[derive(Clone)]
pub struct ListenerHandle(Arc<dyn NotifyListener>);

impl ListenerHandle {
    pub fn new(listener: Arc<dyn NotifyListener>) -> Self {
        Self(listener)
    }

    pub fn notify(&self, urls: &[Endpoint]) -> anyhow::Result<()> {
        self.0.notify(urls)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl From<Arc<dyn NotifyListener>> for ListenerHandle {
    fn from(listener: Arc<dyn NotifyListener>) -> Self {
        Self(listener)
    }
}

impl PartialEq for ListenerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ListenerHandle {}

impl Hash for ListenerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerHandle({:#x})", self.addr())
    }
}
