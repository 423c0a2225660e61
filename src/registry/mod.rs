//! Registry core: local registration and subscription state, the notify
//! protocol and the lookup facade, backed by a [`CacheStore`].

mod notify;
pub mod state;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use log::{debug, warn};

use crate::backend::{Backend, NoopBackend};
use crate::cache::{CacheStore, Snapshot};
use crate::config::RegistryConfig;
use crate::endpoint::Endpoint;
use crate::listener::{ListenerHandle, NotifyListener};
use crate::matcher::{DefaultMatcher, UrlMatcher};
use crate::{Error, Result};

pub use notify::filter_empty;
pub use state::{CategoryMap, RegistryState};

/// Cloneable handle to one registry instance.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

struct Inner {
    url: Endpoint,
    config: RegistryConfig,
    state: RegistryState,
    store: CacheStore,
    matcher: Arc<dyn UrlMatcher>,
    backend: Arc<dyn Backend>,
}

pub struct RegistryBuilder {
    url: Endpoint,
    config: RegistryConfig,
    matcher: Arc<dyn UrlMatcher>,
    backend: Arc<dyn Backend>,
}

impl RegistryBuilder {
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn matcher(mut self, matcher: Arc<dyn UrlMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    /// Fails with `InvalidArgument` for an invalid registry url or a cache
    /// directory that cannot be created.
    pub fn build(self) -> Result<Registry> {
        self.url.validate("registry")?;
        let cache_file = self.config.resolve_cache_file(self.url.host());
        let store = CacheStore::open(
            cache_file,
            self.config.sync_save,
            self.config.save_queue_capacity,
        )?;
        debug!(
            "opened registry {} with cache file {:?}",
            self.url,
            store.file()
        );
        Ok(Registry {
            inner: Arc::new(Inner {
                url: self.url,
                config: self.config,
                state: RegistryState::new(),
                store,
                matcher: self.matcher,
                backend: self.backend,
            }),
        })
    }
}

impl Registry {
    /// Starts a builder whose configuration comes from the url parameters.
    pub fn builder(url: Endpoint) -> RegistryBuilder {
        let config = RegistryConfig::from_url(&url);
        RegistryBuilder {
            url,
            config,
            matcher: Arc::new(DefaultMatcher),
            backend: Arc::new(NoopBackend),
        }
    }

    pub fn new(url: Endpoint, config: RegistryConfig) -> Result<Self> {
        Self::builder(url).config(config).build()
    }

    pub fn url(&self) -> &Endpoint {
        &self.inner.url
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn register(&self, url: &Endpoint) -> Result<()> {
        url.validate("register")?;
        debug!("register: {url}");
        self.inner.state.add_registered(url.clone());
        self.inner.backend.register(url).map_err(Error::Backend)
    }

    pub fn unregister(&self, url: &Endpoint) -> Result<()> {
        url.validate("unregister")?;
        debug!("unregister: {url}");
        self.inner.state.remove_registered(url);
        self.inner.backend.unregister(url).map_err(Error::Backend)
    }

    pub fn subscribe(&self, url: &Endpoint, listener: Arc<dyn NotifyListener>) -> Result<()> {
        url.validate("subscribe")?;
        debug!("subscribe: {url}");
        self.inner
            .state
            .add_listener(url, ListenerHandle::new(listener));
        self.inner
            .backend
            .subscribe(self, url)
            .map_err(Error::Backend)
    }

    pub fn unsubscribe(&self, url: &Endpoint, listener: &Arc<dyn NotifyListener>) -> Result<()> {
        self.unsubscribe_handle(url, &ListenerHandle::new(Arc::clone(listener)))
    }

    fn unsubscribe_handle(&self, url: &Endpoint, listener: &ListenerHandle) -> Result<()> {
        url.validate("unsubscribe")?;
        debug!("unsubscribe: {url}");
        self.inner.state.remove_listener(url, listener);
        self.inner.backend.unsubscribe(url).map_err(Error::Backend)
    }

    /// Providers for `url`: the already notified lists when present,
    /// otherwise whatever the backend delivers while subscribing. Empty
    /// markers are dropped from the result.
    pub fn lookup(&self, url: &Endpoint) -> Result<Vec<Endpoint>> {
        if let Some(categories) = self
            .inner
            .state
            .notified_for(url)
            .filter(|categories| !categories.is_empty())
        {
            return Ok(categories
                .into_values()
                .flatten()
                .filter(|u| !u.is_empty_marker())
                .collect());
        }

        let captured: Arc<OnceLock<Vec<Endpoint>>> = Arc::new(OnceLock::new());
        let sink = Arc::clone(&captured);
        let listener: Arc<dyn NotifyListener> =
            Arc::new(move |urls: &[Endpoint]| -> anyhow::Result<()> {
                let _ = sink.set(urls.to_vec());
                Ok(())
            });
        // Stays subscribed so later pushes keep the notified lists current.
        self.subscribe(url, listener)?;
        Ok(captured
            .get()
            .map(|urls| urls.iter().filter(|u| !u.is_empty_marker()).cloned().collect())
            .unwrap_or_default())
    }

    /// Drops dynamic registrations and every subscription. Failures are
    /// logged and do not stop the teardown.
    pub fn destroy(&self) {
        debug!("destroy registry: {}", self.url());
        let dynamic_default = self.inner.config.dynamic_default;
        for url in self.inner.state.registered() {
            if !url.is_dynamic(dynamic_default) {
                continue;
            }
            match self.unregister(&url) {
                Ok(()) => debug!("destroy unregister url {url}"),
                Err(err) => warn!(
                    "failed to unregister url {url} from registry {} on destroy: {err}",
                    self.url()
                ),
            }
        }
        for (url, listeners) in self.inner.state.subscriptions() {
            for listener in &listeners {
                match self.unsubscribe_handle(&url, listener) {
                    Ok(()) => debug!("destroy unsubscribe url {url}"),
                    Err(err) => warn!(
                        "failed to unsubscribe url {url} from registry {} on destroy: {err}",
                        self.url()
                    ),
                }
            }
        }
    }

    pub fn registered(&self) -> HashSet<Endpoint> {
        self.inner.state.registered()
    }

    pub fn subscribed(&self) -> HashMap<Endpoint, HashSet<ListenerHandle>> {
        self.inner.state.subscribed()
    }

    pub fn notified(&self) -> HashMap<Endpoint, CategoryMap> {
        self.inner.state.notified()
    }

    pub fn cache_file(&self) -> Option<&Path> {
        self.inner.store.file()
    }

    pub fn cache_properties(&self) -> Snapshot {
        self.inner.store.properties()
    }

    pub fn cache_version(&self) -> u64 {
        self.inner.store.version()
    }

    /// Providers recorded in the disk cache for the service key of `url`.
    pub fn get_cache_urls(&self, url: &Endpoint) -> Option<Vec<Endpoint>> {
        self.inner.store.get_cache_urls(url)
    }

    /// Waits until queued cache writes have been attempted.
    pub fn flush_cache(&self) -> Result<()> {
        self.inner.store.flush()
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.url, f)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("url", &self.inner.url)
            .field("cache_file", &self.inner.store.file())
            .finish()
    }
}
