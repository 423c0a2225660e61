use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use log::{debug, error, warn};

use super::Registry;
use crate::endpoint::{Endpoint, ANY_VALUE, EMPTY_PROTOCOL};
use crate::listener::{ListenerHandle, NotifyListener};
use crate::{Error, Result};

/// Substitutes `[url with protocol "empty"]` for an empty list, so listeners
/// can tell "no providers" apart from "not known yet".
pub fn filter_empty<'a>(url: &Endpoint, urls: &'a [Endpoint]) -> Cow<'a, [Endpoint]> {
    if urls.is_empty() {
        Cow::Owned(vec![url.with_protocol(EMPTY_PROTOCOL)])
    } else {
        Cow::Borrowed(urls)
    }
}

impl Registry {
    /// Entry point for one backend push. Every subscription matching the
    /// first url of the batch is updated; all urls of a batch are expected to
    /// share one service key.
    pub fn notify(&self, urls: &[Endpoint]) {
        let Some(first) = urls.first() else {
            return;
        };
        for (subscribe, listeners) in self.inner.state.subscriptions() {
            if !self.inner.matcher.is_match(&subscribe, first) {
                continue;
            }
            let filtered = filter_empty(&subscribe, urls);
            for listener in &listeners {
                if let Err(err) = self.notify_handle(&subscribe, listener, &filtered) {
                    error!(
                        "failed to notify registry event for {subscribe}, {} urls: {err}",
                        urls.len()
                    );
                }
            }
        }
    }

    /// Stores `urls` for `url` category by category, saving the cache and
    /// calling `listener` once per category.
    pub fn notify_listener(
        &self,
        url: &Endpoint,
        listener: &Arc<dyn NotifyListener>,
        urls: &[Endpoint],
    ) -> Result<()> {
        self.notify_handle(url, &ListenerHandle::new(Arc::clone(listener)), urls)
    }

    pub(crate) fn notify_handle(
        &self,
        url: &Endpoint,
        listener: &ListenerHandle,
        urls: &[Endpoint],
    ) -> Result<()> {
        url.validate("notify")?;
        if urls.is_empty() && url.service_interface() != ANY_VALUE {
            warn!("ignoring empty notify urls for subscribe url {url}");
            return Ok(());
        }
        let urls = filter_empty(url, urls);
        debug!("notify {} urls for subscribe url {url}", urls.len());

        let grouped = self.group_by_category(url, &urls);
        if grouped.is_empty() {
            return Ok(());
        }
        let store = &self.inner.store;
        for (category, list) in grouped {
            let version = self
                .inner
                .state
                .replace_category(url, category, list.clone(), |categories| {
                    store.record(url, categories)
                });
            store.schedule(version);
            invoke(listener, &list)?;
        }
        Ok(())
    }

    fn group_by_category(
        &self,
        url: &Endpoint,
        urls: &[Endpoint],
    ) -> BTreeMap<String, Vec<Endpoint>> {
        let mut grouped: BTreeMap<String, Vec<Endpoint>> = BTreeMap::new();
        for candidate in urls {
            if !candidate.is_empty_marker() && !self.inner.matcher.is_match(url, candidate) {
                continue;
            }
            grouped
                .entry(candidate.category().to_string())
                .or_default()
                .push(candidate.clone());
        }
        grouped
    }
}

fn invoke(listener: &ListenerHandle, urls: &[Endpoint]) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| listener.notify(urls))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::Listener(err)),
        Err(payload) => Err(Error::Listener(anyhow!(
            "listener panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
