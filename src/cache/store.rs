use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::lock::{lock_path_for, FileLock};
use super::properties::{self, Snapshot};
use crate::endpoint::Endpoint;
use crate::{Error, Result};

const URL_SEPARATOR: char = ' ';
const WORKER_NAME: &str = "registry-cache-save";
const FAILING_WARN_INTERVAL: Duration = Duration::from_secs(5);

enum Task {
    Save(u64),
    Retry(u64),
    Flush(mpsc::Sender<()>),
    Shutdown,
}

struct Shared {
    file: Option<PathBuf>,
    properties: RwLock<Snapshot>,
    version: AtomicU64,
    pending_retries: AtomicUsize,
    closing: AtomicBool,
}

/// Versioned key→urls snapshot mirrored to a file shared between processes.
///
/// Each save bumps a process-wide version and is written by a single worker
/// thread. A save whose version is older than the counter is skipped, so a
/// delayed write never overwrites a newer one. Before writing, the file is
/// re-read and merged so entries owned by other processes survive.
pub struct CacheStore {
    shared: Arc<Shared>,
    tx: SyncSender<Task>,
    worker: Option<JoinHandle<()>>,
    sync_save: bool,
}

impl CacheStore {
    /// Opens the store, creating the cache directory when needed and loading
    /// any existing file. Only an uncreatable directory is fatal.
    pub fn open(file: Option<PathBuf>, sync_save: bool, queue_capacity: usize) -> Result<Self> {
        if let Some(path) = &file {
            ensure_parent_dir(path)?;
        }
        let properties = match &file {
            Some(path) => load_properties(path),
            None => Snapshot::new(),
        };
        let shared = Arc::new(Shared {
            file,
            properties: RwLock::new(properties),
            version: AtomicU64::new(0),
            pending_retries: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::sync_channel(queue_capacity.max(1));
        let worker_shared = Arc::clone(&shared);
        let worker_tx = tx.clone();
        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run_worker(worker_shared, rx, worker_tx))?;

        Ok(Self {
            shared,
            tx,
            worker: Some(worker),
            sync_save,
        })
    }

    pub fn file(&self) -> Option<&Path> {
        self.shared.file.as_deref()
    }

    /// Current value of the save version counter.
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::SeqCst)
    }

    /// Copy of the in-memory key→value mapping.
    pub fn properties(&self) -> Snapshot {
        self.shared
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the flattened category lists of `url` under its service key
    /// and schedules a write at a fresh version.
    pub fn save_properties(
        &self,
        url: &Endpoint,
        categories: &BTreeMap<String, Vec<Endpoint>>,
    ) {
        let version = self.record(url, categories);
        self.schedule(version);
    }

    /// Updates the in-memory entry for `url` and returns the version that
    /// covers it. Callers that need the entry to follow their own map run
    /// this while still holding that map's lock, then [`Self::schedule`].
    pub(crate) fn record(
        &self,
        url: &Endpoint,
        categories: &BTreeMap<String, Vec<Endpoint>>,
    ) -> u64 {
        let mut value = String::new();
        for endpoint in categories.values().flatten() {
            if !value.is_empty() {
                value.push(URL_SEPARATOR);
            }
            value.push_str(&endpoint.to_full_string());
        }
        let mut properties = self
            .shared
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        properties.insert(url.service_key(), value);
        self.shared.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Writes at `version` now in sync mode, otherwise hands it to the worker.
    pub(crate) fn schedule(&self, version: u64) {
        if self.sync_save {
            self.do_save_properties(version);
        } else {
            self.enqueue(Task::Save(version));
        }
    }

    /// Runs one save attempt at `version` on the calling thread. A failed,
    /// still-current attempt is re-queued on the worker at a newer version.
    pub fn do_save_properties(&self, version: u64) {
        if let Some(retry) = self.shared.do_save(version) {
            self.shared.pending_retries.fetch_add(1, Ordering::SeqCst);
            self.enqueue(Task::Retry(retry));
        }
    }

    /// Blocks until every save queued before this call has been attempted
    /// and no retry raised by those attempts is still pending. While another
    /// process keeps the lock this waits for it to be released.
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.tx
            .send(Task::Flush(ack_tx))
            .map_err(|_| worker_stopped())?;
        ack_rx.recv().map_err(|_| worker_stopped())
    }

    /// Cached urls for the service key of `url`, if a well-formed entry
    /// exists.
    pub fn get_cache_urls(&self, url: &Endpoint) -> Option<Vec<Endpoint>> {
        let service_key = url.service_key();
        let guard = self
            .shared
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (key, value) in guard.iter() {
            if key.is_empty()
                || *key != service_key
                || !valid_key_start(key)
                || value.is_empty()
            {
                continue;
            }
            let urls = value
                .split_whitespace()
                .filter_map(|token| match Endpoint::parse(token) {
                    Ok(endpoint) => Some(endpoint),
                    Err(err) => {
                        warn!("skipping unparsable cached url for {key}: {err}");
                        None
                    }
                })
                .collect();
            return Some(urls);
        }
        None
    }

    fn enqueue(&self, task: Task) {
        match self.tx.send(task) {
            Ok(()) => {}
            Err(mpsc::SendError(Task::Retry(version))) => {
                self.shared.pending_retries.fetch_sub(1, Ordering::SeqCst);
                warn!("registry cache save worker stopped, dropping retry at version {version}");
            }
            Err(mpsc::SendError(Task::Save(version))) => {
                warn!("registry cache save worker stopped, dropping save at version {version}");
            }
            Err(_) => {}
        }
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::Release);
        let _ = self.tx.send(Task::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Shared {
    /// Returns the version to retry at when the attempt failed and is still
    /// the newest.
    fn do_save(&self, version: u64) -> Option<u64> {
        if version < self.version.load(Ordering::SeqCst) {
            return None;
        }
        let file = self.file.as_deref()?;
        match self.write_merged(file) {
            Ok(()) => {
                debug!("saved registry cache {} at version {version}", file.display());
                None
            }
            Err(err) => {
                if version < self.version.load(Ordering::SeqCst) {
                    return None;
                }
                let next = self.version.fetch_add(1, Ordering::SeqCst) + 1;
                match err {
                    Error::LockContended(_) => debug!(
                        "registry cache {} is locked, retrying at version {next}",
                        file.display()
                    ),
                    err => warn!(
                        "failed to save registry cache {}, retrying at version {next}: {err}",
                        file.display()
                    ),
                }
                Some(next)
            }
        }
    }

    fn write_merged(&self, file: &Path) -> Result<()> {
        let mut merged = match load_snapshot(file) {
            Ok(snapshot) => snapshot,
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => Snapshot::new(),
            Err(err) => {
                warn!("failed to load registry cache {}: {err}", file.display());
                Snapshot::new()
            }
        };
        {
            let ours = self.properties.read().unwrap_or_else(PoisonError::into_inner);
            merged.extend(ours.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let lock = FileLock::try_acquire(&lock_path_for(file))?
            .ok_or_else(|| Error::LockContended(file.to_path_buf()))?;
        let tmp = sibling_with_suffix(file, ".tmp");
        {
            let out = File::create(&tmp)?;
            let mut writer = BufWriter::new(&out);
            properties::write(&mut writer, &merged)?;
            drop(writer);
            out.sync_all()?;
        }
        fs::rename(&tmp, file)?;
        drop(lock);
        Ok(())
    }
}

fn run_worker(shared: Arc<Shared>, rx: Receiver<Task>, tx: SyncSender<Task>) {
    let mut backlog = VecDeque::new();
    let mut waiting_flushes: Vec<mpsc::Sender<()>> = Vec::new();
    let mut failing_since: Option<Instant> = None;
    loop {
        let task = match backlog.pop_front() {
            Some(version) => Task::Retry(version),
            None => match rx.recv() {
                Ok(task) => task,
                Err(_) => break,
            },
        };
        let version = match task {
            Task::Save(version) => version,
            Task::Retry(version) => {
                shared.pending_retries.fetch_sub(1, Ordering::SeqCst);
                version
            }
            Task::Flush(ack) => {
                waiting_flushes.push(ack);
                ack_flushes(&shared, &mut waiting_flushes);
                continue;
            }
            Task::Shutdown => break,
        };
        match shared.do_save(version) {
            None => failing_since = None,
            Some(retry) if shared.closing.load(Ordering::Acquire) => {
                warn!("registry cache closing, dropping retry at version {retry}");
            }
            Some(retry) => {
                let since = *failing_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= FAILING_WARN_INTERVAL {
                    warn!(
                        "registry cache save failing for {:?}, still retrying",
                        since.elapsed()
                    );
                    failing_since = Some(Instant::now());
                }
                thread::yield_now();
                shared.pending_retries.fetch_add(1, Ordering::SeqCst);
                match tx.try_send(Task::Retry(retry)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => backlog.push_back(retry),
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
        ack_flushes(&shared, &mut waiting_flushes);
    }
    for ack in waiting_flushes {
        let _ = ack.send(());
    }
}

fn ack_flushes(shared: &Shared, waiting: &mut Vec<mpsc::Sender<()>>) {
    if shared.pending_retries.load(Ordering::SeqCst) == 0 {
        for ack in waiting.drain(..) {
            let _ = ack.send(());
        }
    }
}

/// Reads a cache file into a snapshot.
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let file = File::open(path)?;
    Ok(properties::read(BufReader::new(file))?)
}

fn load_properties(path: &Path) -> Snapshot {
    if !path.exists() {
        return Snapshot::new();
    }
    match load_snapshot(path) {
        Ok(snapshot) => {
            debug!(
                "loaded registry cache {} with {} entries",
                path.display(),
                snapshot.len()
            );
            snapshot
        }
        Err(err) => {
            warn!("failed to load registry cache {}: {err}", path.display());
            Snapshot::new()
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|err| {
        Error::InvalidArgument(format!(
            "invalid registry cache file {}: failed to create directory {}: {err}",
            path.display(),
            parent.display()
        ))
    })
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn valid_key_start(key: &str) -> bool {
    key.chars()
        .next()
        .map_or(false, |ch| ch.is_alphabetic() || ch == '_')
}

fn worker_stopped() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "registry cache save worker stopped",
    ))
}
