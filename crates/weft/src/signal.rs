//! Change signals between store handles
//!
//! A signal carries no payload, only "store X has new log entries". It can
//! be lost (a suspended process misses it) or duplicated, which is fine:
//! receivers answer every signal with a merge, and merges are idempotent.
//!
//! - [`SignalHub`]: in-process fan-out, for handles living in one process
//!   and for tests simulating several processes
//! - [`FileSignal`]: cross-process, via one token file per store in a
//!   shared directory that a watcher thread polls

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use weft_core::traits::{ChangeSignal, SignalHandler, SubscriptionId};
use weft_core::types::StoreId;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    by_store: RwLock<HashMap<StoreId, Vec<(SubscriptionId, SignalHandler)>>>,
}

impl Subscribers {
    fn add(&self, store: StoreId, handler: SignalHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_store
            .write()
            .entry(store)
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, id: SubscriptionId) {
        for handlers in self.by_store.write().values_mut() {
            handlers.retain(|(sub, _)| *sub != id);
        }
    }

    fn handlers(&self, store: StoreId) -> Vec<SignalHandler> {
        self.by_store
            .read()
            .get(&store)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    fn stores(&self) -> Vec<StoreId> {
        self.by_store
            .read()
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(store, _)| *store)
            .collect()
    }

    fn fire(&self, store: StoreId) {
        // Handlers run without the lock held so they may (un)subscribe
        for handler in self.handlers(store) {
            handler();
        }
    }
}

/// In-process signal fan-out.
///
/// `post` runs every subscriber of the store on the posting thread. While
/// muted, posts are dropped, which simulates a suspended receiver.
#[derive(Default)]
pub struct SignalHub {
    subscribers: Subscribers,
    muted: AtomicBool,
    posted: AtomicU64,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop posts until [`SignalHub::unmute`]
    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::SeqCst);
    }

    /// Number of posts made, delivered or not
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::SeqCst)
    }
}

impl ChangeSignal for SignalHub {
    fn post(&self, store: StoreId) {
        self.posted.fetch_add(1, Ordering::SeqCst);
        if self.muted.load(Ordering::SeqCst) {
            tracing::trace!(store = %store, "Signal dropped while muted");
            return;
        }
        self.subscribers.fire(store);
    }

    fn subscribe(&self, store: StoreId, handler: SignalHandler) -> SubscriptionId {
        self.subscribers.add(store, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }
}

struct FileSignalShared {
    dir: PathBuf,
    poll_interval: Duration,
    subscribers: Subscribers,
    last_seen: Mutex<HashMap<StoreId, Option<String>>>,
    stop: AtomicBool,
}

impl FileSignalShared {
    fn token_path(&self, store: StoreId) -> PathBuf {
        self.dir.join(format!("{}.signal", store.as_str()))
    }

    fn read_token(&self, store: StoreId) -> Option<String> {
        std::fs::read_to_string(self.token_path(store)).ok()
    }

    /// Fire subscribers of every store whose token changed
    fn scan(&self) {
        for store in self.subscribers.stores() {
            let token = self.read_token(store);
            let changed = {
                let mut last_seen = self.last_seen.lock();
                let previous = last_seen.insert(store, token.clone());
                previous.map_or(false, |previous| previous != token)
            };
            if changed {
                tracing::trace!(store = %store, "Signal file changed");
                self.subscribers.fire(store);
            }
        }
    }
}

/// Cross-process signal over a shared directory.
///
/// `post` rewrites `<dir>/<store>.signal` with a fresh token. A watcher
/// thread, started on the first subscription, polls the token files and
/// fires subscribers when a token changes. The posting process sees its own
/// posts too.
pub struct FileSignal {
    shared: Arc<FileSignalShared>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl FileSignal {
    pub fn open(dir: impl Into<PathBuf>, poll_interval: Duration) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            shared: Arc::new(FileSignalShared {
                dir,
                poll_interval,
                subscribers: Subscribers::default(),
                last_seen: Mutex::new(HashMap::new()),
                stop: AtomicBool::new(false),
            }),
            watcher: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    fn write_token(&self, store: StoreId) -> std::io::Result<()> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let token = format!("{}:{}", std::process::id(), nanos);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.shared.dir)?;
        tmp.write_all(token.as_bytes())?;
        tmp.persist(self.shared.token_path(store))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn ensure_watcher(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("weft-signal-watcher".into())
            .spawn(move || {
                while !shared.stop.load(Ordering::SeqCst) {
                    std::thread::sleep(shared.poll_interval);
                    shared.scan();
                }
            });

        match spawned {
            Ok(handle) => *watcher = Some(handle),
            Err(e) => tracing::error!(error = %e, "Failed to start signal watcher"),
        }
    }

    /// Stop the watcher thread
    pub fn close(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.watcher.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl ChangeSignal for FileSignal {
    fn post(&self, store: StoreId) {
        if let Err(e) = self.write_token(store) {
            // The polling backstop still picks the change up
            tracing::warn!(store = %store, error = %e, "Failed to post change signal");
        }
    }

    fn subscribe(&self, store: StoreId, handler: SignalHandler) -> SubscriptionId {
        {
            let mut last_seen = self.shared.last_seen.lock();
            if !last_seen.contains_key(&store) {
                last_seen.insert(store, self.shared.read_token(store));
            }
        }
        let id = self.shared.subscribers.add(store, handler);
        self.ensure_watcher();
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.subscribers.remove(id);
    }
}

impl Drop for FileSignal {
    fn drop(&mut self) {
        self.close();
    }
}
