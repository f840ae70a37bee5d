//! In-process object caches
//!
//! A [`LiveCache`] holds the current [`CacheSnapshot`] of a store as seen by
//! this process. Snapshots are persistent maps: taking one is O(1) and it
//! never changes afterwards, so readers on any thread work against a fixed
//! view while the serializer applies the next update.

use im::OrdMap;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use serde::de::DeserializeOwned;
use std::ops::Bound;
use std::sync::{Arc, Weak};
use weft_core::error::Result;
use weft_core::traits::CacheSink;
use weft_core::types::{CacheOp, ObjectId, ObjectKey, ObjectKind, Payload};

/// Immutable view of every object in a store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    objects: OrdMap<ObjectKey, Payload>,
}

impl CacheSnapshot {
    pub fn from_objects(objects: impl IntoIterator<Item = (ObjectKey, Payload)>) -> Self {
        Self {
            objects: objects.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&Payload> {
        self.objects.get(key)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &ObjectKey) -> Result<Option<T>> {
        match self.objects.get(key) {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects of one kind, ordered by id
    pub fn iter_kind<'a>(
        &'a self,
        kind: &'a ObjectKind,
    ) -> impl Iterator<Item = (&'a ObjectId, &'a Payload)> + 'a {
        let start = ObjectKey::new(kind.clone(), "");
        self.objects
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(key, _)| &key.kind == kind)
            .map(|(key, payload)| (&key.id, payload))
    }

    pub fn count(&self, kind: &ObjectKind) -> usize {
        self.iter_kind(kind).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &Payload)> {
        self.objects.iter()
    }

    /// Apply ops in order
    pub fn apply(&mut self, ops: &[CacheOp]) {
        for op in ops {
            match op {
                CacheOp::Upsert { key, payload } => {
                    self.objects.insert(key.clone(), payload.clone());
                }
                CacheOp::Remove { key } => {
                    self.objects.remove(key);
                }
                CacheOp::ClearKind { kind } => {
                    let doomed: Vec<ObjectKey> = self
                        .iter_kind(kind)
                        .map(|(id, _)| ObjectKey::new(kind.clone(), id.clone()))
                        .collect();
                    for key in doomed {
                        self.objects.remove(&key);
                    }
                }
                CacheOp::ClearAll => self.objects = OrdMap::new(),
            }
        }
    }
}

/// Mutable holder of the latest snapshot
#[derive(Debug, Default)]
pub struct LiveCache {
    current: RwLock<CacheSnapshot>,
}

impl LiveCache {
    pub fn new(snapshot: CacheSnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.current.read().clone()
    }

    pub fn replace(&self, snapshot: CacheSnapshot) {
        *self.current.write() = snapshot;
    }
}

impl CacheSink for LiveCache {
    fn apply(&self, ops: &[CacheOp]) {
        // Appliers are serialized by the upgradable lock; plain readers keep
        // the old version until the swap
        let current = self.current.upgradable_read();
        let mut next = (*current).clone();
        next.apply(ops);
        *RwLockUpgradableReadGuard::upgrade(current) = next;
    }
}

/// Every open cache of one store in this process.
///
/// Held weakly: a view lives as long as its owner keeps the `Arc`.
#[derive(Debug, Default)]
pub struct CacheViews {
    views: Mutex<Vec<Weak<LiveCache>>>,
}

impl CacheViews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, view: &Arc<LiveCache>) {
        self.views.lock().push(Arc::downgrade(view));
    }

    /// Number of views still alive
    pub fn live(&self) -> usize {
        let mut views = self.views.lock();
        views.retain(|v| v.strong_count() > 0);
        views.len()
    }

    fn upgrade_all(&self) -> Vec<Arc<LiveCache>> {
        let mut views = self.views.lock();
        views.retain(|v| v.strong_count() > 0);
        views.iter().filter_map(Weak::upgrade).collect()
    }
}

impl CacheSink for CacheViews {
    fn apply(&self, ops: &[CacheOp]) {
        for view in self.upgrade_all() {
            view.apply(ops);
        }
    }
}
