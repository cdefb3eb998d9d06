/*
 * vDIME dark internet mail environment client
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

use crate::entry::{cache_id, unix_now, CacheId, DataKind, Entry, EntryState};
use crate::Error;
use std::sync::Mutex;

/// Data that can live in a cache [`Store`].
pub trait CachePayload: Sized + Send {
    /// The store this payload belongs to.
    const KIND: DataKind;

    /// Internal stores hand out shared access through [`Store::with`] /
    /// [`Store::update`] instead of deep copies; their entries are owned by
    /// the cache for their whole lifetime.
    const INTERNAL: bool = false;

    /// Serialize the payload into the on-disk wire format.
    fn serialize(&self) -> Result<Vec<u8>, Error>;

    /// Inverse of [`CachePayload::serialize`].
    fn deserialize(data: &[u8]) -> Result<Self, Error>;

    /// Deep copy handed to callers of non-internal stores.
    fn clone_payload(&self) -> Self;

    /// One-line description used when dumping the cache.
    fn describe(&self) -> String {
        format!("{:?} entry", Self::KIND)
    }
}

/// A deep copy of a cached entry returned to the caller, together with the
/// metadata needed to act on refresh signals.
#[derive(Debug, Clone)]
pub struct Found<T> {
    /// Deep copy of the payload; the caller owns it.
    pub payload: T,
    /// Creation timestamp of the entry.
    pub timestamp: u64,
    /// TTL of the entry (0 = none).
    pub ttl: u64,
    /// Absolute expiration of the entry (0 = none).
    pub expiration: u64,
    /// Set when the entry outlived its TTL under the relaxed policy and a
    /// refresh should be attempted.
    pub refresh_due: bool,
}

/// One mutex-protected store of cached entries, all of the same kind.
///
/// Stale entries are evicted as a side effect of every traversal.
#[derive(Debug)]
pub struct Store<T> {
    description: &'static str,
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T: CachePayload> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CachePayload> Store<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            description: match T::KIND {
                DataKind::DimeRecord => "DIME management records",
                DataKind::Dnskey => "DNSKEY records",
                DataKind::Ds => "DS records",
                DataKind::Ocsp => "OCSP responses",
                DataKind::Signet => "signets",
            },
            entries: Mutex::new(vec![]),
        }
    }

    /// Human description of this store.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry<T>>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Evict every stale entry, keeping relaxed entries that are only due
    /// for a refresh.
    fn sweep(entries: &mut Vec<Entry<T>>, now: u64) {
        entries.retain(|entry| {
            let stale = entry.state_at(now) == EntryState::Expired;

            if stale {
                tracing::debug!(kind = ?T::KIND, "evicting stale entry from cache");
            }

            !stale
        });
    }

    /// Look up an entry by object name, returning a deep copy.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Found<T>> {
        self.find_id(&cache_id(name))
    }

    /// Look up an entry by identifier hash, returning a deep copy.
    #[must_use]
    pub fn find_id(&self, id: &CacheId) -> Option<Found<T>> {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries.iter().find(|entry| entry.id == *id).map(|entry| Found {
            payload: entry.payload.clone_payload(),
            timestamp: entry.timestamp,
            ttl: entry.ttl,
            expiration: entry.expiration,
            refresh_due: entry.state_at(now) == EntryState::RefreshDue,
        })
    }

    /// Look up an entry with a custom comparator, returning a deep copy.
    #[must_use]
    pub fn find_by<K: ?Sized>(&self, key: &K, cmp: impl Fn(&T, &K) -> bool) -> Option<Found<T>> {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries.iter().find(|entry| cmp(&entry.payload, key)).map(|entry| Found {
            payload: entry.payload.clone_payload(),
            timestamp: entry.timestamp,
            ttl: entry.ttl,
            expiration: entry.expiration,
            refresh_due: entry.state_at(now) == EntryState::RefreshDue,
        })
    }

    /// Identifier of the first live entry matching the custom comparator.
    #[must_use]
    pub fn find_id_by<K: ?Sized>(&self, key: &K, cmp: impl Fn(&T, &K) -> bool) -> Option<CacheId> {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries
            .iter()
            .find(|entry| cmp(&entry.payload, key))
            .map(|entry| entry.id)
    }

    /// Whether a live entry exists for the identifier.
    #[must_use]
    pub fn exists(&self, id: &CacheId) -> bool {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries.iter().any(|entry| entry.id == *id)
    }

    /// Whether a live entry matches the custom comparator.
    #[must_use]
    pub fn exists_by<K: ?Sized>(&self, key: &K, cmp: impl Fn(&T, &K) -> bool) -> bool {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries.iter().any(|entry| cmp(&entry.payload, key))
    }

    /// Add a new entry under `name`, failing on identifier collision.
    pub fn add(
        &self,
        name: &str,
        ttl: u64,
        expiration: u64,
        payload: T,
        persists: bool,
        relaxed: bool,
    ) -> Result<CacheId, Error> {
        let id = cache_id(name);
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        if entries.iter().any(|entry| entry.id == id) {
            return Err(Error::AlreadyCached);
        }

        entries.push(Entry::new(id, ttl, expiration, payload, persists, relaxed));

        Ok(id)
    }

    /// Add a new entry under `name`; a colliding entry is displaced and
    /// preserved as the new entry's shadow so that disk-backed state keeps
    /// reflecting the longer-lived binding.
    pub fn add_forced(
        &self,
        name: &str,
        ttl: u64,
        expiration: u64,
        payload: T,
        persists: bool,
        relaxed: bool,
    ) -> CacheId {
        let id = cache_id(name);
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        let mut entry = Entry::new(id, ttl, expiration, payload, persists, relaxed);

        if let Some(pos) = entries.iter().position(|entry| entry.id == id) {
            let old = entries.swap_remove(pos);
            entry.shadow = Some(Box::new(old));
        }

        entries.push(entry);

        id
    }

    /// Add a new entry, failing when an existing entry matches the custom
    /// comparator (used by stores whose identity is richer than the name).
    pub fn add_by<K: ?Sized>(
        &self,
        name: &str,
        key: &K,
        cmp: impl Fn(&T, &K) -> bool,
        ttl: u64,
        expiration: u64,
        payload: T,
        persists: bool,
        relaxed: bool,
    ) -> Result<CacheId, Error> {
        let id = cache_id(name);
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        if entries.iter().any(|entry| entry.id == id || cmp(&entry.payload, key)) {
            return Err(Error::AlreadyCached);
        }

        entries.push(Entry::new(id, ttl, expiration, payload, persists, relaxed));

        Ok(id)
    }

    /// Comparator-keyed variant of [`Store::add_forced`].
    pub fn add_by_forced<K: ?Sized>(
        &self,
        name: &str,
        key: &K,
        cmp: impl Fn(&T, &K) -> bool,
        ttl: u64,
        expiration: u64,
        payload: T,
        persists: bool,
        relaxed: bool,
    ) -> CacheId {
        let id = cache_id(name);
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        let mut entry = Entry::new(id, ttl, expiration, payload, persists, relaxed);

        if let Some(pos) = entries
            .iter()
            .position(|entry| entry.id == id || cmp(&entry.payload, key))
        {
            let old = entries.swap_remove(pos);
            entry.shadow = Some(Box::new(old));
        }

        entries.push(entry);

        id
    }

    /// Replace the payload and eviction metadata of an existing entry,
    /// keeping its identifier. Returns false when no entry matched.
    pub fn replace_id(
        &self,
        id: &CacheId,
        ttl: u64,
        expiration: u64,
        payload: T,
        persists: bool,
        relaxed: bool,
    ) -> bool {
        let mut entries = self.lock();

        let Some(entry) = entries.iter_mut().find(|entry| entry.id == *id) else {
            return false;
        };

        *entry = Entry::new(*id, ttl, expiration, payload, persists, relaxed);

        true
    }

    /// Remove an entry by identifier. Returns whether one was removed.
    pub fn remove(&self, id: &CacheId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != *id);

        entries.len() != before
    }

    /// Remove every entry matching the custom comparator.
    pub fn remove_by<K: ?Sized>(&self, key: &K, cmp: impl Fn(&T, &K) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| !cmp(&entry.payload, key));

        before - entries.len()
    }

    /// Shared read access to an entry's payload (internal stores).
    #[must_use]
    pub fn with<R>(&self, id: &CacheId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries.iter().find(|entry| entry.id == *id).map(|entry| f(&entry.payload))
    }

    /// Shared read access through a custom comparator (internal stores).
    #[must_use]
    pub fn with_by<K: ?Sized, R>(
        &self,
        key: &K,
        cmp: impl Fn(&T, &K) -> bool,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries
            .iter()
            .find(|entry| cmp(&entry.payload, key))
            .map(|entry| f(&entry.payload))
    }

    /// In-place mutation of an entry's payload (internal stores; used to
    /// attach cross-reference ids after retrieval passes).
    pub fn update<R>(&self, id: &CacheId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut entries = self.lock();

        entries
            .iter_mut()
            .find(|entry| entry.id == *id)
            .map(|entry| f(&mut entry.payload))
    }

    /// Visit every live entry, allowing payload mutation and persistence
    /// adjustment (used by the DNSKEY validation fixup).
    pub fn update_each(&self, mut f: impl FnMut(&CacheId, &mut T, &mut bool)) {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        for entry in entries.iter_mut() {
            f(&entry.id, &mut entry.payload, &mut entry.persists);
        }
    }

    /// One-line descriptions of every live entry, for cache inspection.
    #[must_use]
    pub fn dump(&self) -> Vec<String> {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries
            .iter()
            .map(|entry| {
                format!(
                    "{}{}{}",
                    entry.payload.describe(),
                    if entry.persists { "" } else { " [ephemeral]" },
                    if entry.shadow.is_some() { " [shadowing]" } else { "" },
                )
            })
            .collect()
    }

    /// Identifiers of all live entries.
    #[must_use]
    pub fn ids(&self) -> Vec<CacheId> {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries.iter().map(|entry| entry.id).collect()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = unix_now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);

        entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn serialize_persistent(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        let entries = self.lock();

        for entry in entries.iter() {
            // A shadowed entry is the one that must survive on disk.
            let towrite: &Entry<T> = entry.shadow.as_deref().unwrap_or(entry);

            if !towrite.persists {
                continue;
            }

            let payload = match towrite.payload.serialize() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(kind = ?T::KIND, %e, "skipping entry that failed to serialize");
                    continue;
                }
            };

            crate::file::append_record(out, towrite, &payload);
        }

        Ok(())
    }

    pub(crate) fn insert_loaded(&self, mut entry: Entry<T>) -> Result<(), Error> {
        // Everything loaded from the cache file is persisted again.
        entry.persists = true;

        let mut entries = self.lock();

        if entries.iter().any(|existing| existing.id == entry.id) {
            return Err(Error::AlreadyCached);
        }

        entries.push(entry);

        Ok(())
    }
}
