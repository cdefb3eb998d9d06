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

use sha2::{Digest, Sha256};

/// Content-addressed identifier of a cached object: the SHA-256 hash of a
/// caller-supplied name.
pub type CacheId = [u8; 32];

/// Derive the cache identifier for an object name.
#[must_use]
pub fn cache_id(name: &str) -> CacheId {
    Sha256::digest(name.as_bytes()).into()
}

/// Current UTC time in whole seconds.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// The closed set of data kinds the cache can hold, in fixed numeric
/// (save) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum DataKind {
    /// DIME management records
    DimeRecord = 1,
    /// DNSKEY records
    Dnskey = 2,
    /// DS records
    Ds = 3,
    /// OCSP responses
    Ocsp = 4,
    /// signets
    Signet = 5,
}

impl DataKind {
    /// All kinds in save order.
    pub const ALL: [Self; 5] = [
        Self::DimeRecord,
        Self::Dnskey,
        Self::Ds,
        Self::Ocsp,
        Self::Signet,
    ];

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::DimeRecord),
            2 => Some(Self::Dnskey),
            3 => Some(Self::Ds),
            4 => Some(Self::Ocsp),
            5 => Some(Self::Signet),
            _ => None,
        }
    }
}

/// One cached object together with its eviction metadata.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    /// UTC timestamp of creation; the TTL counts from here.
    pub timestamp: u64,
    /// Identifier hash, unique within a store.
    pub id: CacheId,
    /// Time-to-live in seconds from `timestamp`; 0 means no TTL.
    pub ttl: u64,
    /// Absolute UTC expiration; 0 means no expiration.
    pub expiration: u64,
    /// Relaxed eviction: TTL expiry alone signals a refresh instead of
    /// evicting, as long as `expiration` has not passed.
    pub relaxed: bool,
    /// Whether the entry is written out at save time.
    pub persists: bool,
    /// The cached payload.
    pub payload: T,
    /// An older entry displaced by a forced add; the shadow is what gets
    /// persisted while this entry is live.
    pub shadow: Option<Box<Entry<T>>>,
}

/// Lifecycle state of an entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Entry is valid.
    Live,
    /// TTL elapsed on a relaxed entry whose expiration has not; the caller
    /// should refresh it but may keep using it.
    RefreshDue,
    /// Entry must be evicted.
    Expired,
}

impl<T> Entry<T> {
    pub(crate) fn new(
        id: CacheId,
        ttl: u64,
        expiration: u64,
        payload: T,
        persists: bool,
        relaxed: bool,
    ) -> Self {
        Self {
            timestamp: unix_now(),
            id,
            ttl,
            expiration,
            relaxed,
            persists,
            payload,
            shadow: None,
        }
    }

    /// Evaluate the eviction policy for this entry at time `now`.
    #[must_use]
    pub fn state_at(&self, now: u64) -> EntryState {
        if self.expiration != 0 && self.expiration < now {
            return EntryState::Expired;
        }

        if self.ttl != 0 && self.timestamp + self.ttl <= now {
            // A relaxed TTL expiry only counts when an expiration backstop
            // exists and has not been reached.
            if !self.relaxed || self.expiration == 0 {
                return EntryState::Expired;
            }

            return EntryState::RefreshDue;
        }

        EntryState::Live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(ttl: u64, expiration: u64, relaxed: bool) -> Entry<()> {
        Entry {
            timestamp: 1_000,
            id: cache_id("x"),
            ttl,
            expiration,
            relaxed,
            persists: false,
            payload: (),
            shadow: None,
        }
    }

    #[rstest::rstest]
    // no ttl, no expiration: lives forever
    #[case(entry(0, 0, false), 5_000, EntryState::Live)]
    // ttl pending
    #[case(entry(100, 0, false), 1_099, EntryState::Live)]
    // ttl elapsed, strict policy
    #[case(entry(100, 0, false), 1_100, EntryState::Expired)]
    // ttl elapsed, relaxed but no expiration backstop
    #[case(entry(100, 0, true), 1_100, EntryState::Expired)]
    // ttl elapsed, relaxed with live expiration: refresh signal
    #[case(entry(100, 9_999, true), 1_100, EntryState::RefreshDue)]
    // absolute expiration elapsed beats relaxed
    #[case(entry(100, 2_000, true), 2_001, EntryState::Expired)]
    // zero ttl: eviction depends solely on expiration
    #[case(entry(0, 2_000, false), 1_500, EntryState::Live)]
    #[case(entry(0, 2_000, false), 2_001, EntryState::Expired)]
    fn eviction_policy(#[case] entry: Entry<()>, #[case] now: u64, #[case] expected: EntryState) {
        assert_eq!(entry.state_at(now), expected);
    }

    #[test]
    fn id_is_stable() {
        assert_eq!(cache_id("darkmail.example"), cache_id("darkmail.example"));
        assert_ne!(cache_id("darkmail.example"), cache_id("darkmail.exampl"));
    }
}
