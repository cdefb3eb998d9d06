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

//! Disk-backed object cache shared by the vDIME resolver subsystems.
//!
//! The cache is partitioned into one [`Store`] per [`DataKind`]. Entries
//! carry a creation timestamp, an optional TTL, an optional absolute
//! expiration and a relaxed-eviction flag; persistent entries survive a
//! [`CacheFile::save`]/[`CacheFile::load`] round trip under a
//! length-prefixed binary record format.

mod entry;
mod error;
mod file;
mod store;
pub mod wire;

pub use entry::{cache_id, unix_now, CacheId, DataKind, Entry, EntryState};
pub use error::Error;
pub use file::{cache_location, dime_dir_location, CacheFile, PersistentStore};
pub use store::{CachePayload, Found, Store};

/// Environment variable overriding the absolute path of the cache file.
pub const CACHE_FILE_ENV: &str = "DIME_CACHE_FILE";
