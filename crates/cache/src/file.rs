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

use crate::entry::{CacheId, DataKind, Entry};
use crate::store::{CachePayload, Store};
use crate::{Error, CACHE_FILE_ENV};
use std::path::PathBuf;

/// Fixed size of the on-disk entry header: timestamp, id, kind, ttl,
/// expiration, relaxed flag, persists flag.
const HEADER_LEN: usize = 8 + 32 + 1 + 8 + 8 + 1 + 1;

/// Header of one cache file record, shared by every store.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub timestamp: u64,
    pub id: CacheId,
    pub kind: u8,
    pub ttl: u64,
    pub expiration: u64,
    pub relaxed: bool,
    pub persists: bool,
}

impl RecordHeader {
    fn parse(buf: &[u8]) -> Result<Self, Error> {
        let mut rd = crate::wire::Reader::new(buf);

        Ok(Self {
            timestamp: rd.u64()?,
            id: rd.take(32)?.try_into().expect("len 32"),
            kind: rd.u8()?,
            ttl: rd.u64()?,
            expiration: rd.u64()?,
            relaxed: rd.u8()? != 0,
            persists: rd.u8()? != 0,
        })
    }
}

pub(crate) fn append_record<T: CachePayload>(out: &mut Vec<u8>, entry: &Entry<T>, payload: &[u8]) {
    let objlen = u32::try_from(HEADER_LEN + payload.len()).unwrap_or(u32::MAX);

    out.extend_from_slice(&objlen.to_le_bytes());
    out.extend_from_slice(&entry.timestamp.to_le_bytes());
    out.extend_from_slice(&entry.id);
    out.push(T::KIND as u8);
    out.extend_from_slice(&entry.ttl.to_le_bytes());
    out.extend_from_slice(&entry.expiration.to_le_bytes());
    out.push(u8::from(entry.relaxed));
    out.push(u8::from(entry.persists));
    out.extend_from_slice(payload);
}

/// Object-safe view of a [`Store`] used by [`CacheFile`] to move entries of
/// every kind through one file.
pub trait PersistentStore: Send + Sync {
    /// The data kind this store holds.
    fn kind(&self) -> DataKind;

    /// Human description used in warnings.
    fn description(&self) -> &'static str;

    /// Append every persistable entry (shadow entries win) to `out`.
    fn serialize_into(&self, out: &mut Vec<u8>) -> Result<(), Error>;

    /// Deserialize and insert one record loaded from disk.
    fn load_record(&self, header: &RecordHeader, payload: &[u8]) -> Result<(), Error>;
}

impl<T: CachePayload> PersistentStore for Store<T> {
    fn kind(&self) -> DataKind {
        T::KIND
    }

    fn description(&self) -> &'static str {
        Store::description(self)
    }

    fn serialize_into(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        self.serialize_persistent(out)
    }

    fn load_record(&self, header: &RecordHeader, payload: &[u8]) -> Result<(), Error> {
        let payload = T::deserialize(payload)?;

        self.insert_loaded(Entry {
            timestamp: header.timestamp,
            id: header.id,
            ttl: header.ttl,
            expiration: header.expiration,
            relaxed: header.relaxed,
            persists: true,
            payload,
            shadow: None,
        })
    }
}

/// The DIME user directory (`~/.dime` by default), created `0700` on first
/// use. An optional suffix is appended to the returned path.
pub fn dime_dir_location(suffix: Option<&str>) -> Result<PathBuf, Error> {
    let home = home::home_dir().ok_or_else(|| Error::Storage {
        with_source: "could not determine the user home directory".into(),
    })?;

    let base = home.join(".dime");

    match std::fs::metadata(&base) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(Error::Storage {
                with_source: format!("{} exists but it is not a directory", base.display()),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut builder = std::fs::DirBuilder::new();
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o700);
            }
            builder.create(&base)?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(match suffix {
        Some(suffix) => base.join(suffix),
        None => base,
    })
}

/// Resolve the cache file path: the `DIME_CACHE_FILE` environment variable
/// when set, otherwise `<base>/.cache`.
pub fn cache_location() -> Result<PathBuf, Error> {
    if let Some(path) = std::env::var_os(CACHE_FILE_ENV) {
        tracing::debug!(?path, "cache location set from environment");
        return Ok(PathBuf::from(path));
    }

    dime_dir_location(Some(".cache"))
}

/// Loader/saver moving a fixed set of stores through one cache file laid
/// out as a sequence of `<u32 objlen><header><payload>` records.
#[derive(Debug, Default)]
pub struct CacheFile {
    path: Option<PathBuf>,
}

impl CacheFile {
    #[must_use]
    pub const fn new() -> Self {
        Self { path: None }
    }

    /// Pin the cache file to an explicit path instead of the default
    /// location.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn location(&self) -> Result<PathBuf, Error> {
        self.path.clone().map_or_else(cache_location, Ok)
    }

    /// Load the cache file into the given stores. A missing file is
    /// created empty; corrupt or duplicate records are skipped.
    pub fn load(&self, stores: &[&dyn PersistentStore]) -> Result<(), Error> {
        let path = self.location()?;

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "cache file was not found, creating");
                std::fs::write(&path, [])?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut cursor = &data[..];

        loop {
            if cursor.is_empty() {
                break;
            }

            // A corrupt length prefix at EOF is treated as a clean end.
            if cursor.len() < 4 {
                tracing::warn!("reached truncated length prefix at end of cache file");
                break;
            }

            let objlen = u32::from_le_bytes(cursor[..4].try_into().expect("len 4")) as usize;
            cursor = &cursor[4..];

            if objlen == 0 {
                continue;
            }

            if cursor.len() < objlen {
                tracing::warn!("reached truncated record at end of cache file");
                break;
            }

            let record = &cursor[..objlen];
            cursor = &cursor[objlen..];

            if record.len() < HEADER_LEN {
                tracing::warn!("skipping undersized cache record");
                continue;
            }

            let header = RecordHeader::parse(&record[..HEADER_LEN])?;
            let payload = &record[HEADER_LEN..];

            let Some(kind) = DataKind::from_tag(header.kind) else {
                tracing::warn!(kind = header.kind, "read cached data of unrecognized type, continuing");
                continue;
            };

            let Some(store) = stores.iter().find(|store| store.kind() == kind) else {
                tracing::warn!(?kind, "no store was supplied for cached data type, continuing");
                continue;
            };

            match store.load_record(&header, payload) {
                Ok(()) => {}
                Err(Error::AlreadyCached) => {
                    tracing::warn!(store = store.description(), "skipping duplicate cached object");
                }
                Err(e) => {
                    tracing::warn!(store = store.description(), %e, "cached object could not be deserialized, continuing");
                }
            }
        }

        Ok(())
    }

    /// Persist every store to disk as a whole-file truncate-and-rewrite,
    /// visiting stores in the fixed kind order given by the caller.
    pub fn save(&self, stores: &[&dyn PersistentStore]) -> Result<(), Error> {
        let path = self.location()?;
        let mut out = vec![];

        for store in stores {
            tracing::debug!(store = store.description(), "persisting cache store");
            store.serialize_into(&mut out)?;
        }

        std::fs::write(&path, &out)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::Note;
    use pretty_assertions::assert_eq;

    #[test]
    fn save_then_load_keeps_the_persistent_subset() {
        let dir = tempfile::tempdir().unwrap();
        let file = CacheFile::at(dir.path().join(".cache"));

        let store = Store::<Note>::new();
        store.add("kept", 0, 0, Note("kept".into()), true, false).unwrap();
        store.add("dropped", 0, 0, Note("dropped".into()), false, false).unwrap();

        file.save(&[&store]).unwrap();

        let reloaded = Store::<Note>::new();
        file.load(&[&reloaded]).unwrap();

        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.find("kept").unwrap().payload, Note("kept".into()));
        assert!(reloaded.find("dropped").is_none());
    }

    #[test]
    fn zero_entry_save_writes_an_empty_file_that_loads_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cache");
        let file = CacheFile::at(&path);

        let store = Store::<Note>::new();
        file.save(&[&store]).unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        let reloaded = Store::<Note>::new();
        file.load(&[&reloaded]).unwrap();
        assert_eq!(reloaded.len(), 0);
    }

    #[test]
    fn missing_file_is_created_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cache");

        let store = Store::<Note>::new();
        CacheFile::at(&path).load(&[&store]).unwrap();

        assert!(path.exists());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn garbage_and_duplicates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cache");
        let file = CacheFile::at(&path);

        let store = Store::<Note>::new();
        store.add("a", 0, 0, Note("a".into()), true, false).unwrap();
        file.save(&[&store]).unwrap();

        // Duplicate the record and append a truncated header.
        let mut data = std::fs::read(&path).unwrap();
        let copy = data.clone();
        data.extend_from_slice(&copy);
        data.extend_from_slice(&[7, 0, 0]);
        std::fs::write(&path, &data).unwrap();

        let reloaded = Store::<Note>::new();
        file.load(&[&reloaded]).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn loaded_entries_are_marked_persistent_again() {
        let dir = tempfile::tempdir().unwrap();
        let file = CacheFile::at(dir.path().join(".cache"));

        let store = Store::<Note>::new();
        store.add("a", 0, 0, Note("a".into()), true, false).unwrap();
        file.save(&[&store]).unwrap();

        let reloaded = Store::<Note>::new();
        file.load(&[&reloaded]).unwrap();

        // Saving the reloaded store writes the entry out again.
        let twice = CacheFile::at(dir.path().join(".cache2"));
        twice.save(&[&reloaded]).unwrap();
        assert_ne!(
            std::fs::metadata(dir.path().join(".cache2")).unwrap().len(),
            0
        );
    }
}
