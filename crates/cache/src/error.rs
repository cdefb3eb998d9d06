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

/// Errors produced by the object cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An entry with the same identifier (or custom-equal key) is already
    /// cached and the insertion was not forced.
    #[error("an object with the same identifier is already cached")]
    AlreadyCached,

    /// A serialized payload or cache record could not be decoded.
    #[error("could not decode cached data: {with_source}")]
    Decode {
        /// The source of the error
        with_source: String,
    },

    /// A payload could not be serialized for persistence.
    #[error("could not serialize cached data: {with_source}")]
    Encode {
        /// The source of the error
        with_source: String,
    },

    /// The cache file or the DIME user directory could not be accessed.
    #[error("cache storage error: {with_source}")]
    Storage {
        /// The source of the error
        with_source: String,
    },

    /// The record on disk carries a data kind this build does not handle.
    #[error("unrecognized cached data kind: {kind}")]
    UnknownKind {
        /// Raw kind tag read from the cache file
        kind: u8,
    },
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            with_source: err.to_string(),
        }
    }
}
