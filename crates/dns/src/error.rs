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

/// Errors produced by DNS retrieval and DNSSEC validation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resolver could not be reached or answered with an error.
    #[error("resolver failure: {with_source}")]
    Resolver {
        /// The source of the error
        with_source: String,
    },

    /// The query timed out.
    #[error("resolver timed out")]
    TimedOut,

    /// No records of the requested type were found.
    #[error("record not found")]
    NoRecords,

    /// The DNS reply was malformed or inconsistent with the query.
    #[error("bad DNS reply: {with_source}")]
    BadReply {
        /// The source of the error
        with_source: String,
    },

    /// A record carried an algorithm or digest type outside the supported
    /// set.
    #[error("unsupported DNSSEC algorithm or digest: {value}")]
    UnsupportedAlgorithm {
        /// Raw algorithm/digest identifier
        value: u8,
    },

    /// An owner or signer name could not be packed canonically.
    #[error("invalid DNS name: {with_source}")]
    BadName {
        /// The source of the error
        with_source: String,
    },

    /// An RRSIG record failed structural or cryptographic verification.
    #[error("RRSIG verification failure: {with_source}")]
    Verification {
        /// The source of the error
        with_source: String,
    },

    /// The trust anchor file was missing, unreadable or did not contain a
    /// root entry.
    #[error("trust anchor failure: {with_source}")]
    Anchor {
        /// The source of the error
        with_source: String,
    },

    /// The object cache refused an operation.
    #[error(transparent)]
    Cache(#[from] vdime_cache::Error),
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::Resolver {
            with_source: err.to_string(),
        }
    }
}

impl From<trust_dns_proto::error::ProtoError> for Error {
    #[inline]
    fn from(err: trust_dns_proto::error::ProtoError) -> Self {
        Self::BadReply {
            with_source: err.to_string(),
        }
    }
}
