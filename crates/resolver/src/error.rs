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

/// Errors produced by signet resolution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The queried name is not a valid signet address.
    #[error("invalid signet address: {with_source}")]
    BadName {
        /// The source of the error
        with_source: String,
    },

    /// A signet payload could not be decoded.
    #[error("signet: {with_source}")]
    Signet {
        /// The source of the error
        with_source: String,
    },

    /// A signet failed cryptographic validation.
    #[error("signet validation: {with_source}")]
    Validation {
        /// The source of the error
        with_source: String,
    },

    /// The DX certificate failed the binding ladder.
    #[error("DX certificate verification failed")]
    CertificateRejected,

    /// An armored key file was missing or malformed.
    #[error("armored key file: {with_source}")]
    Armor {
        /// The source of the error
        with_source: String,
    },

    /// Error raised by the DMTP exchange.
    #[error(transparent)]
    Protocol(#[from] vdime_protocol::Error),

    /// Error raised by the TLS verifier.
    #[error(transparent)]
    Tls(#[from] vdime_tls::Error),

    /// Error raised by the DNS layer.
    #[error(transparent)]
    Dns(#[from] vdime_dns::Error),

    /// Error raised while handling the DIME management record.
    #[error(transparent)]
    Record(#[from] vdime_mrec::Error),

    /// The object cache refused an operation.
    #[error(transparent)]
    Cache(#[from] vdime_cache::Error),
}
