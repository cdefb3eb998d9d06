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

/// Errors produced by the TLS layer and the DX certificate verifier.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error due to the underlying connection.
    #[error("connection: {with_source}")]
    Connection {
        /// The source of the error
        with_source: String,
    },

    /// The TCP connect did not complete within the timeout.
    #[error("connection to {host}:{port} timed out")]
    ConnectTimeout { host: String, port: u16 },

    /// Error caused by the TLS machinery itself.
    #[error("tls: {with_source}")]
    Tls {
        /// The source of the error
        with_source: String,
    },

    /// The peer certificate could not be parsed or inspected.
    #[error("certificate: {with_source}")]
    Certificate {
        /// The source of the error
        with_source: String,
    },

    /// OCSP processing failed in a way that is not a soft fall-through.
    #[error("ocsp: {with_source}")]
    Ocsp {
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
        Self::Connection {
            with_source: err.to_string(),
        }
    }
}

impl From<rustls::Error> for Error {
    #[inline]
    fn from(err: rustls::Error) -> Self {
        Self::Tls {
            with_source: err.to_string(),
        }
    }
}

impl From<x509_certificate::X509CertificateError> for Error {
    #[inline]
    fn from(err: x509_certificate::X509CertificateError) -> Self {
        Self::Certificate {
            with_source: err.to_string(),
        }
    }
}
