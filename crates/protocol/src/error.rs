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

/// Errors produced by a DMTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to parse the reply of the server.
    #[error("failed to parse the reply of the server: {with_source}")]
    ReplyParsing {
        /// The source of the error
        with_source: String,
    },

    /// The server answered a command with a non-success code.
    #[error("server returned {code}: {message}")]
    Protocol {
        /// Numeric response code
        code: u16,
        /// Server text accompanying the code
        message: String,
    },

    /// The session was in no state to carry the attempted command.
    #[error("client: {with_source}")]
    BadState {
        /// The source of the error
        with_source: String,
    },

    /// Error due to the underlying connection.
    #[error("connection: {with_source}")]
    Connection {
        /// The source of the error
        with_source: String,
    },

    /// Error raised by the TLS layer.
    #[error(transparent)]
    Tls(#[from] vdime_tls::Error),

    /// Error raised during DNS-based transport selection.
    #[error(transparent)]
    Dns(#[from] vdime_dns::Error),

    /// Error raised while retrieving the DIME management record.
    #[error(transparent)]
    Record(#[from] vdime_mrec::Error),
}

impl Error {
    /// Whether the server outcome was a non-2xx protocol reply (as opposed
    /// to a transport or client-side failure).
    #[must_use]
    pub const fn is_protocol_refusal(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::Connection {
            with_source: err.to_string(),
        }
    }
}
