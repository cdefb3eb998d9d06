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

/// Errors produced while parsing or retrieving DIME management records.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The TXT payload did not parse into a valid management record.
    #[error("invalid DIME management record: {with_source}")]
    Parse {
        /// The source of the error
        with_source: String,
    },

    /// A local management record file could not be read.
    #[error("could not read DIME record file: {with_source}")]
    File {
        /// The source of the error
        with_source: String,
    },

    /// The DNS layer failed to produce the TXT answer.
    #[error(transparent)]
    Dns(#[from] vdime_dns::Error),

    /// The object cache refused an operation.
    #[error(transparent)]
    Cache(#[from] vdime_cache::Error),
}
