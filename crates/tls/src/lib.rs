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

//! TLS certificate binding verification for DX connections.
//!
//! The handshake itself accepts any peer chain; trust is decided
//! afterwards by [`verify_dx_certificate`], which reconciles the peer
//! certificate with the DIME management record's Ed25519 TLS signatures,
//! standard PKI chain validation, hostname matching and OCSP revocation
//! under an ordered fallback policy.

mod cert;
mod connector;
mod error;
mod hostname;
mod ocsp;
mod verify;

pub use cert::ParsedCert;
pub use connector::DxConnector;
pub use error::Error;
pub use hostname::{check_hostname, domain_wildcard_check};
pub use ocsp::{OcspResponseData, OcspStore, OcspVerdict};
pub use verify::verify_dx_certificate;
