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

//! DNS/DNSSEC validation for the vDIME resolver.
//!
//! Resolves DNSKEY, DS, TXT and MX records through the system recursive
//! resolver with the DNSSEC-OK EDNS0 flag, reconstructs RRSIG signatures
//! over canonically ordered RRSETs and proves record authenticity from a
//! preconfigured trust anchor file.

mod anchor;
mod client;
mod error;
mod lookup;
mod name;
mod records;
mod rrsig;

pub use client::{AnswerRecord, DnsClient, DnsReply, DnskeyAnswer, DsAnswer, MxAnswer, TxtRecord};
pub use error::Error;
pub use lookup::{DnsResolver, MxHost, TxtAnswer};
pub use name::{append_canonical_name, is_root_label, normalize_label};
pub use records::{
    compute_dnskey_digest, keytag, rsa_from_dnskey, DigestType, DnskeyRecord, DnssecAlgorithm,
    DsRecord, DNSKEY_FLAG_SEP, DNSKEY_FLAG_ZONE, DNSKEY_PROTOCOL,
};
pub use rrsig::{compare_rdata, sort_rrset_canonical, RrsigInfo};

/// Name of the trust anchor file inside the DIME user directory.
pub const ROOT_KEY_FILE: &str = "root-anchor.key";

/// DNSSEC validation outcome attached to retrieved records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DnssecState {
    /// The answer was not DNSSEC-protected at all.
    Unsigned,
    /// The answer carried an RRSIG that verified up to a trust anchor.
    Validated,
    /// The answer carried an RRSIG that failed verification; fatal for any
    /// downstream trust decision.
    SignatureFailed,
}

impl DnssecState {
    /// Wire representation used by the persistent cache.
    #[must_use]
    pub const fn to_wire(self) -> i8 {
        match self {
            Self::Unsigned => 0,
            Self::Validated => 1,
            Self::SignatureFailed => -1,
        }
    }

    /// Inverse of [`DnssecState::to_wire`].
    #[must_use]
    pub const fn from_wire(value: i8) -> Option<Self> {
        match value {
            0 => Some(Self::Unsigned),
            1 => Some(Self::Validated),
            -1 => Some(Self::SignatureFailed),
            _ => None,
        }
    }
}
