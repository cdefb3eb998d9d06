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

//! DIME management records: the `_dx.<domain>` TXT record declaring a
//! domain's trust policy, organizational signing keys, TLS bindings and
//! delivery hosts.

mod error;
mod record;
mod retrieve;

pub use error::Error;
pub use record::{parse_dime_record, DimeRecord, MsgPolicy, SubdomainPolicy};
pub use retrieve::DimeRecordStore;

/// DIME management record syntax version this client understands.
pub const DIME_VERSION: u16 = 1;

/// DNS label prefixed to a domain to locate its management record.
pub const DIME_RECORD_DNS_PREFIX: &str = "_dx";

/// Size of an Ed25519 public key (POK) in bytes.
pub const POK_SIZE: usize = 32;

/// Size of an Ed25519 signature (TLS binding) in bytes.
pub const TLS_SIG_SIZE: usize = 64;

/// Unpadded base64 width of a POK.
pub const POK_B64_SIZE: usize = 43;

/// Unpadded base64 width of a TLS binding signature.
pub const TLS_SIG_B64_SIZE: usize = 86;
