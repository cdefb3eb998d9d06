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

//! The signet resolver: orchestrates DNS/DNSSEC, DIME management records,
//! the DMTP protocol and TLS binding verification to turn an email-style
//! address into a validated signet, caching every intermediate artifact.

mod armor;
mod config;
mod error;
mod resolver;
mod signet;

pub use armor::{read_armored_key, read_ed25519_signing_key, ArmorTag};
pub use config::{Config, ResolverChoice};
pub use error::Error;
pub use resolver::DimeResolver;
pub use signet::{split_signet_name, CachedSignet, SignetCodec, SignetStrength};
