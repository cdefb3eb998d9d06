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

use crate::Error;
use vdime_cache::{wire, CachePayload, DataKind};

/// Outcome of a full signet validation pass, in increasing strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SignetStrength {
    /// Nothing verified.
    None,
    /// The core self-signature verified but the chain of custody did not.
    Core,
    /// Every applicable signature verified; the only acceptable outcome
    /// for the resolver.
    Full,
}

/// The signet library contract the resolver builds on (the signet wire
/// format and its cryptographic verification live outside this crate).
pub trait SignetCodec {
    /// A decoded signet.
    type Signet;

    /// Decode the base64 payload carried by a SGNT reply.
    fn deserialize_b64(&self, b64: &str) -> Result<Self::Signet, Error>;

    /// Validate a signet against its verification context: an optional
    /// previous chain-of-custody signet, the organizational signet (for
    /// user signets) or the domain's POK list (for org signets).
    fn validate_all(
        &self,
        signet: &Self::Signet,
        previous: Option<&Self::Signet>,
        org: Option<&Self::Signet>,
        pok_list: Option<&[[u8; 32]]>,
    ) -> SignetStrength;
}

/// A validated signet held in the object cache under the exact name it
/// was requested by, as its base64 transport form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSignet {
    pub name: String,
    pub b64: String,
}

impl CachePayload for CachedSignet {
    const KIND: DataKind = DataKind::Signet;

    fn serialize(&self) -> Result<Vec<u8>, vdime_cache::Error> {
        let mut buf = vec![];
        wire::put_str(&mut buf, Some(&self.name));
        wire::put_str(&mut buf, Some(&self.b64));

        Ok(buf)
    }

    fn deserialize(data: &[u8]) -> Result<Self, vdime_cache::Error> {
        let mut rd = wire::Reader::new(data);

        let name = rd.str_nul()?.ok_or_else(|| vdime_cache::Error::Decode {
            with_source: "cached signet was missing its name".into(),
        })?;
        let b64 = rd.str_nul()?.ok_or_else(|| vdime_cache::Error::Decode {
            with_source: "cached signet was missing its payload".into(),
        })?;

        Ok(Self { name, b64 })
    }

    fn clone_payload(&self) -> Self {
        self.clone()
    }

    fn describe(&self) -> String {
        format!("signet [{}] ({} base64 bytes)", self.name, self.b64.len())
    }
}

/// Split a signet address into `(domain, is_org)`: a bare domain names an
/// organizational signet, `user@domain` a user signet. A second `@` in
/// the domain part is invalid.
pub fn split_signet_name(name: &str) -> Result<(&str, bool), Error> {
    match name.split_once('@') {
        None => Ok((name, true)),
        Some((_, domain)) => {
            if domain.contains('@') {
                return Err(Error::BadName {
                    with_source: format!("{name:?} contains more than one '@'"),
                });
            }

            Ok((domain, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case("darkmail.example", "darkmail.example", true)]
    #[case("alice@darkmail.example", "darkmail.example", false)]
    fn address_splitting(#[case] name: &str, #[case] domain: &str, #[case] is_org: bool) {
        assert_eq!(split_signet_name(name).unwrap(), (domain, is_org));
    }

    #[test]
    fn second_at_sign_is_rejected() {
        assert!(split_signet_name("alice@bob@darkmail.example").is_err());
    }

    #[test]
    fn cached_signet_round_trips() {
        let signet = CachedSignet {
            name: "alice@darkmail.example".into(),
            b64: "c2lnbmV0".into(),
        };

        let restored = CachedSignet::deserialize(&signet.serialize().unwrap()).unwrap();
        assert_eq!(restored, signet);
    }

    #[test]
    fn strength_is_ordered() {
        assert!(SignetStrength::Full > SignetStrength::Core);
        assert!(SignetStrength::Core > SignetStrength::None);
    }
}
