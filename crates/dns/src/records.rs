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

use crate::name::append_canonical_name;
use crate::Error;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use vdime_cache::{wire, CacheId, CachePayload, DataKind};

/// DNSKEY flag bit marking a zone key.
pub const DNSKEY_FLAG_ZONE: u16 = 0x0100;

/// DNSKEY flag bit marking a secure entry point.
pub const DNSKEY_FLAG_SEP: u16 = 0x0001;

/// Mandatory DNSKEY protocol value.
pub const DNSKEY_PROTOCOL: u8 = 3;

/// The RSA signature algorithms this validator handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DnssecAlgorithm {
    RsaSha1,
    RsaSha256,
    RsaSha512,
}

impl DnssecAlgorithm {
    /// Map a wire algorithm identifier, refusing anything unsupported.
    pub fn from_wire(value: u8) -> Result<Self, Error> {
        match value {
            5 => Ok(Self::RsaSha1),
            8 => Ok(Self::RsaSha256),
            10 => Ok(Self::RsaSha512),
            value => Err(Error::UnsupportedAlgorithm { value }),
        }
    }

    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::RsaSha1 => 5,
            Self::RsaSha256 => 8,
            Self::RsaSha512 => 10,
        }
    }
}

/// DS digest types this validator handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DigestType {
    Sha1,
    Sha256,
}

impl DigestType {
    pub fn from_wire(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::Sha1),
            2 => Ok(Self::Sha256),
            value => Err(Error::UnsupportedAlgorithm { value }),
        }
    }

    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256 => 2,
        }
    }

    /// Exact digest length in bytes.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

/// Compute the keytag of a DNSKEY rdata buffer (RFC 4034 appendix B).
///
/// Not necessarily unique, but discriminating enough to select candidate
/// keys referenced by RRSIG and DS records.
#[must_use]
pub fn keytag(rdata: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for (i, byte) in rdata.iter().enumerate() {
        sum = sum.wrapping_add(if i & 1 == 0 {
            u32::from(*byte) << 8
        } else {
            u32::from(*byte)
        });
    }

    sum = sum.wrapping_add((sum >> 16) & 0xffff);

    #[allow(clippy::cast_possible_truncation)]
    {
        (sum & 0xffff) as u16
    }
}

/// Extract the RSA public key embedded in DNSKEY key material (RFC 3110):
/// a one-byte exponent length (or zero followed by a two-byte length), the
/// exponent, then the modulus. The modulus must measure 512 to 4096 bits.
pub fn rsa_from_dnskey(keydata: &[u8]) -> Result<RsaPublicKey, Error> {
    let bad = |what: &str| Error::BadReply {
        with_source: format!("DNSKEY rdata {what}"),
    };

    let (&first, mut rest) = keydata.split_first().ok_or_else(|| bad("was empty"))?;

    let explen = if first == 0 {
        if rest.len() < 2 {
            return Err(bad("didn't contain enough data"));
        }

        let explen = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
        rest = &rest[2..];
        explen
    } else {
        usize::from(first)
    };

    if rest.len() <= explen {
        return Err(bad("terminated before end of exponent"));
    }

    let (exponent, modulus) = rest.split_at(explen);
    let modulus = BigUint::from_bytes_be(modulus);

    // RFC 3110 bounds the public key size.
    let bits = modulus.bits();
    if !(512..=4096).contains(&bits) {
        return Err(Error::BadReply {
            with_source: format!("modulus of {bits} bits falls outside the 512-4096 bit range"),
        });
    }

    RsaPublicKey::new(modulus, BigUint::from_bytes_be(exponent)).map_err(|e| Error::BadReply {
        with_source: format!("unable to assemble RSA public key: {e}"),
    })
}

/// A DNSKEY resource record held in the object cache. Cross-references to
/// signing keys and covering DS records are by cache id, resolved on
/// demand against the respective stores.
#[derive(Debug, Clone)]
pub struct DnskeyRecord {
    /// Owner name, normalized.
    pub label: String,
    pub algorithm: DnssecAlgorithm,
    /// Zone-key flag bit; keys without it cannot verify RRSIGs.
    pub zone_key: bool,
    /// Secure-entry-point flag bit.
    pub sep: bool,
    pub pubkey: RsaPublicKey,
    pub keytag: u16,
    /// Original rdata, kept for keytag and DS digest reconstruction.
    pub rdata: Vec<u8>,
    /// DNSKEYs whose RRSIG over this record verified.
    pub signkeys: Vec<CacheId>,
    /// DS records whose digest matched this key.
    pub ds: Vec<CacheId>,
    /// Trust anchors carry this directly; other keys earn it transitively.
    pub validated: bool,
    /// Whether the key may be persisted once validated.
    pub do_cache: bool,
}

impl DnskeyRecord {
    /// Cache id string: multiple keys can share an owner, so the keytag is
    /// part of the identity.
    #[must_use]
    pub fn cache_name(label: &str, keytag: u16) -> String {
        format!("{label}-{keytag}")
    }

    /// Whether `other` denotes the same key (owner + keytag).
    #[must_use]
    pub fn matches(&self, label: &str, keytag: u16) -> bool {
        self.keytag == keytag && self.label.eq_ignore_ascii_case(label)
    }
}

impl CachePayload for DnskeyRecord {
    const KIND: DataKind = DataKind::Dnskey;
    const INTERNAL: bool = true;

    fn serialize(&self) -> Result<Vec<u8>, vdime_cache::Error> {
        let mut buf = vec![];

        wire::put_str(&mut buf, Some(&self.label));
        buf.push(self.algorithm.to_wire());
        buf.push(u8::from(self.zone_key));
        buf.push(u8::from(self.sep));
        buf.extend_from_slice(&self.keytag.to_le_bytes());
        wire::put_bytes(&mut buf, &self.rdata);
        buf.push(u8::from(self.validated));

        Ok(buf)
    }

    fn deserialize(data: &[u8]) -> Result<Self, vdime_cache::Error> {
        let decode = |with_source: String| vdime_cache::Error::Decode { with_source };

        let mut rd = wire::Reader::new(data);

        let label = rd
            .str_nul()?
            .ok_or_else(|| decode("DNSKEY record was missing its label".into()))?;
        let algorithm = DnssecAlgorithm::from_wire(rd.u8()?)
            .map_err(|e| decode(e.to_string()))?;
        let zone_key = rd.u8()? != 0;
        let sep = rd.u8()? != 0;
        let keytag = rd.u16()?;
        let rdata = rd.bytes()?;
        let validated = rd.u8()? != 0;

        if rdata.len() < 4 {
            return Err(decode("DNSKEY rdata shorter than its fixed header".into()));
        }

        // The public key is rebuilt from the stored rdata.
        let pubkey = rsa_from_dnskey(&rdata[4..]).map_err(|e| decode(e.to_string()))?;

        Ok(Self {
            label,
            algorithm,
            zone_key,
            sep,
            pubkey,
            keytag,
            rdata,
            signkeys: vec![],
            ds: vec![],
            validated,
            do_cache: true,
        })
    }

    fn clone_payload(&self) -> Self {
        self.clone()
    }

    fn describe(&self) -> String {
        format!(
            "DNSKEY [{}]: keytag = {}, alg = {}, zone = {}, sep = {}, validated = {}",
            self.label,
            self.keytag,
            self.algorithm.to_wire(),
            u8::from(self.zone_key),
            u8::from(self.sep),
            if self.validated { "yes" } else { "no" },
        )
    }
}

/// A DS resource record held in the object cache.
#[derive(Debug, Clone)]
pub struct DsRecord {
    /// Owner name, normalized.
    pub label: String,
    /// Keytag of the DNSKEY this record refers to.
    pub keytag: u16,
    pub algorithm: DnssecAlgorithm,
    pub digest_type: DigestType,
    pub digest: Vec<u8>,
    /// DNSKEYs whose RRSIG over this record verified.
    pub signkeys: Vec<CacheId>,
}

impl DsRecord {
    /// Cache id string: owner, keytag, algorithm and digest type together
    /// identify a DS record.
    #[must_use]
    pub fn cache_name(label: &str, keytag: u16, algorithm: u8, digest_type: u8) -> String {
        format!("{label}-{keytag}-{algorithm}-{digest_type}")
    }

    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.keytag == other.keytag
            && self.algorithm == other.algorithm
            && self.digest_type == other.digest_type
            && self.label.eq_ignore_ascii_case(&other.label)
    }
}

impl CachePayload for DsRecord {
    const KIND: DataKind = DataKind::Ds;
    const INTERNAL: bool = true;

    fn serialize(&self) -> Result<Vec<u8>, vdime_cache::Error> {
        let mut buf = vec![];

        wire::put_str(&mut buf, Some(&self.label));
        buf.extend_from_slice(&self.keytag.to_le_bytes());
        buf.push(self.algorithm.to_wire());
        buf.push(self.digest_type.to_wire());
        wire::put_bytes(&mut buf, &self.digest);

        Ok(buf)
    }

    fn deserialize(data: &[u8]) -> Result<Self, vdime_cache::Error> {
        let decode = |with_source: String| vdime_cache::Error::Decode { with_source };

        let mut rd = wire::Reader::new(data);

        let label = rd
            .str_nul()?
            .ok_or_else(|| decode("DS record was missing its label".into()))?;
        let keytag = rd.u16()?;
        let algorithm =
            DnssecAlgorithm::from_wire(rd.u8()?).map_err(|e| decode(e.to_string()))?;
        let digest_type = DigestType::from_wire(rd.u8()?).map_err(|e| decode(e.to_string()))?;
        let digest = rd.bytes()?;

        if digest.len() != digest_type.digest_len() {
            return Err(decode(format!(
                "DS digest measured {} bytes, expected {}",
                digest.len(),
                digest_type.digest_len()
            )));
        }

        Ok(Self {
            label,
            keytag,
            algorithm,
            digest_type,
            digest,
            signkeys: vec![],
        })
    }

    fn clone_payload(&self) -> Self {
        self.clone()
    }

    fn describe(&self) -> String {
        format!(
            "DS [{}]: keytag = {}, alg = {}, digest = {}",
            self.label,
            self.keytag,
            self.algorithm.to_wire(),
            self.digest_type.to_wire(),
        )
    }
}

/// Digest a DNSKEY for comparison against a DS record (RFC 4034 §5.1.4):
/// the hash runs over the canonical owner name followed by the rdata.
pub fn compute_dnskey_digest(key: &DnskeyRecord, digest_type: DigestType) -> Result<Vec<u8>, Error> {
    let mut buf = vec![];
    append_canonical_name(&mut buf, &key.label)?;
    buf.extend_from_slice(&key.rdata);

    Ok(match digest_type {
        DigestType::Sha1 => Sha1::digest(&buf).to_vec(),
        DigestType::Sha256 => Sha256::digest(&buf).to_vec(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Assemble DNSKEY rdata around an RFC 3110 key blob.
    pub(crate) fn dnskey_rdata(flags: u16, algorithm: u8, keydata: &[u8]) -> Vec<u8> {
        let mut rdata = vec![];
        rdata.extend_from_slice(&flags.to_be_bytes());
        rdata.push(DNSKEY_PROTOCOL);
        rdata.push(algorithm);
        rdata.extend_from_slice(keydata);
        rdata
    }

    /// A syntactically valid 512-bit RFC 3110 key blob.
    pub(crate) fn small_keydata() -> Vec<u8> {
        let mut keydata = vec![3, 1, 0, 1];
        keydata.push(0x80);
        keydata.extend(std::iter::repeat(0x55).take(63));
        keydata
    }

    #[test]
    fn keytag_is_deterministic() {
        let rdata = dnskey_rdata(DNSKEY_FLAG_ZONE, 8, &small_keydata());
        assert_eq!(keytag(&rdata), keytag(&rdata));
    }

    #[test]
    fn keytag_matches_rfc_folding() {
        // Worked by hand over a two-byte buffer: 0x01 << 8 + 0x02.
        assert_eq!(keytag(&[0x01, 0x02]), 0x0102);
        // Odd trailing byte contributes without the shift.
        assert_eq!(keytag(&[0x01, 0x02, 0x03]), 0x0102 + 0x0300);
    }

    #[test]
    fn rsa_key_parses_one_byte_exponent_form() {
        let key = rsa_from_dnskey(&small_keydata()).unwrap();
        assert_eq!(key.e(), &BigUint::from(65537u32));
        assert_eq!(key.n().bits(), 512);
    }

    #[test]
    fn rsa_key_parses_three_byte_exponent_form() {
        let mut keydata = vec![0, 0, 3, 1, 0, 1];
        keydata.push(0x80);
        keydata.extend(std::iter::repeat(0xAA).take(63));

        let key = rsa_from_dnskey(&keydata).unwrap();
        assert_eq!(key.e(), &BigUint::from(65537u32));
    }

    #[rstest::rstest]
    // empty buffer
    #[case(vec![])]
    // exponent length runs past the end
    #[case(vec![8, 1, 2, 3])]
    // modulus below 512 bits
    #[case(vec![1, 3, 0xFF, 0xFF])]
    fn rsa_key_rejects_malformed_input(#[case] keydata: Vec<u8>) {
        assert!(rsa_from_dnskey(&keydata).is_err());
    }

    #[test]
    fn dnskey_round_trips_through_the_cache_format() {
        let rdata = dnskey_rdata(DNSKEY_FLAG_ZONE | DNSKEY_FLAG_SEP, 8, &small_keydata());
        let record = DnskeyRecord {
            label: "example.com".into(),
            algorithm: DnssecAlgorithm::RsaSha256,
            zone_key: true,
            sep: true,
            pubkey: rsa_from_dnskey(&small_keydata()).unwrap(),
            keytag: keytag(&rdata),
            rdata,
            signkeys: vec![],
            ds: vec![],
            validated: true,
            do_cache: true,
        };

        let restored = DnskeyRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(restored.label, record.label);
        assert_eq!(restored.algorithm, record.algorithm);
        assert_eq!(restored.keytag, record.keytag);
        assert_eq!(restored.rdata, record.rdata);
        assert_eq!(restored.pubkey, record.pubkey);
        assert!(restored.validated);
    }

    #[test]
    fn ds_round_trips_through_the_cache_format() {
        let record = DsRecord {
            label: "example.com".into(),
            keytag: 12345,
            algorithm: DnssecAlgorithm::RsaSha256,
            digest_type: DigestType::Sha256,
            digest: vec![7; 32],
            signkeys: vec![],
        };

        let restored = DsRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(restored.label, record.label);
        assert_eq!(restored.keytag, record.keytag);
        assert_eq!(restored.digest, record.digest);
    }

    #[test]
    fn ds_digest_length_must_match_digest_type() {
        let record = DsRecord {
            label: "example.com".into(),
            keytag: 1,
            algorithm: DnssecAlgorithm::RsaSha1,
            digest_type: DigestType::Sha256,
            digest: vec![7; 20],
            signkeys: vec![],
        };

        assert!(DsRecord::deserialize(&record.serialize().unwrap()).is_err());
    }

    #[test]
    fn dnskey_digest_covers_canonical_owner_and_rdata() {
        let rdata = dnskey_rdata(DNSKEY_FLAG_ZONE, 8, &small_keydata());
        let record = DnskeyRecord {
            label: "Example.COM".into(),
            algorithm: DnssecAlgorithm::RsaSha256,
            zone_key: true,
            sep: false,
            pubkey: rsa_from_dnskey(&small_keydata()).unwrap(),
            keytag: keytag(&rdata),
            rdata: rdata.clone(),
            signkeys: vec![],
            ds: vec![],
            validated: false,
            do_cache: true,
        };

        let mut expected_input = b"\x07example\x03com\x00".to_vec();
        expected_input.extend_from_slice(&rdata);

        assert_eq!(
            compute_dnskey_digest(&record, DigestType::Sha256).unwrap(),
            Sha256::digest(&expected_input).to_vec()
        );
        assert_eq!(
            compute_dnskey_digest(&record, DigestType::Sha1).unwrap().len(),
            20
        );
    }
}
