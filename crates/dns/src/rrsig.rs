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

use crate::client::AnswerRecord;
use crate::name::append_canonical_name;
use crate::records::{DnskeyRecord, DnssecAlgorithm};
use crate::Error;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// The DNS class of every record this validator touches.
pub(crate) const CLASS_IN: u16 = 1;

/// Parsed RRSIG rdata, retaining everything needed to reconstruct the
/// signed byte stream.
#[derive(Debug, Clone)]
pub struct RrsigInfo {
    /// Record type covered by this signature.
    pub covered: u16,
    pub algorithm: DnssecAlgorithm,
    /// Label count of the original owner name.
    pub labels: u8,
    /// Original TTL of the covered RRSET in the authoritative zone.
    pub original_ttl: u32,
    /// UTC second past which the signature must not be used.
    pub expiration: u32,
    /// UTC second before which the signature must not be used.
    pub inception: u32,
    /// Keytag selecting the signing DNSKEY.
    pub keytag: u16,
    /// Owner of the signing DNSKEY, normalized.
    pub signer: String,
    pub signature: Vec<u8>,
}

/// Compare two rdata buffers for canonical RRSET ordering (RFC 4034 §6.3):
/// left-justified octet sequences where the absence of an octet sorts
/// before a zero octet.
#[must_use]
pub fn compare_rdata(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    let min = a.len().min(b.len());

    match a[..min].cmp(&b[..min]) {
        std::cmp::Ordering::Equal => a.len().cmp(&b.len()),
        other => other,
    }
}

/// Sort answer records into canonical order by rdata.
pub fn sort_rrset_canonical(records: &mut [&AnswerRecord]) {
    records.sort_by(|a, b| compare_rdata(&a.rdata, &b.rdata));
}

/// Reconstruct the byte stream covered by an RRSIG (RFC 4034 §3.1.8.1):
/// the RRSIG rdata without its signature, the canonical signer name, then
/// every matching RR in canonical order as
/// `owner | type | class | original-ttl | rdlen | rdata`.
///
/// # Errors
///
/// Fails when the covered set is empty or a name cannot be packed.
pub fn signed_stream(
    label: &str,
    rrsig: &RrsigInfo,
    answers: &[AnswerRecord],
) -> Result<Vec<u8>, Error> {
    let mut stream = vec![];

    stream.extend_from_slice(&rrsig.covered.to_be_bytes());
    stream.push(rrsig.algorithm.to_wire());
    stream.push(rrsig.labels);
    stream.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
    stream.extend_from_slice(&rrsig.expiration.to_be_bytes());
    stream.extend_from_slice(&rrsig.inception.to_be_bytes());
    stream.extend_from_slice(&rrsig.keytag.to_be_bytes());
    append_canonical_name(&mut stream, &rrsig.signer)?;

    let mut covered: Vec<&AnswerRecord> = answers
        .iter()
        .filter(|rr| {
            rr.class == CLASS_IN && rr.rtype == rrsig.covered && rr.name.eq_ignore_ascii_case(label)
        })
        .collect();

    if covered.is_empty() {
        return Err(Error::Verification {
            with_source: "no matching RRs were found for the covered type".into(),
        });
    }

    sort_rrset_canonical(&mut covered);

    for rr in covered {
        append_canonical_name(&mut stream, label)?;
        stream.extend_from_slice(&rr.rtype.to_be_bytes());
        stream.extend_from_slice(&rr.class.to_be_bytes());
        // The TTL is the original TTL taken from the RRSIG record.
        stream.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
        #[allow(clippy::cast_possible_truncation)]
        stream.extend_from_slice(&(rr.rdata.len() as u16).to_be_bytes());
        stream.extend_from_slice(&rr.rdata);
    }

    Ok(stream)
}

/// Check the RRSIG validity window against the current UTC time. The
/// inception second itself is acceptable; the first second past the
/// expiration is not.
pub fn check_validity_window(rrsig: &RrsigInfo, now: u64) -> Result<(), Error> {
    if now < u64::from(rrsig.inception) {
        return Err(Error::Verification {
            with_source: "current time is before RR inception time".into(),
        });
    }

    if now > u64::from(rrsig.expiration) {
        return Err(Error::Verification {
            with_source: "current time is after RR expiration time".into(),
        });
    }

    Ok(())
}

/// Verify an RRSIG over the matching answer RRSET with the given signing
/// key. Returns `Ok(false)` when the RSA signature simply does not match.
pub fn verify_rrsig(
    label: &str,
    rrsig: &RrsigInfo,
    answers: &[AnswerRecord],
    signing_key: &DnskeyRecord,
) -> Result<bool, Error> {
    check_validity_window(rrsig, vdime_cache::unix_now())?;

    let stream = signed_stream(label, rrsig, answers)?;

    let verified = match rrsig.algorithm {
        DnssecAlgorithm::RsaSha1 => signing_key.pubkey.verify(
            Pkcs1v15Sign::new::<Sha1>(),
            &Sha1::digest(&stream),
            &rrsig.signature,
        ),
        DnssecAlgorithm::RsaSha256 => signing_key.pubkey.verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(&stream),
            &rrsig.signature,
        ),
        DnssecAlgorithm::RsaSha512 => signing_key.pubkey.verify(
            Pkcs1v15Sign::new::<Sha512>(),
            &Sha512::digest(&stream),
            &rrsig.signature,
        ),
    };

    match verified {
        Ok(()) => {
            tracing::debug!(
                signed = label,
                keytag = rrsig.keytag,
                covered = rrsig.covered,
                alg = rrsig.algorithm.to_wire(),
                "signature verification succeeded"
            );
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(
                signed = label,
                keytag = rrsig.keytag,
                covered = rrsig.covered,
                %e,
                "signature verification failed"
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rr(name: &str, rtype: u16, rdata: &[u8]) -> AnswerRecord {
        AnswerRecord {
            name: name.to_owned(),
            rtype,
            class: CLASS_IN,
            ttl: 300,
            rdata: rdata.to_vec(),
        }
    }

    fn rrsig(covered: u16) -> RrsigInfo {
        RrsigInfo {
            covered,
            algorithm: DnssecAlgorithm::RsaSha256,
            labels: 2,
            original_ttl: 3600,
            expiration: u32::MAX,
            inception: 0,
            keytag: 4242,
            signer: "example.com".into(),
            signature: vec![0; 64],
        }
    }

    #[rstest::rstest]
    #[case(&[1, 2, 3][..], &[1, 2, 4][..], std::cmp::Ordering::Less)]
    #[case(&[1, 2, 4][..], &[1, 2, 3][..], std::cmp::Ordering::Greater)]
    // shorter-with-equal-prefix sorts first
    #[case(&[1, 2][..], &[1, 2, 0][..], std::cmp::Ordering::Less)]
    #[case(&[1, 2, 3][..], &[1, 2, 3][..], std::cmp::Ordering::Equal)]
    fn canonical_rdata_ordering(
        #[case] a: &[u8],
        #[case] b: &[u8],
        #[case] expected: std::cmp::Ordering,
    ) {
        assert_eq!(compare_rdata(a, b), expected);
    }

    #[test]
    fn ordering_is_total_over_distinct_rdata() {
        let records = [&[3u8, 1][..], &[1, 2, 3], &[1, 2], &[0xFF]];

        for a in &records {
            for b in &records {
                if a != b {
                    let ab = compare_rdata(a, b);
                    let ba = compare_rdata(b, a);
                    assert_ne!(ab, std::cmp::Ordering::Equal);
                    assert_eq!(ab, ba.reverse());
                }
            }
        }
    }

    #[test]
    fn signed_stream_orders_and_frames_the_rrset() {
        let answers = vec![
            rr("example.com", 16, b"\x03two"),
            rr("example.com", 16, b"\x03one"),
            // different type is excluded
            rr("example.com", 48, b"zzz"),
            // different owner is excluded
            rr("other.com", 16, b"\x03aaa"),
        ];

        let stream = signed_stream("example.com", &rrsig(16), &answers).unwrap();

        // RRSIG rdata prefix: 2+1+1+4+4+4+2 = 18 bytes, then the signer.
        let mut expected = vec![];
        expected.extend_from_slice(&16u16.to_be_bytes());
        expected.push(8);
        expected.push(2);
        expected.extend_from_slice(&3600u32.to_be_bytes());
        expected.extend_from_slice(&u32::MAX.to_be_bytes());
        expected.extend_from_slice(&0u32.to_be_bytes());
        expected.extend_from_slice(&4242u16.to_be_bytes());
        expected.extend_from_slice(b"\x07example\x03com\x00");

        for rdata in [&b"\x03one"[..], &b"\x03two"[..]] {
            expected.extend_from_slice(b"\x07example\x03com\x00");
            expected.extend_from_slice(&16u16.to_be_bytes());
            expected.extend_from_slice(&CLASS_IN.to_be_bytes());
            expected.extend_from_slice(&3600u32.to_be_bytes());
            expected.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            expected.extend_from_slice(rdata);
        }

        assert_eq!(stream, expected);
    }

    #[test]
    fn empty_covered_set_is_a_verification_failure() {
        let answers = vec![rr("example.com", 48, b"key")];
        assert!(signed_stream("example.com", &rrsig(16), &answers).is_err());
    }

    #[test]
    fn validity_window_edges() {
        let mut sig = rrsig(16);
        sig.inception = 1_000;
        sig.expiration = 2_000;

        // Inception exactly equal to now is acceptable.
        assert!(check_validity_window(&sig, 1_000).is_ok());
        assert!(check_validity_window(&sig, 999).is_err());
        // Expiration second itself still verifies; one past fails.
        assert!(check_validity_window(&sig, 2_000).is_ok());
        assert!(check_validity_window(&sig, 2_001).is_err());
    }
}
