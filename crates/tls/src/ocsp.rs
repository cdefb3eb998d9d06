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

//! OCSP revocation checking (RFC 6960) with cached responses.
//!
//! Responses are cached as their raw DER bytes in an internal store whose
//! entries expire at the response's `nextUpdate`. Reachability problems
//! soft-pass; a verified `revoked` status or a bad response signature is a
//! hard failure.

use crate::cert::ParsedCert;
use crate::Error;
use bcder::decode::Constructed;
use bcder::encode::{self, PrimitiveContent, Values};
use bcder::{Mode, OctetString, Oid, Tag};
use sha1::{Digest, Sha1};
use vdime_cache::{CachePayload, DataKind, Store};

/// OID 1.3.14.3.2.26 (SHA-1), the digest OCSP cert ids are built with.
const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];

/// OID 1.3.6.1.5.5.7.48.1.1 (id-pkix-ocsp-basic).
const OID_OCSP_BASIC: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01];

/// OID 1.3.6.1.5.5.7.48.1.2 (id-pkix-ocsp-nonce).
const OID_OCSP_NONCE: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x02];

/// Maximum tolerated clock skew around thisUpdate/nextUpdate, in seconds.
const MAX_SKEW: i64 = 300;

/// A raw OCSP response held in the object cache.
#[derive(Debug, Clone)]
pub struct OcspResponseData {
    /// DER bytes exactly as received from the responder.
    pub der: Vec<u8>,
}

impl CachePayload for OcspResponseData {
    const KIND: DataKind = DataKind::Ocsp;
    const INTERNAL: bool = true;

    fn serialize(&self) -> Result<Vec<u8>, vdime_cache::Error> {
        Ok(self.der.clone())
    }

    fn deserialize(data: &[u8]) -> Result<Self, vdime_cache::Error> {
        if data.is_empty() {
            return Err(vdime_cache::Error::Decode {
                with_source: "empty OCSP response record".into(),
            });
        }

        Ok(Self { der: data.to_vec() })
    }

    fn clone_payload(&self) -> Self {
        self.clone()
    }

    fn describe(&self) -> String {
        format!("OCSP response ({} bytes)", self.der.len())
    }
}

/// Outcome of an OCSP validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspVerdict {
    /// Status was good and every check passed.
    Good,
    /// OCSP was administratively unreachable (no responder URI, transport
    /// error, non-successful response status); the ladder falls through.
    Unavailable,
    /// The certificate is revoked or the response failed verification.
    Failed,
}

struct OcspRequest {
    der: Vec<u8>,
    certid_der: Vec<u8>,
    nonce_extn_value: Vec<u8>,
}

/// Parsed subset of a BasicOCSPResponse.
struct ParsedResponse {
    tbs_der: Vec<u8>,
    signature: Vec<u8>,
    certid_der: Vec<u8>,
    /// 0 = good, 1 = revoked, 2 = unknown.
    cert_status: u8,
    this_update: i64,
    next_update: Option<i64>,
    nonce_extn_value: Option<Vec<u8>>,
}

fn ocsp_err(with_source: impl Into<String>) -> Error {
    Error::Ocsp {
        with_source: with_source.into(),
    }
}

/// CertID encoder shared by the request body and the standalone DER copy
/// kept for response matching.
struct CertIdParts {
    name_hash: Vec<u8>,
    key_hash: Vec<u8>,
    serial: bcder::Integer,
}

impl CertIdParts {
    fn for_pair(peer: &ParsedCert, issuer: &ParsedCert) -> Result<Self, Error> {
        Ok(Self {
            name_hash: Sha1::digest(peer.issuer_der()?).to_vec(),
            key_hash: Sha1::digest(issuer.public_key_bits()).to_vec(),
            serial: peer.serial_number(),
        })
    }

    fn values(&self) -> impl Values + '_ {
        encode::sequence((
            encode::sequence((Oid(OID_SHA1).encode(), ().encode())),
            OctetString::new(self.name_hash.clone().into()).encode(),
            OctetString::new(self.key_hash.clone().into()).encode(),
            self.serial.encode(),
        ))
    }

    fn to_der(&self) -> Result<Vec<u8>, Error> {
        let mut out = vec![];
        self.values()
            .write_encoded(Mode::Der, &mut out)
            .map_err(|e| ocsp_err(format!("could not encode certificate id: {e}")))?;

        Ok(out)
    }
}

/// Assemble an OCSPRequest around a CertID, with a random nonce extension
/// attached.
fn build_request(certid: &CertIdParts) -> Result<OcspRequest, Error> {
    let nonce: [u8; 16] = rand::random();

    // The nonce extension value is an OCTET STRING wrapping the DER
    // encoding of the nonce octets.
    let mut nonce_extn_value = vec![0x04, nonce.len() as u8];
    nonce_extn_value.extend_from_slice(&nonce);

    let extension = encode::sequence((
        Oid(OID_OCSP_NONCE).encode(),
        OctetString::new(nonce_extn_value.clone().into()).encode(),
    ));

    let tbs = encode::sequence((
        // requestList with one Request around the CertID
        encode::sequence((encode::sequence((certid.values(),)),)),
        // requestExtensions [2] EXPLICIT
        encode::sequence_as(Tag::CTX_2, (encode::sequence((extension,)),)),
    ));

    let mut der = vec![];
    encode::sequence((tbs,))
        .write_encoded(Mode::Der, &mut der)
        .map_err(|e| ocsp_err(format!("could not encode OCSP request: {e}")))?;

    Ok(OcspRequest {
        der,
        certid_der: certid.to_der()?,
        nonce_extn_value,
    })
}

fn time_to_unix(time: x509_certificate::asn1time::Time) -> i64 {
    match time {
        x509_certificate::asn1time::Time::UtcTime(utc) => (*utc).timestamp(),
        x509_certificate::asn1time::Time::GeneralTime(gt) => {
            chrono::DateTime::<chrono::Utc>::from(gt).timestamp()
        }
    }
}

/// Decode an OCSPResponse down to the fields the verifier needs.
fn parse_response(der: &[u8]) -> Result<Option<ParsedResponse>, Error> {
    let decode_err = |e: &dyn std::fmt::Display| ocsp_err(format!("malformed OCSP response: {e}"));

    let basic_der = Constructed::decode(der, Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            let status = cons.take_primitive_if(Tag::ENUMERATED, |prim| {
                let bytes = prim.take_all()?;
                Ok(bytes.first().copied().unwrap_or(u8::MAX))
            })?;

            if status != 0 {
                // Not successful; surfaced to the caller as unavailable.
                cons.capture_all()?;
                return Ok(None);
            }

            cons.take_constructed_if(Tag::CTX_0, |cons| {
                cons.take_sequence(|cons| {
                    let rtype = Oid::take_from(cons)?;

                    if rtype.as_ref() != OID_OCSP_BASIC {
                        return Err(cons.content_err("unexpected OCSP response type"));
                    }

                    let response = OctetString::take_from(cons)?;
                    Ok(Some(response.to_bytes()))
                })
            })
        })
    })
    .map_err(|e| decode_err(&e))?;

    let Some(basic_der) = basic_der else {
        return Ok(None);
    };

    let parsed = Constructed::decode(basic_der.as_ref(), Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            // tbsResponseData, captured raw for signature verification.
            let tbs = cons.capture_one()?;
            // signatureAlgorithm
            let _alg = cons.take_sequence(|cons| cons.capture_all())?;
            let signature = bcder::BitString::take_from(cons)?;
            // optional certs [0]; ignored, verification runs against the
            // TLS chain.
            cons.capture_all()?;

            Ok((tbs, signature))
        })
    })
    .map_err(|e| decode_err(&e))?;

    let (tbs, signature) = parsed;
    let tbs_der = tbs.as_slice().to_vec();

    let details = Constructed::decode(tbs.as_slice(), Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            // version [0] EXPLICIT, default v1
            cons.take_opt_constructed_if(Tag::CTX_0, |cons| bcder::Integer::take_from(cons))?;

            // responderID CHOICE [1] byName | [2] byKey
            if cons
                .take_opt_constructed_if(Tag::CTX_1, |cons| cons.capture_all())?
                .is_none()
            {
                cons.take_constructed_if(Tag::CTX_2, |cons| cons.capture_all())?;
            }

            // producedAt
            x509_certificate::asn1time::Time::take_from(cons)?;

            // responses: only the first single response matters here, but
            // the rest must still be consumed.
            let single = cons.take_sequence(|cons| {
                let first = cons.take_sequence(|cons| {
                    let certid = cons.capture_one()?;

                    let status = if cons
                        .take_opt_primitive_if(Tag::CTX_0, |prim| prim.skip_all())?
                        .is_some()
                    {
                        0u8
                    } else if cons
                        .take_opt_constructed_if(Tag::CTX_1, |cons| cons.capture_all())?
                        .is_some()
                    {
                        1u8
                    } else {
                        cons.take_primitive_if(Tag::CTX_2, |prim| prim.skip_all())?;
                        2u8
                    };

                    let this_update = x509_certificate::asn1time::Time::take_from(cons)?;
                    let next_update = cons
                        .take_opt_constructed_if(Tag::CTX_0, |cons| {
                            x509_certificate::asn1time::Time::take_from(cons)
                        })?;
                    // singleExtensions
                    cons.capture_all()?;

                    Ok((certid, status, this_update, next_update))
                })?;

                // Remaining single responses.
                cons.capture_all()?;

                Ok(first)
            })?;

            // responseExtensions [1] EXPLICIT Extensions OPTIONAL
            let nonce = cons.take_opt_constructed_if(Tag::CTX_1, |cons| {
                cons.take_sequence(|cons| {
                    let mut nonce = None;

                    while let Some(value) = cons.take_opt_sequence(|cons| {
                        let id = Oid::take_from(cons)?;
                        // Critical flag is absent on OCSP extensions in
                        // practice; tolerate it when present.
                        cons.take_opt_primitive_if(Tag::BOOLEAN, |prim| prim.skip_all())?;
                        let value = OctetString::take_from(cons)?;
                        Ok((id.as_ref() == OID_OCSP_NONCE).then(|| value.to_bytes().to_vec()))
                    })? {
                        nonce = nonce.or(value);
                    }

                    Ok(nonce)
                })
            })?;

            Ok((single, nonce.flatten()))
        })
    })
    .map_err(|e| decode_err(&e))?;

    let ((certid, cert_status, this_update, next_update), nonce_extn_value) = details;

    Ok(Some(ParsedResponse {
        tbs_der,
        signature: signature.octet_bytes().to_vec(),
        certid_der: certid.as_slice().to_vec(),
        cert_status,
        this_update: time_to_unix(this_update),
        next_update: next_update.map(time_to_unix),
        nonce_extn_value,
    }))
}

/// Verify the basic-response signature against the TLS chain.
fn verify_response_signature(parsed: &ParsedResponse, chain: &[Vec<u8>]) -> bool {
    for der in chain {
        let Ok(cert) = x509_certificate::CapturedX509Certificate::from_der(der.clone()) else {
            continue;
        };

        if cert
            .verify_signed_data(&parsed.tbs_der, &parsed.signature)
            .is_ok()
        {
            return true;
        }
    }

    false
}

/// Every post-transport check over a (possibly cached) response. `nonce`
/// is only compared for fresh responses; cached replays skip it.
fn evaluate_response(
    parsed: &ParsedResponse,
    certid_der: &[u8],
    nonce_extn_value: Option<&[u8]>,
    chain: &[Vec<u8>],
) -> Result<OcspVerdict, Error> {
    if let Some(sent) = nonce_extn_value {
        match parsed.nonce_extn_value.as_deref() {
            Some(echoed) if echoed == sent => {
                tracing::debug!("nonce in OCSP response matched request");
            }
            Some(_) => {
                return Err(ocsp_err("OCSP verification failed because of response nonce mismatch"));
            }
            None => tracing::debug!("no nonce was found in OCSP response"),
        }
    }

    if !verify_response_signature(parsed, chain) {
        tracing::warn!("basic OCSP response signature verification failed");
        return Ok(OcspVerdict::Failed);
    }

    if parsed.certid_der != certid_der {
        tracing::warn!("OCSP response did not answer for the expected certificate id");
        return Ok(OcspVerdict::Failed);
    }

    match parsed.cert_status {
        0 => {}
        1 => {
            tracing::warn!("OCSP reports the certificate as revoked");
            return Ok(OcspVerdict::Failed);
        }
        _ => {
            tracing::warn!("OCSP reports the certificate status as unknown");
            return Ok(OcspVerdict::Failed);
        }
    }

    // thisUpdate/nextUpdate within the allowed skew of now.
    let now = chrono::Utc::now().timestamp();

    if parsed.this_update > now + MAX_SKEW {
        tracing::warn!("OCSP response thisUpdate lies in the future");
        return Ok(OcspVerdict::Failed);
    }

    if let Some(next_update) = parsed.next_update {
        if next_update < now - MAX_SKEW {
            tracing::warn!("OCSP response has expired");
            return Ok(OcspVerdict::Failed);
        }
    }

    Ok(OcspVerdict::Good)
}

/// OCSP validator owning the response cache and the HTTP transport.
#[derive(Debug)]
pub struct OcspStore {
    /// Internal store: entries are shared, not deep-copied.
    pub store: Store<OcspResponseData>,
    http: reqwest::Client,
}

impl Default for OcspStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OcspStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Cache key for a certificate's OCSP response: subject CN plus the
    /// hex SHA-1 of its DER cert id.
    fn cache_name(peer: &ParsedCert, certid_der: &[u8]) -> Option<String> {
        let cn = peer.common_name()?;
        let digest = Sha1::digest(certid_der);
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        Some(format!("{cn}-{hex}"))
    }

    /// Run OCSP validation for a peer certificate against its issuer,
    /// consulting the cache before going out on the network.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn validate(
        &self,
        peer: &ParsedCert,
        issuer: &ParsedCert,
        chain: &[Vec<u8>],
    ) -> Result<OcspVerdict, Error> {
        let certid = CertIdParts::for_pair(peer, issuer)?;
        let certid_der = certid.to_der()?;
        let cache_name = Self::cache_name(peer, &certid_der);

        if let Some(name) = &cache_name {
            let cached = self.store.with(&vdime_cache::cache_id(name), |data| data.der.clone());

            if let Some(der) = cached {
                tracing::debug!("retrieved cached OCSP response");

                match parse_response(&der)? {
                    // The nonce is not re-checked on a cached response.
                    Some(parsed) => {
                        let verdict = evaluate_response(&parsed, &certid_der, None, chain)?;

                        if verdict == OcspVerdict::Good {
                            tracing::debug!("certificate passed cached OCSP response validation");
                            return Ok(verdict);
                        }

                        // A cached response that stopped verifying is
                        // dropped and re-fetched.
                        self.store.remove(&vdime_cache::cache_id(name));
                    }
                    None => {
                        self.store.remove(&vdime_cache::cache_id(name));
                    }
                }
            }
        }

        let Some(uri) = peer.ocsp_uri() else {
            tracing::debug!("could not find OCSP server URI in certificate");
            return Ok(OcspVerdict::Unavailable);
        };

        let request = build_request(&certid)?;

        tracing::debug!(uri, "issuing OCSP request");

        let response = match self
            .http
            .post(&uri)
            .header(reqwest::header::CONTENT_TYPE, "application/ocsp-request")
            .body(request.der.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(uri, %e, "OCSP responder was unreachable");
                return Ok(OcspVerdict::Unavailable);
            }
        };

        if !response.status().is_success() {
            tracing::warn!(uri, status = %response.status(), "OCSP responder answered with an error");
            return Ok(OcspVerdict::Unavailable);
        }

        let body = response.bytes().await.map_err(|e| Error::Ocsp {
            with_source: format!("could not read OCSP response body: {e}"),
        })?;

        let Some(parsed) = parse_response(&body)? else {
            // Responder answered but refused the request (tryLater etc.).
            tracing::warn!(uri, "OCSP response was not successful");
            return Ok(OcspVerdict::Unavailable);
        };

        let verdict = evaluate_response(
            &parsed,
            &request.certid_der,
            Some(&request.nonce_extn_value),
            chain,
        )?;

        if verdict == OcspVerdict::Good {
            if let Some(name) = cache_name {
                let expiration = parsed
                    .next_update
                    .and_then(|ts| u64::try_from(ts).ok())
                    .unwrap_or(0);

                // The store is internal, so the single response instance
                // is shared with every later lookup.
                let _ = self.store.add(
                    &name,
                    0,
                    expiration,
                    OcspResponseData { der: body.to_vec() },
                    true,
                    false,
                );
            }

            tracing::debug!("certificate passed OCSP validation");
        }

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn nonce_extension_value_wraps_the_nonce_octets() {
        let certid = CertIdParts {
            name_hash: vec![1; 20],
            key_hash: vec![2; 20],
            serial: bcder::Integer::from(5u8),
        };
        let request = build_request(&certid).unwrap();

        assert_eq!(request.nonce_extn_value[0], 0x04);
        assert_eq!(request.nonce_extn_value[1] as usize, 16);
        assert_eq!(request.nonce_extn_value.len(), 18);
        // The request embeds the raw CertID bytes it was given.
        assert!(request
            .der
            .windows(request.certid_der.len())
            .any(|w| w == request.certid_der));
    }

    #[test]
    fn malformed_response_is_an_error() {
        assert!(parse_response(b"\x30\x03\x0a\x01").is_err());
    }
}
