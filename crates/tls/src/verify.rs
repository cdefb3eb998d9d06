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

use crate::cert::ParsedCert;
use crate::hostname::check_hostname;
use crate::ocsp::{OcspStore, OcspVerdict};
use crate::Error;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};
use vdime_dns::DnssecState;
use vdime_mrec::DimeRecord;

static ALL_SIGALGS: &[&webpki::SignatureAlgorithm] = &[
    &webpki::ECDSA_P256_SHA256,
    &webpki::ECDSA_P256_SHA384,
    &webpki::ECDSA_P384_SHA256,
    &webpki::ECDSA_P384_SHA384,
    &webpki::ED25519,
    &webpki::RSA_PKCS1_2048_8192_SHA256,
    &webpki::RSA_PKCS1_2048_8192_SHA384,
    &webpki::RSA_PKCS1_2048_8192_SHA512,
    &webpki::RSA_PKCS1_3072_8192_SHA384,
];

/// Try every (TLS signature, POK) pair of the management record against
/// the SHA-512 hash of the certificate DER.
pub(crate) fn check_tls_binding(cert_der: &[u8], record: &DimeRecord) -> bool {
    let hash = Sha512::digest(cert_der);

    for sig_bytes in &record.tls_sigs {
        let signature = Signature::from_bytes(sig_bytes);

        // Any of the POKs may have produced the signature, so each one is
        // tried in turn.
        for pok in &record.pok {
            let Ok(key) = VerifyingKey::from_bytes(pok) else {
                tracing::warn!("DIME record carried a POK that is not a valid Ed25519 key");
                continue;
            };

            if key.verify(&hash, &signature).is_ok() {
                return true;
            }
        }
    }

    false
}

/// Verify the peer chain against the root bundle, without any hostname
/// semantics (those were settled one ladder step earlier).
fn check_chain(chain: &[Vec<u8>]) -> Result<bool, Error> {
    let end_entity = match webpki::EndEntityCert::try_from(chain[0].as_slice()) {
        Ok(cert) => cert,
        Err(e) => {
            return Err(Error::Certificate {
                with_source: format!("could not parse peer certificate: {e}"),
            })
        }
    };

    let anchors: Vec<webpki::TrustAnchor<'_>> = webpki_roots::TLS_SERVER_ROOTS
        .iter()
        .map(|ta| webpki::TrustAnchor {
            subject: ta.subject,
            spki: ta.spki,
            name_constraints: ta.name_constraints,
        })
        .collect();

    let time = webpki::Time::try_from(std::time::SystemTime::now()).map_err(|_| Error::Tls {
        with_source: "system clock is before the unix epoch".into(),
    })?;

    let intermediates: Vec<&[u8]> = chain[1..].iter().map(Vec::as_slice).collect();

    match end_entity.verify_is_valid_tls_server_cert(
        ALL_SIGALGS,
        &webpki::TlsServerTrustAnchors(&anchors),
        &intermediates,
        time,
    ) {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::debug!(%e, "x509 certificate did not pass chain verification");
            Ok(false)
        }
    }
}

/// Reconcile a DX server's TLS certificate with the domain's DIME
/// management record.
///
/// The acceptance ladder, in order:
///
/// 1. a self-signed certificate without DIME TLS signatures fails
///    outright, before any network traffic;
/// 2. when TLS signatures are present, at least one (signature, POK) pair
///    must sign the SHA-512 of the certificate (*tls-bound*), else fail;
/// 3. tls-bound + DNSSEC-validated record passes immediately;
/// 4. hostname check against the DX name;
/// 5. x509 chain verification against the root bundle;
/// 6. tls-bound (but not DNSSEC-anchored) with a good chain passes,
///    skipping OCSP;
/// 7. OCSP revocation check, soft-passing when the responder is
///    administratively unreachable.
///
/// `chain` is the peer chain in DER, end-entity first. Returns `Ok(false)`
/// when the certificate failed verification and `Ok(true)` when it passed.
#[tracing::instrument(skip_all, fields(dx = dx_host), level = "debug")]
pub async fn verify_dx_certificate(
    chain: &[Vec<u8>],
    dx_host: &str,
    record: &DimeRecord,
    ocsp: &OcspStore,
) -> Result<bool, Error> {
    // A signature-failed record is fatal for any downstream trust use.
    if record.validated == DnssecState::SignatureFailed {
        return Err(Error::Certificate {
            with_source: "DIME management record DNSSEC signature was invalid".into(),
        });
    }

    let Some(peer_der) = chain.first() else {
        return Err(Error::Certificate {
            with_source: "could not get peer certificate".into(),
        });
    };

    let peer = ParsedCert::from_der(peer_der)?;
    let self_signed = peer.is_self_signed()?;

    if self_signed {
        tracing::debug!("continuing verification of self-signed DX TLS certificate");
    }

    let mut tls_bound = false;

    if record.tls_sigs.is_empty() {
        // Without a DIME binding there is no way to accept a self-signed
        // certificate.
        if self_signed {
            tracing::debug!(
                "self-signed certificates require the DIME management record TLS signature field"
            );
            return Ok(false);
        }
    } else {
        tls_bound = check_tls_binding(peer.der(), record);

        // No TLS certificate match is always a cause of failure.
        if !tls_bound {
            return Ok(false);
        }

        tracing::debug!("DX TLS certificate matched DIME record signature");

        if record.validated == DnssecState::Validated {
            tracing::debug!("DX TLS certificate verification succeeded automatically (TLS cert match + dnssec)");
            return Ok(true);
        }
    }

    if !check_hostname(&peer, dx_host)? {
        tracing::debug!("DX TLS certificate failed x509 hostname check");
        return Ok(false);
    }

    if !check_chain(chain)? {
        tracing::debug!("DX TLS certificate failed x509 chain validation");
        return Ok(false);
    }

    // Chain verification passed and the certificate signature matched:
    // OCSP adds nothing in that case.
    if tls_bound {
        tracing::debug!("skipping OCSP check on certificate (x509 check and cert signature check passed)");
        return Ok(true);
    }

    let issuer = chain[1..]
        .iter()
        .filter_map(|der| ParsedCert::from_der(der).ok())
        .find(|candidate| candidate.issued(&peer).unwrap_or(false))
        .ok_or_else(|| Error::Certificate {
            with_source: "could not find certificate issuer for OCSP validation".into(),
        })?;

    match ocsp.validate(&peer, &issuer, chain).await? {
        OcspVerdict::Good => Ok(true),
        OcspVerdict::Unavailable => {
            tracing::warn!("OCSP was administratively unavailable, falling through");
            Ok(true)
        }
        OcspVerdict::Failed => {
            tracing::debug!("DX TLS certificate failed OCSP validation");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use ed25519_dalek::{Signer, SigningKey};
    use vdime_mrec::parse_dime_record;

    fn record_with_binding(cert_der: &[u8]) -> DimeRecord {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let signature = key.sign(&Sha512::digest(cert_der));

        let mut record = parse_dime_record(&format!(
            "ver=1 pok={}",
            base64::engine::general_purpose::STANDARD_NO_PAD.encode(key.verifying_key().as_bytes())
        ))
        .unwrap();
        record.tls_sigs = vec![signature.to_bytes()];
        record
    }

    #[test]
    fn binding_accepts_a_matching_pok_signature() {
        let cert = b"not really a certificate, hashed all the same";
        let record = record_with_binding(cert);

        assert!(check_tls_binding(cert, &record));
    }

    #[test]
    fn binding_rejects_foreign_signatures() {
        let record = record_with_binding(b"one certificate");
        assert!(!check_tls_binding(b"another certificate", &record));
    }

    #[tokio::test]
    async fn signature_failed_record_is_fatal() {
        let mut record = record_with_binding(b"x");
        record.validated = DnssecState::SignatureFailed;

        let result =
            verify_dx_certificate(&[b"x".to_vec()], "dx.example", &record, &OcspStore::new()).await;
        assert!(result.is_err());
    }
}
