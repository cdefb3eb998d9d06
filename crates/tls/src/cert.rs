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
use bcder::encode::Values;
use bcder::Mode;
use x509_certificate::X509Certificate;

/// OID of the authority-information-access extension (1.3.6.1.5.5.7.1.1).
const OID_AUTHORITY_INFO_ACCESS: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x01, 0x01];

/// OID of the subject-alternative-name extension (2.5.29.17).
const OID_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1d, 0x11];

/// OID of the OCSP access method (1.3.6.1.5.5.7.48.1).
const OID_AD_OCSP: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01];

/// A peer certificate in both DER and parsed form.
pub struct ParsedCert {
    der: Vec<u8>,
    cert: X509Certificate,
}

impl std::fmt::Debug for ParsedCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedCert")
            .field("subject_cn", &self.common_name())
            .field("der_len", &self.der.len())
            .finish()
    }
}

impl ParsedCert {
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            der: der.to_vec(),
            cert: X509Certificate::from_der(der)?,
        })
    }

    /// Raw DER encoding of the whole certificate.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub const fn x509(&self) -> &X509Certificate {
        &self.cert
    }

    /// CN attribute of the subject, if any.
    #[must_use]
    pub fn common_name(&self) -> Option<String> {
        self.cert.subject_common_name()
    }

    fn encode_name(name: &x509_certificate::rfc3280::Name) -> Result<Vec<u8>, Error> {
        let mut out = vec![];
        name.encode_ref()
            .write_encoded(Mode::Der, &mut out)
            .map_err(|e| Error::Certificate {
                with_source: format!("could not encode certificate name: {e}"),
            })?;

        Ok(out)
    }

    /// DER encoding of the subject name.
    pub fn subject_der(&self) -> Result<Vec<u8>, Error> {
        Self::encode_name(&self.cert.as_ref().tbs_certificate.subject)
    }

    /// DER encoding of the issuer name.
    pub fn issuer_der(&self) -> Result<Vec<u8>, Error> {
        Self::encode_name(&self.cert.as_ref().tbs_certificate.issuer)
    }

    /// Content bytes of the subject public key BIT STRING.
    #[must_use]
    pub fn public_key_bits(&self) -> Vec<u8> {
        self.cert
            .as_ref()
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .octet_bytes()
            .to_vec()
    }

    /// Serial number of the certificate.
    #[must_use]
    pub fn serial_number(&self) -> bcder::Integer {
        self.cert.as_ref().tbs_certificate.serial_number.clone()
    }

    /// Whether the certificate issued itself (subject equals issuer).
    pub fn is_self_signed(&self) -> Result<bool, Error> {
        Ok(self.subject_der()? == self.issuer_der()?)
    }

    /// Whether this certificate's subject matches `child`'s issuer, i.e.
    /// this certificate plausibly issued `child`.
    pub fn issued(&self, child: &Self) -> Result<bool, Error> {
        Ok(self.subject_der()? == child.issuer_der()?)
    }

    /// Whether the certificate carries a subjectAltName extension. When
    /// one is present, hostname matching must not fall back to the
    /// subject CN.
    #[must_use]
    pub fn has_subject_alt_name(&self) -> bool {
        self.cert
            .as_ref()
            .tbs_certificate
            .extensions
            .as_ref()
            .map_or(false, |extensions| {
                extensions
                    .iter()
                    .any(|ext| ext.id.as_ref() == OID_SUBJECT_ALT_NAME)
            })
    }

    /// The OCSP responder URI from the authority-information-access
    /// extension, if the certificate carries one.
    #[must_use]
    pub fn ocsp_uri(&self) -> Option<String> {
        let extensions = self.cert.as_ref().tbs_certificate.extensions.as_ref()?;

        let aia = extensions
            .iter()
            .find(|ext| ext.id.as_ref() == OID_AUTHORITY_INFO_ACCESS)?;

        parse_aia_ocsp_uri(&aia.value.to_bytes())
    }
}

/// Pull the first OCSP accessLocation URI out of an
/// `AuthorityInfoAccessSyntax` DER payload. The location is a GeneralName;
/// only the uniformResourceIdentifier choice (`[6] IA5String`) applies to
/// OCSP in practice.
fn parse_aia_ocsp_uri(payload: &[u8]) -> Option<String> {
    let descriptions = bcder::decode::Constructed::decode(payload, Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            let mut found = vec![];

            while let Some(entry) = cons.take_opt_sequence(|cons| {
                let method = bcder::Oid::take_from(cons)?;
                let location = cons.capture_all()?;
                Ok((method, location))
            })? {
                found.push(entry);
            }

            Ok(found)
        })
    })
    .ok()?;

    for (method, location) in descriptions {
        if method.as_ref() != OID_AD_OCSP {
            continue;
        }

        let raw = location.as_slice();

        // GeneralName, context tag [6], primitive, short- or long-form
        // definite length.
        if raw.first() != Some(&0x86) {
            continue;
        }

        let (len, start) = match raw.get(1) {
            Some(&len) if len < 0x80 => (usize::from(len), 2),
            Some(&0x81) => (usize::from(*raw.get(2)?), 3),
            _ => continue,
        };

        let uri = raw.get(start..start + len)?;

        return String::from_utf8(uri.to_vec()).ok();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn aia(entries: &[(&[u8], &[u8])]) -> Vec<u8> {
        // Hand-assembled AuthorityInfoAccessSyntax.
        let mut inner = vec![];

        for (method, uri) in entries {
            let mut access = vec![0x06, method.len() as u8];
            access.extend_from_slice(method);
            access.push(0x86);
            access.push(uri.len() as u8);
            access.extend_from_slice(uri);

            inner.push(0x30);
            inner.push(access.len() as u8);
            inner.extend_from_slice(&access);
        }

        let mut out = vec![0x30, inner.len() as u8];
        out.extend_from_slice(&inner);
        out
    }

    #[test]
    fn ocsp_uri_is_extracted_from_aia() {
        let payload = aia(&[
            // caIssuers entry first, which must be skipped
            (
                &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02],
                b"http://ca.example/issuer",
            ),
            (OID_AD_OCSP, b"http://ocsp.example/"),
        ]);

        assert_eq!(
            parse_aia_ocsp_uri(&payload),
            Some("http://ocsp.example/".to_owned())
        );
    }

    #[test]
    fn missing_ocsp_entry_yields_none() {
        let payload = aia(&[(
            &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02],
            b"http://ca.example/issuer",
        )]);

        assert_eq!(parse_aia_ocsp_uri(&payload), None);
    }

    #[test]
    fn garbage_aia_yields_none() {
        assert_eq!(parse_aia_ocsp_uri(b"not asn1"), None);
    }
}
