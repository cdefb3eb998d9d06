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

/// Armor tags of the key files the client reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorTag {
    EcPrivateKey,
    PublicKey,
    Ed25519PrivateKey,
}

impl ArmorTag {
    /// The label between `-----BEGIN` and `-----`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::EcPrivateKey => "EC PRIVATE KEY",
            Self::PublicKey => "PUBLIC KEY",
            Self::Ed25519PrivateKey => "ED25519 PRIVATE KEY",
        }
    }
}

/// Read an armored key file: a PEM-like block whose base64 body is
/// decoded with surrounding whitespace stripped. The block label must
/// match the expected tag.
pub fn read_armored_key(path: &std::path::Path, tag: ArmorTag) -> Result<Vec<u8>, Error> {
    let contents = std::fs::read(path).map_err(|e| Error::Armor {
        with_source: format!("{}: {e}", path.display()),
    })?;

    let (label, body) = pem_rfc7468::decode_vec(&contents).map_err(|e| Error::Armor {
        with_source: format!("{}: {e}", path.display()),
    })?;

    if label != tag.label() {
        return Err(Error::Armor {
            with_source: format!(
                "{}: expected a {:?} block, found {label:?}",
                path.display(),
                tag.label()
            ),
        });
    }

    Ok(body)
}

/// Read an armored Ed25519 signing key (`ED25519 PRIVATE KEY` block).
pub fn read_ed25519_signing_key(
    path: &std::path::Path,
) -> Result<ed25519_dalek::SigningKey, Error> {
    let body = read_armored_key(path, ArmorTag::Ed25519PrivateKey)?;

    let seed: [u8; 32] = body.try_into().map_err(|body: Vec<u8>| Error::Armor {
        with_source: format!(
            "{}: Ed25519 key body measured {} bytes, expected 32",
            path.display(),
            body.len()
        ),
    })?;

    Ok(ed25519_dalek::SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn armored_file(label: &str, payload: &[u8]) -> tempfile::NamedTempFile {
        let pem =
            pem_rfc7468::encode_string(label, pem_rfc7468::LineEnding::LF, payload).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(pem.as_bytes()).unwrap();
        file
    }

    #[test]
    fn armored_key_round_trips() {
        let payload = [7u8; 32];
        let file = armored_file("ED25519 PRIVATE KEY", &payload);

        let body = read_armored_key(file.path(), ArmorTag::Ed25519PrivateKey).unwrap();
        assert_eq!(body, payload);

        let key = read_ed25519_signing_key(file.path()).unwrap();
        assert_eq!(key.to_bytes(), payload);
    }

    #[test]
    fn short_ed25519_body_is_rejected() {
        let file = armored_file("ED25519 PRIVATE KEY", &[7u8; 16]);
        assert!(read_ed25519_signing_key(file.path()).is_err());
    }

    #[test]
    fn wrong_tag_is_rejected() {
        let file = armored_file("PUBLIC KEY", &[1u8; 16]);

        assert!(read_armored_key(file.path(), ArmorTag::EcPrivateKey).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_armored_key(
            std::path::Path::new("/nonexistent/key.pem"),
            ArmorTag::PublicKey
        )
        .is_err());
    }
}
