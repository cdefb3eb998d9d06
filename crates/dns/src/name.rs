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

/// Maximum length of a single DNS label on the wire.
const MAX_LABEL: usize = 63;

/// Maximum length of a fully packed DNS name on the wire.
const MAX_NAME: usize = 255;

/// Whether a label denotes the DNS root.
#[must_use]
pub fn is_root_label(label: &str) -> bool {
    label.is_empty() || label == "."
}

/// Normalize a presentation-form name for comparisons and cache ids:
/// lowercase, no trailing dot, root as `"."`.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    let lowered = label.to_ascii_lowercase();
    let trimmed = lowered.trim_end_matches('.');

    if trimmed.is_empty() {
        ".".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Append the canonical wire form of a DNS name (RFC 4034 §6.2): each label
/// lowercased and written as length-prefix + bytes, terminated by the root
/// label. The root itself packs to exactly one zero byte.
///
/// # Errors
///
/// Fails when a label exceeds 63 bytes or the packed name exceeds 255.
pub fn append_canonical_name(buf: &mut Vec<u8>, name: &str) -> Result<(), Error> {
    let trimmed = name.trim_end_matches('.');

    if trimmed.is_empty() {
        buf.push(0);
        return Ok(());
    }

    let start = buf.len();

    for label in trimmed.split('.') {
        if label.is_empty() {
            return Err(Error::BadName {
                with_source: format!("name {name:?} contains an empty label"),
            });
        }

        if label.len() > MAX_LABEL {
            return Err(Error::BadName {
                with_source: format!("label in {name:?} would exceed {MAX_LABEL} bytes"),
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        buf.push(label.len() as u8);
        buf.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
    }

    buf.push(0);

    if buf.len() - start > MAX_NAME {
        buf.truncate(start);
        return Err(Error::BadName {
            with_source: format!("packed form of {name:?} would exceed {MAX_NAME} bytes"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn packed(name: &str) -> Vec<u8> {
        let mut buf = vec![];
        append_canonical_name(&mut buf, name).unwrap();
        buf
    }

    #[test]
    fn root_packs_to_a_single_zero_byte() {
        assert_eq!(packed("."), vec![0]);
        assert_eq!(packed(""), vec![0]);
    }

    #[rstest::rstest]
    #[case("example.com", b"\x07example\x03com\x00".to_vec())]
    #[case("example.com.", b"\x07example\x03com\x00".to_vec())]
    #[case("EXAMPLE.Com", b"\x07example\x03com\x00".to_vec())]
    #[case("_dx.darkmail.example", b"\x03_dx\x08darkmail\x07example\x00".to_vec())]
    fn packs_lowercased_labels(#[case] name: &str, #[case] expected: Vec<u8>) {
        assert_eq!(packed(name), expected);
    }

    #[test]
    fn oversized_label_is_rejected() {
        let label = "a".repeat(64);
        let mut buf = vec![];
        assert!(append_canonical_name(&mut buf, &format!("{label}.com")).is_err());
    }

    #[test]
    fn oversized_name_is_rejected() {
        let name = std::iter::repeat("abcdefgh")
            .take(32)
            .collect::<Vec<_>>()
            .join(".");
        let mut buf = vec![];
        assert!(append_canonical_name(&mut buf, &name).is_err());
        // Failed packing leaves the buffer untouched.
        assert!(buf.is_empty());
    }

    #[rstest::rstest]
    #[case("Example.COM.", "example.com")]
    #[case(".", ".")]
    #[case("", ".")]
    #[case("a.b.c", "a.b.c")]
    fn normalization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_label(input), expected);
    }
}
