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

use crate::records::{DNSKEY_FLAG_SEP, DNSKEY_FLAG_ZONE, DNSKEY_PROTOCOL};
use crate::Error;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// One `initial-key` entry read from the trust anchor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnchorEntry {
    pub label: String,
    pub flags: u16,
    pub algorithm: u8,
    pub keydata: Vec<u8>,
}

/// Parse one line of the anchor file. Comments and lines that do not match
/// the `<label> initial-key <flags> <proto> <alg> "<base64>" ;` shape are
/// skipped; entries that match but carry bad values are errors.
pub(crate) fn parse_anchor_line(line: &str) -> Result<Option<AnchorEntry>, Error> {
    let trimmed = line.trim_start();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = trimmed.split_whitespace();

    let Some(label) = tokens.next() else {
        return Ok(None);
    };

    if tokens.next() != Some("initial-key") {
        return Ok(None);
    }

    let numbers = (tokens.next(), tokens.next(), tokens.next());
    let (Some(flags), Some(protocol), Some(algorithm)) = (
        numbers.0.and_then(|t| t.parse::<u16>().ok()),
        numbers.1.and_then(|t| t.parse::<u8>().ok()),
        numbers.2.and_then(|t| t.parse::<u8>().ok()),
    ) else {
        return Ok(None);
    };

    if flags & !(DNSKEY_FLAG_ZONE | DNSKEY_FLAG_SEP) != 0 {
        return Err(Error::Anchor {
            with_source: format!("encountered unexpected key flags in DNS key file: {flags}"),
        });
    }

    if protocol != DNSKEY_PROTOCOL {
        return Err(Error::Anchor {
            with_source: format!("encountered unexpected protocol in DNS key file: {protocol}"),
        });
    }

    if !matches!(algorithm, 5 | 8 | 10) {
        return Err(Error::Anchor {
            with_source: format!("encountered unexpected algorithm: {algorithm}"),
        });
    }

    // The quoted public key and the trailing semicolon come from the raw
    // line, as the key material may itself contain spaces.
    let open = trimmed.find('"').ok_or_else(|| Error::Anchor {
        with_source: "encountered unexpected end of line".into(),
    })?;
    let rest = &trimmed[open + 1..];
    let close = rest.find('"').ok_or_else(|| Error::Anchor {
        with_source: "encountered unexpected end of line".into(),
    })?;

    if rest[close + 1..].trim_start().chars().next() != Some(';') {
        return Err(Error::Anchor {
            with_source: "encountered unexpected end of line".into(),
        });
    }

    let armored: String = rest[..close].chars().filter(|c| !c.is_whitespace()).collect();

    let keydata = STANDARD.decode(armored.as_bytes()).map_err(|e| Error::Anchor {
        with_source: format!("failed to extract base64 encoded public key: {e}"),
    })?;

    Ok(Some(AnchorEntry {
        label: label.to_owned(),
        flags,
        algorithm,
        keydata,
    }))
}

/// Parse the whole anchor file contents.
pub(crate) fn parse_anchor_file(contents: &str) -> Result<Vec<AnchorEntry>, Error> {
    let mut entries = vec![];

    for line in contents.lines() {
        if let Some(entry) = parse_anchor_line(line)? {
            entries.push(entry);
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn armored_key() -> String {
        STANDARD.encode(crate::records::tests::small_keydata())
    }

    #[test]
    fn well_formed_entry_parses() {
        let line = format!(". initial-key 257 3 8 \"{}\" ; valid until 2027", armored_key());

        let entry = parse_anchor_line(&line).unwrap().unwrap();
        assert_eq!(entry.label, ".");
        assert_eq!(entry.flags, 257);
        assert_eq!(entry.algorithm, 8);
        assert_eq!(entry.keydata, crate::records::tests::small_keydata());
    }

    #[test]
    fn whitespace_inside_the_key_material_is_stripped() {
        let armored = armored_key();
        let (head, tail) = armored.split_at(8);
        let line = format!(". initial-key 256 3 8 \"{head} {tail}\";");

        let entry = parse_anchor_line(&line).unwrap().unwrap();
        assert_eq!(entry.keydata, crate::records::tests::small_keydata());
    }

    #[rstest::rstest]
    #[case("# managed keys")]
    #[case("")]
    #[case("   ")]
    #[case("trust-anchors {")]
    fn comments_and_foreign_lines_are_skipped(#[case] line: &str) {
        assert_eq!(parse_anchor_line(line).unwrap(), None);
    }

    #[rstest::rstest]
    // flags outside zone|sep
    #[case(". initial-key 259 3 8 \"AAAA\" ;")]
    // protocol must be 3
    #[case(". initial-key 257 2 8 \"AAAA\" ;")]
    // unsupported algorithm
    #[case(". initial-key 257 3 13 \"AAAA\" ;")]
    // missing quotes
    #[case(". initial-key 257 3 8 AAAA ;")]
    // missing trailing semicolon
    #[case(". initial-key 257 3 8 \"AAAA\"")]
    fn bad_entries_are_errors(#[case] line: &str) {
        assert!(parse_anchor_line(line).is_err());
    }
}
