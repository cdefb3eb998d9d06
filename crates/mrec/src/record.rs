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

use crate::{Error, DIME_VERSION, POK_B64_SIZE, POK_SIZE, TLS_SIG_B64_SIZE, TLS_SIG_SIZE};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use vdime_cache::{wire, CachePayload, DataKind};
use vdime_dns::DnssecState;

/// Policy for sending/accepting messages.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MsgPolicy {
    #[default]
    Experimental,
    Mixed,
    Strict,
}

/// Whether subdomains have authority over their own records.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SubdomainPolicy {
    #[default]
    Strict,
    Relaxed,
    Explicit,
}

/// A parsed DIME management record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimeRecord {
    /// Record syntax version; must equal [`DIME_VERSION`].
    pub version: u16,
    /// Primary organizational signing keys, in record order. At least one
    /// must be present.
    pub pok: Vec<[u8; POK_SIZE]>,
    /// TLS binding signatures by the POK(s), in record order.
    pub tls_sigs: Vec<[u8; TLS_SIG_SIZE]>,
    pub policy: MsgPolicy,
    /// Alternative authoritative signet lookup sources, stored verbatim.
    pub syndicates: Option<String>,
    /// Delivery host names; when absent the MX records apply.
    pub dx: Vec<String>,
    /// Days before a cached record is discarded.
    pub expiry_days: Option<u64>,
    pub subdomain: SubdomainPolicy,
    /// DNSSEC outcome of the retrieval that produced this record.
    pub validated: DnssecState,
}

impl Default for DimeRecord {
    fn default() -> Self {
        Self {
            version: DIME_VERSION,
            pok: vec![],
            tls_sigs: vec![],
            policy: MsgPolicy::default(),
            syndicates: None,
            dx: vec![],
            expiry_days: None,
            subdomain: SubdomainPolicy::default(),
            validated: DnssecState::Unsigned,
        }
    }
}

fn parse_err(with_source: impl Into<String>) -> Error {
    Error::Parse {
        with_source: with_source.into(),
    }
}

fn decode_exact<const N: usize>(value: &str, b64_len: usize, what: &str) -> Result<[u8; N], Error> {
    if value.len() != b64_len {
        return Err(parse_err(format!(
            "{what} of bad length {{received {}, expected {b64_len} characters}}",
            value.len()
        )));
    }

    let decoded = STANDARD_NO_PAD
        .decode(value.as_bytes())
        .map_err(|e| parse_err(format!("could not base64-decode {what}: {e}")))?;

    decoded
        .try_into()
        .map_err(|_| parse_err(format!("{what} was an unexpected size once decoded")))
}

fn apply_field(record: &mut DimeRecord, key: &str, value: &str) -> Result<(), Error> {
    if key.eq_ignore_ascii_case("ver") || key.eq_ignore_ascii_case("version") {
        record.version = value
            .parse()
            .map_err(|_| parse_err("record contained invalid version field"))?;

        if record.version != DIME_VERSION {
            return Err(parse_err(format!(
                "record version must be {DIME_VERSION}; read {}",
                record.version
            )));
        }
    } else if key.eq_ignore_ascii_case("pok") || key.eq_ignore_ascii_case("primary") {
        record
            .pok
            .push(decode_exact(value, POK_B64_SIZE, "primary org key")?);
    } else if key.eq_ignore_ascii_case("tls") {
        record
            .tls_sigs
            .push(decode_exact(value, TLS_SIG_B64_SIZE, "TLS certificate signature")?);
    } else if key.eq_ignore_ascii_case("pol") || key.eq_ignore_ascii_case("policy") {
        record.policy = value
            .parse()
            .map_err(|_| parse_err(format!("invalid message policy value: {value}")))?;
    } else if key.eq_ignore_ascii_case("syn") || key.eq_ignore_ascii_case("syndicates") {
        record.syndicates = Some(value.to_owned());
    } else if key.eq_ignore_ascii_case("dx") || key.eq_ignore_ascii_case("deliver") {
        record.dx.push(value.to_owned());
    } else if key.eq_ignore_ascii_case("exp") || key.eq_ignore_ascii_case("expiry") {
        record.expiry_days = Some(
            value
                .parse()
                .map_err(|_| parse_err("record contained invalid expiry field"))?,
        );
    } else if key.eq_ignore_ascii_case("sub") || key.eq_ignore_ascii_case("subdomain") {
        record.subdomain = value
            .parse()
            .map_err(|_| parse_err(format!("invalid subdomain policy value: {value}")))?;
    } else {
        tracing::debug!(key, value, "unrecognized DIME record field");
    }

    Ok(())
}

/// Parse the payload of a `_dx` TXT record into a management record.
///
/// Fields are `key=value` pairs separated by spaces or semicolons. An
/// equals sign inside a value only terminates the key when it is not
/// followed by another equals sign, a separator or the end of the input,
/// so base64 padding runs are tolerated.
pub fn parse_dime_record(txt: &str) -> Result<DimeRecord, Error> {
    let bytes = txt.as_bytes();
    let mut record = DimeRecord::default();

    let mut opt_start = 0usize;
    let mut val_start = 0usize;
    let mut key_end: Option<usize> = None;

    for i in 0..=bytes.len() {
        let cur = bytes.get(i).copied();

        match cur {
            Some(b'=') => {
                let next = bytes.get(i + 1).copied();

                // Base64-encoded fields can end in runs of '='.
                if next.map_or(false, |n| n != b'=' && !n.is_ascii_whitespace() && n != b';') {
                    key_end = key_end.or(Some(i));
                    val_start = i + 1;
                }
            }
            Some(b' ' | b';') | None => {
                let key = &txt[opt_start..key_end.unwrap_or(i)];
                let value = key_end.map_or("", |_| &txt[val_start..i]);

                if !key.is_empty() {
                    apply_field(&mut record, key, value)?;
                }

                opt_start = i + 1;
                val_start = i + 1;
                key_end = None;
            }
            _ => {}
        }
    }

    record.validate()?;

    Ok(record)
}

impl DimeRecord {
    /// Validate the syntax of a record for correctness.
    pub fn validate(&self) -> Result<(), Error> {
        // The only mandatory field: at least one POK must be present.
        if self.pok.is_empty() {
            return Err(parse_err("record was missing mandatory public key field"));
        }

        if self.version != DIME_VERSION {
            return Err(parse_err(format!(
                "record contained unsupported version number {{ver = {}}}",
                self.version
            )));
        }

        Ok(())
    }

    /// Render the record back into TXT payload form. The output parses
    /// back to an equal record.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("ver={}", self.version);

        for pok in &self.pok {
            out.push_str(&format!(" pok={}", STANDARD_NO_PAD.encode(pok)));
        }

        for sig in &self.tls_sigs {
            out.push_str(&format!(" tls={}", STANDARD_NO_PAD.encode(sig)));
        }

        out.push_str(&format!(" pol={}", self.policy));

        if let Some(syndicates) = &self.syndicates {
            out.push_str(&format!(" syn={syndicates}"));
        }

        for dx in &self.dx {
            out.push_str(&format!(" dx={dx}"));
        }

        if let Some(days) = self.expiry_days {
            out.push_str(&format!(" exp={days}"));
        }

        out.push_str(&format!(" sub={}", self.subdomain));

        out
    }
}

impl CachePayload for DimeRecord {
    const KIND: DataKind = DataKind::DimeRecord;

    fn serialize(&self) -> Result<Vec<u8>, vdime_cache::Error> {
        let mut buf = vec![];

        buf.extend_from_slice(&self.version.to_le_bytes());
        wire::put_array(&mut buf, &self.pok.iter().map(|p| p.to_vec()).collect::<Vec<_>>(), POK_SIZE)?;
        wire::put_array(
            &mut buf,
            &self.tls_sigs.iter().map(|s| s.to_vec()).collect::<Vec<_>>(),
            TLS_SIG_SIZE,
        )?;
        buf.push(self.policy as u8);
        wire::put_str(&mut buf, self.syndicates.as_deref());
        wire::put_str_array(&mut buf, &self.dx);
        buf.extend_from_slice(&self.expiry_days.unwrap_or(0).to_le_bytes());
        buf.push(self.subdomain as u8);
        #[allow(clippy::cast_sign_loss)]
        buf.push(self.validated.to_wire() as u8);

        Ok(buf)
    }

    fn deserialize(data: &[u8]) -> Result<Self, vdime_cache::Error> {
        let decode = |with_source: String| vdime_cache::Error::Decode { with_source };

        let mut rd = wire::Reader::new(data);

        let version = rd.u16()?;

        let pok = rd
            .array(POK_SIZE)?
            .into_iter()
            .map(|p| p.try_into().expect("exact item size"))
            .collect();
        let tls_sigs = rd
            .array(TLS_SIG_SIZE)?
            .into_iter()
            .map(|s| s.try_into().expect("exact item size"))
            .collect();

        let policy = match rd.u8()? {
            0 => MsgPolicy::Experimental,
            1 => MsgPolicy::Mixed,
            2 => MsgPolicy::Strict,
            other => return Err(decode(format!("invalid policy value {other}"))),
        };

        let syndicates = rd.str_nul()?;
        let dx = rd.str_array()?;
        let expiry = rd.u64()?;

        let subdomain = match rd.u8()? {
            0 => SubdomainPolicy::Strict,
            1 => SubdomainPolicy::Relaxed,
            2 => SubdomainPolicy::Explicit,
            other => return Err(decode(format!("invalid subdomain policy value {other}"))),
        };

        let validated = DnssecState::from_wire(rd.i8()?)
            .ok_or_else(|| decode("invalid DNSSEC state".into()))?;

        let record = Self {
            version,
            pok,
            tls_sigs,
            policy,
            syndicates,
            dx,
            expiry_days: (expiry != 0).then_some(expiry),
            subdomain,
            validated,
        };

        // A record that fails validation must not come back from disk.
        record
            .validate()
            .map_err(|e| decode(format!("deserialized record failed validation: {e}")))?;

        Ok(record)
    }

    fn clone_payload(&self) -> Self {
        self.clone()
    }

    fn describe(&self) -> String {
        format!(
            "DIME record: version = {}, poks = {}, tls sigs = {}, policy = {}, dx = {}, subdomain = {}",
            self.version,
            self.pok.len(),
            self.tls_sigs.len(),
            self.policy,
            self.dx.len(),
            self.subdomain,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn pok_b64(byte: u8) -> String {
        STANDARD_NO_PAD.encode([byte; POK_SIZE])
    }

    pub(crate) fn tls_b64(byte: u8) -> String {
        STANDARD_NO_PAD.encode([byte; TLS_SIG_SIZE])
    }

    #[test]
    fn minimal_record_parses_with_defaults() {
        let record = parse_dime_record(&format!("ver=1 pok={}", pok_b64(7))).unwrap();

        assert_eq!(record.version, 1);
        assert_eq!(record.pok, vec![[7u8; POK_SIZE]]);
        assert_eq!(record.policy, MsgPolicy::Experimental);
        assert_eq!(record.subdomain, SubdomainPolicy::Strict);
        assert!(record.tls_sigs.is_empty());
        assert!(record.dx.is_empty());
        assert_eq!(record.expiry_days, None);
    }

    #[test]
    fn full_record_parses() {
        let txt = format!(
            "ver=1 pok={} pok={} tls={} pol=strict syn=alpha,beta dx=mx1.darkmail.example;dx=mx2.darkmail.example exp=30 sub=relaxed",
            pok_b64(1),
            pok_b64(2),
            tls_b64(3),
        );

        let record = parse_dime_record(&txt).unwrap();
        assert_eq!(record.pok.len(), 2);
        assert_eq!(record.tls_sigs, vec![[3u8; TLS_SIG_SIZE]]);
        assert_eq!(record.policy, MsgPolicy::Strict);
        assert_eq!(record.syndicates.as_deref(), Some("alpha,beta"));
        assert_eq!(
            record.dx,
            vec!["mx1.darkmail.example".to_owned(), "mx2.darkmail.example".to_owned()]
        );
        assert_eq!(record.expiry_days, Some(30));
        assert_eq!(record.subdomain, SubdomainPolicy::Relaxed);
    }

    #[rstest::rstest]
    #[case("VER", "POL", "SUB")]
    #[case("version", "policy", "subdomain")]
    fn key_aliases_are_case_insensitive(#[case] ver: &str, #[case] pol: &str, #[case] sub: &str) {
        let txt = format!("{ver}=1 primary={} {pol}=MIXED {sub}=Explicit", pok_b64(9));

        let record = parse_dime_record(&txt).unwrap();
        assert_eq!(record.pok.len(), 1);
        assert_eq!(record.policy, MsgPolicy::Mixed);
        assert_eq!(record.subdomain, SubdomainPolicy::Explicit);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let record =
            parse_dime_record(&format!("ver=1 pok={} future=thing", pok_b64(7))).unwrap();
        assert_eq!(record.pok.len(), 1);
    }

    #[test]
    fn equals_runs_stay_inside_the_value() {
        // A trailing '=' pair must not start a new key/value split.
        let record = parse_dime_record(&format!("ver=1 pok={} syn=a==", pok_b64(7))).unwrap();
        assert_eq!(record.syndicates.as_deref(), Some("a=="));
    }

    #[rstest::rstest]
    // missing POK entirely
    #[case("ver=1".to_owned())]
    // wrong version
    #[case(format!("ver=2 pok={}", pok_b64(1)))]
    // non-numeric version
    #[case(format!("ver=x pok={}", pok_b64(1)))]
    // truncated POK
    #[case("ver=1 pok=AAAA".to_owned())]
    // truncated TLS signature
    #[case(format!("ver=1 pok={} tls=AAAA", pok_b64(1)))]
    // unknown policy value
    #[case(format!("ver=1 pok={} pol=lax", pok_b64(1)))]
    // unknown subdomain value
    #[case(format!("ver=1 pok={} sub=open", pok_b64(1)))]
    fn bad_records_are_rejected(#[case] txt: String) {
        assert!(parse_dime_record(&txt).is_err());
    }

    #[test]
    fn render_parse_round_trip() {
        let txt = format!(
            "ver=1 pok={} tls={} pol=mixed syn=one,two dx=mx1.darkmail.example exp=7 sub=explicit",
            pok_b64(5),
            tls_b64(6),
        );

        let record = parse_dime_record(&txt).unwrap();
        let again = parse_dime_record(&record.render()).unwrap();
        assert_eq!(again, record);
    }

    #[test]
    fn cache_wire_round_trip() {
        let mut record = parse_dime_record(&format!(
            "ver=1 pok={} tls={} pol=strict dx=mx1.darkmail.example exp=30",
            pok_b64(1),
            tls_b64(2),
        ))
        .unwrap();
        record.validated = DnssecState::Validated;

        let restored = DimeRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn deserialization_rejects_invalid_records() {
        // A record with no POK serializes but must not deserialize.
        let empty = DimeRecord::default();
        let buf = empty.serialize().unwrap();
        assert!(DimeRecord::deserialize(&buf).is_err());
    }
}
