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

/// Operating mode of a DMTP session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmtpMode {
    #[default]
    Unknown,
    /// Plain connection that has not upgraded yet.
    Dual,
    /// Native DMTP, over TLS.
    Dmtp,
    Smtp,
    Esmtp,
}

impl DmtpMode {
    /// Map a mode identifier as it appears on the wire. Unrecognized
    /// identifiers map to [`DmtpMode::Unknown`].
    #[must_use]
    pub fn from_wire(token: &str) -> Self {
        if token.eq_ignore_ascii_case("DMTPv1") {
            Self::Dmtp
        } else if token.eq_ignore_ascii_case("SMTP") {
            Self::Smtp
        } else if token.eq_ignore_ascii_case("ESMTP") {
            Self::Esmtp
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for DmtpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Dual => "dual",
            Self::Dmtp => "DMTPv1",
            Self::Smtp => "SMTP",
            Self::Esmtp => "ESMTP",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case("DMTPv1", DmtpMode::Dmtp)]
    #[case("dmtpv1", DmtpMode::Dmtp)]
    #[case("SMTP", DmtpMode::Smtp)]
    #[case("esmtp", DmtpMode::Esmtp)]
    #[case("QMTP", DmtpMode::Unknown)]
    fn wire_mapping(#[case] token: &str, #[case] expected: DmtpMode) {
        assert_eq!(DmtpMode::from_wire(token), expected);
    }
}
