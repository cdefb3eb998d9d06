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

use crate::DmtpMode;

/// DMTP command verbs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::AsRefStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    Starttls,
    Helo,
    Ehlo,
    Mode,
    Rset,
    Noop,
    Help,
    Quit,
    Mail,
    Rcpt,
    Data,
    Sgnt,
    Hist,
    Vrfy,
    Stats,
}

/// Return-path disposition of a MAIL command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    #[default]
    Default,
    Full,
    Display,
    Header,
}

/// Data encoding of a MAIL command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Default,
    SevenBit,
    EightBit,
}

/// Build the CRLF-terminated STARTTLS command for a dual-mode upgrade.
#[must_use]
pub(crate) fn starttls(dx_name: &str) -> String {
    format!("STARTTLS <{dx_name}> MODE={}\r\n", DmtpMode::Dmtp)
}

/// Build a MAIL command. The fingerprint is a mandatory caller argument.
#[must_use]
pub(crate) fn mail_from(
    origin: &str,
    fingerprint: &str,
    message_size: usize,
    return_type: ReturnType,
    data_type: DataType,
) -> String {
    let ret = match return_type {
        ReturnType::Default => "",
        ReturnType::Full => " RETURN=FULL",
        ReturnType::Display => " RETURN=DISPLAY",
        ReturnType::Header => " RETURN=HEADER",
    };

    let data = match data_type {
        DataType::Default => "",
        DataType::SevenBit => " DATA=7BIT",
        DataType::EightBit => " DATA=8BIT",
    };

    format!("MAIL FROM: <{origin}> [{fingerprint}] SIZE={message_size}{ret}{data}\r\n")
}

#[must_use]
pub(crate) fn rcpt_to(forward: &str, fingerprint: &str) -> String {
    format!("RCPT TO: <{forward}> [{fingerprint}]\r\n")
}

#[must_use]
pub(crate) fn sgnt(name: &str, fingerprint: Option<&str>) -> String {
    fingerprint.map_or_else(
        || format!("SGNT <{name}>\r\n"),
        |fp| format!("SGNT <{name}> [{fp}]\r\n"),
    )
}

#[must_use]
pub(crate) fn vrfy(name: &str, fingerprint: &str) -> String {
    format!("VRFY <{name}> [{fingerprint}]\r\n")
}

#[must_use]
pub(crate) fn hist(name: &str, start_fingerprint: &str, stop_fingerprint: Option<&str>) -> String {
    stop_fingerprint.map_or_else(
        || format!("HIST <{name}> [{start_fingerprint}]\r\n"),
        |stop| format!("HIST <{name}> [{start_fingerprint}] [{stop}]\r\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn verbs_render_uppercase() {
        assert_eq!(Verb::Sgnt.to_string(), "SGNT");
        assert_eq!(Verb::Starttls.as_ref(), "STARTTLS");
    }

    #[test]
    fn starttls_advertises_the_native_mode() {
        assert_eq!(
            starttls("mx1.darkmail.example"),
            "STARTTLS <mx1.darkmail.example> MODE=DMTPv1\r\n"
        );
    }

    #[rstest::rstest]
    #[case(
        ReturnType::Default,
        DataType::Default,
        "MAIL FROM: <alice@darkmail.example> [fp1] SIZE=42\r\n"
    )]
    #[case(
        ReturnType::Full,
        DataType::SevenBit,
        "MAIL FROM: <alice@darkmail.example> [fp1] SIZE=42 RETURN=FULL DATA=7BIT\r\n"
    )]
    #[case(
        ReturnType::Header,
        DataType::EightBit,
        "MAIL FROM: <alice@darkmail.example> [fp1] SIZE=42 RETURN=HEADER DATA=8BIT\r\n"
    )]
    fn mail_from_argument_grammar(
        #[case] ret: ReturnType,
        #[case] data: DataType,
        #[case] expected: &str,
    ) {
        assert_eq!(
            mail_from("alice@darkmail.example", "fp1", 42, ret, data),
            expected
        );
    }

    #[test]
    fn signet_fingerprint_is_square_bracketed_and_optional() {
        assert_eq!(sgnt("darkmail.example", None), "SGNT <darkmail.example>\r\n");
        assert_eq!(
            sgnt("alice@darkmail.example", Some("abc")),
            "SGNT <alice@darkmail.example> [abc]\r\n"
        );
    }

    #[test]
    fn hist_takes_an_optional_stop_fingerprint() {
        assert_eq!(
            hist("alice@darkmail.example", "fp0", None),
            "HIST <alice@darkmail.example> [fp0]\r\n"
        );
        assert_eq!(
            hist("alice@darkmail.example", "fp0", Some("fp9")),
            "HIST <alice@darkmail.example> [fp0] [fp9]\r\n"
        );
    }
}
