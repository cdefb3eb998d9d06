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

/// One parsed reply line: `CODE-TEXT` for a continued line of a multiline
/// reply, `CODE TEXT` for a terminal (or single) line.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReplyLine {
    /// Numeric response code.
    pub code: u16,
    /// Whether the reply continues on the following line.
    pub continued: bool,
    /// Text after the separator.
    pub text: String,
}

/// Parse a reply line into its numeric code and trailing text.
pub fn parse_line(line: &str) -> Result<ReplyLine, Error> {
    for (i, c) in line.char_indices() {
        if !c.is_ascii_whitespace() && c != '-' {
            continue;
        }

        // The word before the first space (or hyphen) is the code.
        let code: u16 = line[..i].parse().map_err(|_| Error::ReplyParsing {
            with_source: format!("line contained invalid numerical response code {{code = {}}}", &line[..i]),
        })?;

        if code == 0 {
            return Err(Error::ReplyParsing {
                with_source: "line contained invalid numerical response code {code = 0}".into(),
            });
        }

        return Ok(if c == '-' {
            // What follows the hyphen is the rest of the line verbatim.
            ReplyLine {
                code,
                continued: true,
                text: line[i + 1..].to_owned(),
            }
        } else {
            ReplyLine {
                code,
                continued: false,
                text: line[i..].trim_start().to_owned(),
            }
        });
    }

    Err(Error::ReplyParsing {
        with_source: format!("line carried no response code: {line:?}"),
    })
}

/// A complete (possibly multiline) server reply.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
    overflow: bool,
}

impl Reply {
    pub(crate) fn new(code: u16, lines: Vec<String>, overflow: bool) -> Self {
        Self {
            code,
            lines,
            overflow,
        }
    }

    /// Numeric code shared by every line of the reply.
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// Whether the code denotes success (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Whether the code denotes a continuation (3xx), only legal as the
    /// first half of a DATA exchange.
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Whether any line exceeded the line buffer.
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflow
    }

    /// The individual line texts.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The line texts joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Map a non-2xx reply to a protocol error.
    pub fn expect_success(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Protocol {
                code: self.code,
                message: self.text(),
            })
        }
    }

    /// Map anything but a 3xx continuation to a protocol error.
    pub fn expect_continue(self) -> Result<Self, Error> {
        if self.is_continue() {
            Ok(self)
        } else {
            Err(Error::Protocol {
                code: self.code,
                message: self.text(),
            })
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}
