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

/// Progress of a DMTP session through its command grammar.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Banner received and accepted.
    Greeted,
    /// EHLO/HELO exchanged; lookup and envelope commands are available.
    Ready,
    /// MAIL accepted; RCPT commands may follow.
    HaveSender,
    /// At least one RCPT accepted; DATA may follow.
    HaveRecipients,
    /// QUIT sent or the peer went away.
    Closed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Greeted => "greeted",
            Self::Ready => "ready",
            Self::HaveSender => "have-sender",
            Self::HaveRecipients => "have-recipients",
            Self::Closed => "closed",
        })
    }
}
