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

//! Client side of DMTP, the line-based numerically-coded transport
//! protocol spoken with DX servers: native TLS on port 26 and dual-mode
//! STARTTLS upgrades on the SMTP ports.

mod command;
mod connection;
mod error;
mod mode;
mod reply;
mod session;
mod stage;

pub use command::{DataType, ReturnType, Verb};
pub use connection::{Connection, Line};
pub use error::Error;
pub use mode::DmtpMode;
pub use reply::{parse_line, Reply, ReplyLine};
pub use session::{DmtpSession, SignetStatus};
pub use stage::Stage;

/// Native DMTP port (TLS from the first byte).
pub const DMTP_PORT: u16 = 26;

/// Dual-mode port (plain SMTP greeting, STARTTLS upgrade).
pub const DMTP_PORT_DUAL: u16 = 25;

/// Fallback submission port for dual-mode connections.
pub const DMTP_PORT_SUBMISSION: u16 = 587;

/// Maximum number of MX hosts tried during transport selection.
pub const MAX_MX_RETRIES: usize = 3;

/// Upper bound of one protocol line, terminator excluded.
pub const LINE_BUF_SIZE: usize = 4096;
