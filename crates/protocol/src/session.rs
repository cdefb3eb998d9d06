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

use crate::command::{self, DataType, ReturnType};
use crate::connection::Connection;
use crate::mode::DmtpMode;
use crate::reply::Reply;
use crate::stage::Stage;
use crate::{Error, DMTP_PORT, DMTP_PORT_DUAL, DMTP_PORT_SUBMISSION, MAX_MX_RETRIES};
use vdime_dns::{DnsResolver, DnssecState};
use vdime_mrec::{DimeRecord, DimeRecordStore};
use vdime_tls::DxConnector;

/// Result of a VRFY exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignetStatus {
    /// The queried fingerprint is the most current one.
    Current,
    /// The signet was superseded; the payload is the latest fingerprint.
    Update(String),
}

/// A client session against one DX server.
///
/// Sessions are single-owner: every command takes `&mut self` and the
/// underlying connection lives exactly as long as the session.
pub struct DmtpSession {
    domain: String,
    dx: String,
    connection: Connection,
    mode: DmtpMode,
    stage: Stage,
    active: bool,
    /// A failed envelope exchange leaves the server state undefined; the
    /// next envelope command issues an implicit RSET first.
    envelope_dirty: bool,
    record: DimeRecord,
}

impl std::fmt::Debug for DmtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmtpSession")
            .field("domain", &self.domain)
            .field("dx", &self.dx)
            .field("mode", &self.mode)
            .field("stage", &self.stage)
            .field("active", &self.active)
            .finish()
    }
}

impl DmtpSession {
    /// Establish a DMTP session to the DX serving `domain`.
    ///
    /// The domain's management record drives transport selection:
    /// record-supplied DX hosts on the native port first, else up to
    /// [`MAX_MX_RETRIES`] MX hosts (native, then dual-mode with a
    /// submission-port failover), else the domain itself on the native
    /// port. A record whose DNSSEC signature failed is fatal before any
    /// connection attempt.
    #[tracing::instrument(skip(dns, records, connector), level = "debug")]
    pub async fn connect(
        domain: &str,
        dns: &DnsResolver,
        records: &DimeRecordStore,
        connector: &DxConnector,
    ) -> Result<Self, Error> {
        let record = records.get(dns, domain, true).await?;

        if record.validated == DnssecState::SignatureFailed {
            return Err(Error::BadState {
                with_source:
                    "could not establish DMTP connection to host: DIME management record DNSSEC signature was invalid"
                        .into(),
            });
        }

        if !record.dx.is_empty() {
            // The record names delivery hosts; each is tried in order.
            for (i, host) in record.dx.iter().enumerate() {
                tracing::debug!(host, index = i + 1, port = DMTP_PORT, "attempting DMTP connection to record-supplied DX server");

                match Self::connect_standard(host, domain, record.clone(), connector).await {
                    Ok(session) => return Ok(session),
                    Err(e) => tracing::warn!(host, %e, "DX connection attempt failed"),
                }
            }
        } else {
            match dns.get_mx_records(domain).await {
                Ok(hosts) => {
                    for mx in hosts.iter().take(MAX_MX_RETRIES) {
                        tracing::debug!(host = mx.exchange, pref = mx.preference, "attempting DMTP connection to MX hostname");

                        match Self::connect_standard(&mx.exchange, domain, record.clone(), connector)
                            .await
                        {
                            Ok(session) => return Ok(session),
                            Err(e) => {
                                tracing::debug!(host = mx.exchange, %e, "re-attempting dual-mode DMTP connection");

                                match Self::connect_dual(
                                    &mx.exchange,
                                    domain,
                                    record.clone(),
                                    connector,
                                    true,
                                )
                                .await
                                {
                                    Ok(session) => return Ok(session),
                                    Err(e) => {
                                        tracing::warn!(host = mx.exchange, %e, "dual-mode connection attempt failed");
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => tracing::debug!(domain, %e, "no usable MX records"),
            }

            // Final failover: the domain itself on the native port.
            tracing::debug!(domain, port = DMTP_PORT, "attempting DMTP connection to assumed DX server");

            return Self::connect_standard(domain, domain, record, connector).await;
        }

        Err(Error::Connection {
            with_source: "connection to DX server failed".into(),
        })
    }

    /// Force a native (port 26, TLS-first) DMTP connection to a DX host.
    pub async fn connect_standard(
        host: &str,
        domain: &str,
        record: DimeRecord,
        connector: &DxConnector,
    ) -> Result<Self, Error> {
        let stream = connector.connect(host, DMTP_PORT).await?;

        let mut session = Self {
            domain: domain.to_owned(),
            dx: host.to_owned(),
            connection: Connection::tls(stream),
            mode: DmtpMode::Dmtp,
            stage: Stage::Greeted,
            active: false,
            envelope_dirty: false,
            record,
        };

        session.expect_banner().await?;
        session.active = true;

        Ok(session)
    }

    /// Connect to a DX host running DMTP in dual mode (port 25, with an
    /// optional failover to the submission port), then upgrade with
    /// STARTTLS. The session only becomes active in native mode.
    pub async fn connect_dual(
        host: &str,
        domain: &str,
        record: DimeRecord,
        connector: &DxConnector,
        failover: bool,
    ) -> Result<Self, Error> {
        let stream = match connector.connect_tcp(host, DMTP_PORT_DUAL).await {
            Ok(stream) => stream,
            Err(e) if failover => {
                tracing::debug!(host, %e, port = DMTP_PORT_SUBMISSION, "retrying unsuccessful dual mode connection");
                connector.connect_tcp(host, DMTP_PORT_SUBMISSION).await?
            }
            Err(e) => return Err(e.into()),
        };

        let mut session = Self {
            domain: domain.to_owned(),
            dx: host.to_owned(),
            connection: Connection::plain(stream),
            mode: DmtpMode::Dual,
            stage: Stage::Greeted,
            active: false,
            envelope_dirty: false,
            record,
        };

        session.expect_banner().await?;

        let mode = session.initiate_starttls(connector).await?;

        if mode != DmtpMode::Dmtp {
            return Err(Error::BadState {
                with_source: "failed to initiate TLS session over dual mode server".into(),
            });
        }

        session.active = true;

        Ok(session)
    }

    /// The dark domain this session serves.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The DX host actually connected to.
    #[must_use]
    pub fn dx(&self) -> &str {
        &self.dx
    }

    /// The management record attached at connect time.
    #[must_use]
    pub const fn record(&self) -> &DimeRecord {
        &self.record
    }

    #[must_use]
    pub const fn mode(&self) -> DmtpMode {
        self.mode
    }

    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Peer certificate chain of the underlying TLS connection.
    pub fn peer_chain(&self) -> Result<Vec<Vec<u8>>, Error> {
        self.connection.peer_chain()
    }

    /// Read the greeting banner: code 220 with the `DMTPv1` token among
    /// the whitespace-separated tokens after the server name.
    async fn expect_banner(&mut self) -> Result<(), Error> {
        let banner = self.connection.read_reply_line().await?;

        if banner.code() != 220 {
            return Err(Error::ReplyParsing {
                with_source: format!("banner had bad status code {}", banner.code()),
            });
        }

        let text = banner.text();
        let mut tokens = text.split_ascii_whitespace();

        // First token is the server hostname.
        if tokens.next().is_none() {
            return Err(Error::ReplyParsing {
                with_source: "banner contained unexpected format".into(),
            });
        }

        if !tokens.any(|token| token == "DMTPv1") {
            return Err(Error::ReplyParsing {
                with_source: "banner did not advertise DMTPv1".into(),
            });
        }

        tracing::debug!(banner = text, "accepted DMTP banner");

        Ok(())
    }

    /// Upgrade a dual-mode session to TLS: `STARTTLS <dx> MODE=DMTPv1`,
    /// a 2xx (possibly multiline) go-ahead, the handshake on the same
    /// socket, then the post-handshake `OK <mode>` line.
    async fn initiate_starttls(&mut self, connector: &DxConnector) -> Result<DmtpMode, Error> {
        if self.connection.is_tls() {
            return Err(Error::BadState {
                with_source: "cannot initiate STARTTLS if a TLS session already exists".into(),
            });
        }

        self.connection
            .send_command(&command::starttls(&self.dx))
            .await?;

        self.connection.read_reply().await?.expect_success()?;

        // The line buffer was drained by the reply read; the handshake
        // owns the socket from here.
        self.connection.upgrade_tls(connector, &self.dx).await?;
        self.mode = DmtpMode::Dmtp;

        // The server confirms the active mode over the fresh TLS layer.
        let confirmation = self.connection.read_reply_line().await?.expect_success()?;
        let text = confirmation.text();

        let mut tokens = text.split_ascii_whitespace();

        if tokens.next() != Some("OK") {
            return Err(Error::ReplyParsing {
                with_source: format!("STARTTLS server response was of unrecognized format: {text}"),
            });
        }

        let mode = tokens.next().map_or(DmtpMode::Unknown, DmtpMode::from_wire);

        if mode == DmtpMode::Unknown {
            return Err(Error::ReplyParsing {
                with_source: format!("STARTTLS server response was of unrecognized format: {text}"),
            });
        }

        self.mode = mode;

        Ok(mode)
    }

    fn require_active(&self) -> Result<(), Error> {
        if self.active && self.connection.is_open() {
            Ok(())
        } else {
            Err(Error::BadState {
                with_source: "session is not active".into(),
            })
        }
    }

    /// Lookup commands only exist in native DMTP mode.
    fn require_dmtp(&self) -> Result<(), Error> {
        if self.mode == DmtpMode::Dmtp {
            Ok(())
        } else {
            Err(Error::BadState {
                with_source: format!("command is not applicable in {} mode", self.mode),
            })
        }
    }

    fn require_stage(&self, wanted: Stage, verb: &str) -> Result<(), Error> {
        if self.stage == wanted {
            Ok(())
        } else {
            Err(Error::BadState {
                with_source: format!("{verb} is not legal in the {} stage", self.stage),
            })
        }
    }

    /// Commands available from READY onward (lookup + envelope entry).
    fn require_ready(&self, verb: &str) -> Result<(), Error> {
        if self.stage >= Stage::Ready && self.stage < Stage::Closed {
            Ok(())
        } else {
            Err(Error::BadState {
                with_source: format!("{verb} requires an EHLO/HELO exchange first"),
            })
        }
    }

    async fn send_and_read(&mut self, cmd: &str) -> Result<Reply, Error> {
        self.require_active()?;
        self.connection.send_command(cmd).await?;
        self.connection.read_reply_line().await
    }

    async fn send_and_read_multiline(&mut self, cmd: &str) -> Result<Reply, Error> {
        self.require_active()?;
        self.connection.send_command(cmd).await?;
        self.connection.read_reply().await
    }

    /// EHLO: multiline capability greeting.
    pub async fn ehlo(&mut self) -> Result<Reply, Error> {
        let cmd = format!("EHLO <{}>\r\n", self.domain);
        let reply = self.send_and_read_multiline(&cmd).await?.expect_success()?;
        self.stage = Stage::Ready;

        Ok(reply)
    }

    /// HELO: single-line greeting.
    pub async fn helo(&mut self) -> Result<Reply, Error> {
        let cmd = format!("HELO <{}>\r\n", self.domain);
        let reply = self.send_and_read(&cmd).await?.expect_success()?;
        self.stage = Stage::Ready;

        Ok(reply)
    }

    /// MODE: ask the server for its current mode.
    pub async fn query_mode(&mut self) -> Result<DmtpMode, Error> {
        let reply = self.send_and_read("MODE\r\n").await?.expect_success()?;
        let text = reply.text();
        let mut tokens = text.split_ascii_whitespace();

        if tokens.next() != Some("OK") {
            return Err(Error::ReplyParsing {
                with_source: format!("MODE reply was in unexpected format: {text}"),
            });
        }

        // One mode identifier and nothing else.
        let (Some(mode), None) = (tokens.next(), tokens.next()) else {
            return Err(Error::ReplyParsing {
                with_source: format!("MODE reply was in unexpected format: {text}"),
            });
        };

        Ok(DmtpMode::from_wire(mode))
    }

    /// NOOP with up to three arbitrary arguments.
    pub async fn noop(&mut self, args: &[&str]) -> Result<(), Error> {
        if args.len() > 3 {
            return Err(Error::BadState {
                with_source: "NOOP accepts at most 3 arguments".into(),
            });
        }

        let mut cmd = String::from("NOOP");

        for arg in args {
            cmd.push(' ');
            cmd.push_str(arg);
        }

        cmd.push_str("\r\n");

        self.send_and_read(&cmd).await?.expect_success()?;

        Ok(())
    }

    /// RSET: drop any envelope state on both sides.
    pub async fn reset(&mut self) -> Result<(), Error> {
        self.send_and_read("RSET\r\n").await?.expect_success()?;
        self.envelope_dirty = false;

        if self.stage > Stage::Ready && self.stage < Stage::Closed {
            self.stage = Stage::Ready;
        }

        Ok(())
    }

    /// HELP: multiline command table.
    pub async fn help(&mut self) -> Result<String, Error> {
        Ok(self
            .send_and_read_multiline("HELP\r\n")
            .await?
            .expect_success()?
            .text())
    }

    /// QUIT, then close the transport whatever the reply was.
    pub async fn quit(&mut self) -> Result<(), Error> {
        let outcome = self.send_and_read("QUIT\r\n").await;

        self.connection.shutdown().await;
        self.active = false;
        self.stage = Stage::Closed;

        outcome?.expect_success()?;

        Ok(())
    }

    async fn ensure_clean_envelope(&mut self) -> Result<(), Error> {
        if self.envelope_dirty {
            tracing::debug!("issuing implicit RSET after failed envelope exchange");
            self.reset().await?;
        }

        Ok(())
    }

    /// MAIL FROM with an explicit signet fingerprint.
    pub async fn mail_from(
        &mut self,
        origin: &str,
        fingerprint: &str,
        message_size: usize,
        return_type: ReturnType,
        data_type: DataType,
    ) -> Result<(), Error> {
        self.require_ready("MAIL")?;
        self.ensure_clean_envelope().await?;

        let cmd = command::mail_from(origin, fingerprint, message_size, return_type, data_type);

        match self.send_and_read(&cmd).await?.expect_success() {
            Ok(_) => {
                self.stage = Stage::HaveSender;
                Ok(())
            }
            Err(e) => {
                self.envelope_dirty = true;
                Err(e)
            }
        }
    }

    /// RCPT TO with an explicit signet fingerprint.
    pub async fn rcpt_to(&mut self, forward: &str, fingerprint: &str) -> Result<(), Error> {
        if self.stage != Stage::HaveSender && self.stage != Stage::HaveRecipients {
            return Err(Error::BadState {
                with_source: "RCPT requires an accepted MAIL command".into(),
            });
        }

        let cmd = command::rcpt_to(forward, fingerprint);

        match self.send_and_read(&cmd).await?.expect_success() {
            Ok(_) => {
                self.stage = Stage::HaveRecipients;
                Ok(())
            }
            Err(e) => {
                self.envelope_dirty = true;
                Err(e)
            }
        }
    }

    /// DATA: continuation handshake, raw payload, transaction id.
    ///
    /// The server first answers 3xx `CONTINUE [hash]`; the message bytes
    /// plus a terminating CRLF follow; the final 2xx `OK [txid]` carries
    /// the transaction id returned to the caller.
    pub async fn data(&mut self, fingerprint: &str, message: &[u8]) -> Result<String, Error> {
        self.require_stage(Stage::HaveRecipients, "DATA")?;

        let cmd = format!("DATA [{fingerprint}]\r\n");

        let go_ahead = match self.send_and_read(&cmd).await?.expect_continue() {
            Ok(reply) => reply,
            Err(e) => {
                self.envelope_dirty = true;
                return Err(e);
            }
        };

        let text = go_ahead.text();
        let mut tokens = text.split_ascii_whitespace();

        if !tokens
            .next()
            .map_or(false, |token| token.eq_ignore_ascii_case("CONTINUE"))
        {
            return Err(Error::ReplyParsing {
                with_source: format!("server DATA response was in unexpected format: {text}"),
            });
        }

        let commit_hash = tokens.next().and_then(bracketed).ok_or_else(|| {
            Error::ReplyParsing {
                with_source: format!("server DATA response was in unexpected format: {text}"),
            }
        })?;

        tracing::debug!(commit_hash, "server accepted DATA continuation");

        self.connection.write_all(message).await?;
        self.connection.write_all(b"\r\n").await?;

        let done = self.connection.read_reply_line().await?.expect_success()?;
        let text = done.text();
        let mut tokens = text.split_ascii_whitespace();

        if !tokens
            .next()
            .map_or(false, |token| token.eq_ignore_ascii_case("OK"))
        {
            return Err(Error::ReplyParsing {
                with_source: format!("server DATA response continuation was in unexpected format: {text}"),
            });
        }

        let txid = tokens.next().and_then(bracketed).ok_or_else(|| {
            Error::ReplyParsing {
                with_source: format!("server DATA response continuation was in unexpected format: {text}"),
            }
        })?;

        self.stage = Stage::Ready;

        Ok(txid.to_owned())
    }

    /// SGNT: fetch a named user or organizational signet as its base64
    /// payload. An optional fingerprint pins the expected version.
    pub async fn get_signet(
        &mut self,
        name: &str,
        fingerprint: Option<&str>,
    ) -> Result<String, Error> {
        self.require_dmtp()?;
        self.require_ready("SGNT")?;

        let cmd = command::sgnt(name, fingerprint);
        let reply = self.send_and_read(&cmd).await?.expect_success()?;
        let text = reply.text();

        // The reply is `OK [base64-signet]`.
        let rest = text
            .trim_start()
            .strip_prefix("OK")
            .ok_or_else(|| Error::ReplyParsing {
                with_source: "received malformed signet response from server".into(),
            })?
            .trim_start();

        bracketed(rest)
            .map(str::to_owned)
            .ok_or_else(|| Error::ReplyParsing {
                with_source: "received malformed signet response from server".into(),
            })
    }

    /// VRFY: check whether a named signet is current for a fingerprint.
    pub async fn verify_signet(
        &mut self,
        name: &str,
        fingerprint: &str,
    ) -> Result<SignetStatus, Error> {
        self.require_dmtp()?;
        self.require_ready("VRFY")?;

        let cmd = command::vrfy(name, fingerprint);
        let reply = self.send_and_read(&cmd).await?.expect_success()?;
        let text = reply.text();
        let mut tokens = text.split_ascii_whitespace();

        match tokens.next() {
            Some(status) if status.eq_ignore_ascii_case("CURRENT") => Ok(SignetStatus::Current),
            Some(status) if status.eq_ignore_ascii_case("UPDATE") => {
                let newprint = tokens.next().ok_or_else(|| Error::ReplyParsing {
                    with_source: "VRFY reply returned UPDATE without the corresponding fingerprint"
                        .into(),
                })?;

                Ok(SignetStatus::Update(newprint.to_owned()))
            }
            _ => Err(Error::ReplyParsing {
                with_source: format!("VRFY reply was in unexpected format: {text}"),
            }),
        }
    }

    /// HIST: retrieve the chain of custody of a named signet.
    pub async fn history(
        &mut self,
        name: &str,
        start_fingerprint: &str,
        stop_fingerprint: Option<&str>,
    ) -> Result<String, Error> {
        self.require_dmtp()?;
        self.require_ready("HIST")?;

        let cmd = command::hist(name, start_fingerprint, stop_fingerprint);

        Ok(self
            .send_and_read_multiline(&cmd)
            .await?
            .expect_success()?
            .text())
    }

    /// STATS, answering a `ONCE [nonce]` challenge with a second round
    /// when the server issues one.
    pub async fn stats(&mut self) -> Result<String, Error> {
        self.require_dmtp()?;
        self.require_ready("STATS")?;

        let reply = self
            .send_and_read_multiline("STATS\r\n")
            .await?
            .expect_success()?;
        let text = reply.text();
        let trimmed = text.trim_start();

        // No challenge: the first round already carries the data.
        let Some(rest) = trimmed
            .split_ascii_whitespace()
            .next()
            .filter(|token| token.eq_ignore_ascii_case("ONCE"))
            .and_then(|token| trimmed.get(token.len()..))
        else {
            return Ok(text);
        };

        let nonce = bracketed(rest.trim_start()).ok_or_else(|| Error::ReplyParsing {
            with_source: "STATS command returned unrecognized reply".into(),
        })?;

        let cmd = format!("STATS [{nonce}]\r\n");

        Ok(self
            .send_and_read_multiline(&cmd)
            .await?
            .expect_success()?
            .text())
    }
}

/// Strip one `[...]` bracket pair.
fn bracketed(token: &str) -> Option<&str> {
    token.strip_prefix('[')?.strip_suffix(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use vdime_mrec::parse_dime_record;

    fn record() -> DimeRecord {
        parse_dime_record(&format!(
            "ver=1 pok={}",
            base64::engine::general_purpose::STANDARD_NO_PAD.encode([9u8; 32])
        ))
        .unwrap()
    }

    /// Spin up a scripted server: for each (expected-prefix, response)
    /// pair, read one line, assert the prefix, send the response. A `None`
    /// expectation sends immediately (the banner).
    async fn scripted(script: Vec<(Option<&'static str>, &'static str)>) -> DmtpSession {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (peer, _) = listener.accept().await.unwrap();
            let (read, mut write) = peer.into_split();
            let mut lines = BufReader::new(read).lines();

            for (expect, response) in script {
                if let Some(prefix) = expect {
                    let line = lines.next_line().await.unwrap().unwrap_or_default();
                    assert!(
                        line.starts_with(prefix),
                        "expected {prefix:?}, got {line:?}"
                    );
                }

                write.write_all(response.as_bytes()).await.unwrap();
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();

        let mut session = DmtpSession {
            domain: "darkmail.example".into(),
            dx: "mx1.darkmail.example".into(),
            connection: Connection::plain(stream),
            // The scripted transport is plain; mode is forced to native so
            // every command is exercisable.
            mode: DmtpMode::Dmtp,
            stage: Stage::Greeted,
            active: false,
            envelope_dirty: false,
            record: record(),
        };

        session.expect_banner().await.unwrap();
        session.active = true;
        session
    }

    const BANNER: (Option<&str>, &str) = (None, "220 mx1.darkmail.example DMTPv1 ESMTP\r\n");

    #[tokio::test]
    async fn banner_and_multiline_ehlo() {
        let mut session = scripted(vec![
            BANNER,
            (
                Some("EHLO <darkmail.example>"),
                "250-size=10485760\r\n250 help\r\n",
            ),
        ])
        .await;

        let reply = session.ehlo().await.unwrap();
        assert_eq!(reply.code(), 250);
        assert_eq!(reply.text(), "size=10485760\nhelp");
        assert_eq!(session.stage(), Stage::Ready);
    }

    #[tokio::test]
    async fn banner_without_dmtp_token_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b"220 mx1.darkmail.example ESMTP\r\n")
                .await
                .unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut session = DmtpSession {
            domain: "darkmail.example".into(),
            dx: "mx1.darkmail.example".into(),
            connection: Connection::plain(stream),
            mode: DmtpMode::Dual,
            stage: Stage::Greeted,
            active: false,
            envelope_dirty: false,
            record: record(),
        };

        assert!(session.expect_banner().await.is_err());
    }

    #[tokio::test]
    async fn signet_payload_is_unwrapped() {
        let mut session = scripted(vec![
            BANNER,
            (Some("EHLO"), "250 ok\r\n"),
            (
                Some("SGNT <darkmail.example>"),
                "250 OK [c2lnbmV0LWJ5dGVz]\r\n",
            ),
        ])
        .await;

        session.ehlo().await.unwrap();
        let signet = session.get_signet("darkmail.example", None).await.unwrap();
        assert_eq!(signet, "c2lnbmV0LWJ5dGVz");
    }

    #[tokio::test]
    async fn signet_error_code_carries_server_text() {
        let mut session = scripted(vec![
            BANNER,
            (Some("EHLO"), "250 ok\r\n"),
            (Some("SGNT"), "551 no such signet\r\n"),
        ])
        .await;

        session.ehlo().await.unwrap();

        match session.get_signet("nobody@darkmail.example", None).await {
            Err(Error::Protocol { code, message }) => {
                assert_eq!(code, 551);
                assert_eq!(message, "no such signet");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn vrfy_maps_current_and_update() {
        let mut session = scripted(vec![
            BANNER,
            (Some("EHLO"), "250 ok\r\n"),
            (Some("VRFY <a@darkmail.example> [fp1]"), "250 CURRENT\r\n"),
            (Some("VRFY <a@darkmail.example> [fp0]"), "250 UPDATE fp1\r\n"),
        ])
        .await;

        session.ehlo().await.unwrap();
        assert_eq!(
            session.verify_signet("a@darkmail.example", "fp1").await.unwrap(),
            SignetStatus::Current
        );
        assert_eq!(
            session.verify_signet("a@darkmail.example", "fp0").await.unwrap(),
            SignetStatus::Update("fp1".into())
        );
    }

    #[tokio::test]
    async fn envelope_flow_with_data_transaction() {
        let mut session = scripted(vec![
            BANNER,
            (Some("EHLO"), "250 ok\r\n"),
            (
                Some("MAIL FROM: <alice@darkmail.example> [fpa] SIZE=13"),
                "250 sender ok\r\n",
            ),
            (
                Some("RCPT TO: <bob@darkmail.example> [fpb]"),
                "250 recipient ok\r\n",
            ),
            (Some("DATA [fpa]"), "354 CONTINUE [abcdef]\r\n"),
            // the payload line itself
            (Some("hello, world!"), "250 OK [tx123]\r\n"),
        ])
        .await;

        session.ehlo().await.unwrap();
        session
            .mail_from(
                "alice@darkmail.example",
                "fpa",
                13,
                ReturnType::Default,
                DataType::Default,
            )
            .await
            .unwrap();
        session.rcpt_to("bob@darkmail.example", "fpb").await.unwrap();

        let txid = session.data("fpa", b"hello, world!").await.unwrap();
        assert_eq!(txid, "tx123");
        assert_eq!(session.stage(), Stage::Ready);
    }

    #[tokio::test]
    async fn refused_rcpt_forces_an_implicit_reset() {
        let mut session = scripted(vec![
            BANNER,
            (Some("EHLO"), "250 ok\r\n"),
            (Some("MAIL"), "250 ok\r\n"),
            (Some("RCPT"), "550 no such user\r\n"),
            (Some("RSET"), "250 flushed\r\n"),
            (Some("MAIL"), "250 ok\r\n"),
        ])
        .await;

        session.ehlo().await.unwrap();
        session
            .mail_from("a@darkmail.example", "fp", 1, ReturnType::Default, DataType::Default)
            .await
            .unwrap();

        assert!(session.rcpt_to("x@darkmail.example", "fp").await.is_err());

        // The next MAIL silently resets the envelope first.
        session
            .mail_from("a@darkmail.example", "fp", 1, ReturnType::Default, DataType::Default)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stats_answers_a_nonce_challenge() {
        let mut session = scripted(vec![
            BANNER,
            (Some("EHLO"), "250 ok\r\n"),
            (Some("STATS"), "250 ONCE [n0nce]\r\n"),
            (Some("STATS [n0nce]"), "250-connections 4\r\n250 signets 2\r\n"),
        ])
        .await;

        session.ehlo().await.unwrap();
        assert_eq!(session.stats().await.unwrap(), "connections 4\nsignets 2");
    }

    #[tokio::test]
    async fn mode_reply_must_be_exactly_ok_and_identifier() {
        let mut session = scripted(vec![
            BANNER,
            (Some("MODE"), "250 OK DMTPv1\r\n"),
            (Some("MODE"), "250 OK DMTPv1 extra\r\n"),
        ])
        .await;

        assert_eq!(session.query_mode().await.unwrap(), DmtpMode::Dmtp);
        assert!(session.query_mode().await.is_err());
    }

    #[tokio::test]
    async fn lookup_commands_require_ready_stage() {
        let mut session = scripted(vec![BANNER]).await;

        // No EHLO yet.
        assert!(session.get_signet("darkmail.example", None).await.is_err());
    }

    #[tokio::test]
    async fn quit_closes_the_session() {
        let mut session = scripted(vec![
            BANNER,
            (Some("QUIT"), "221 goodbye\r\n"),
        ])
        .await;

        session.quit().await.unwrap();
        assert!(!session.is_active());
        assert_eq!(session.stage(), Stage::Closed);
    }
}
