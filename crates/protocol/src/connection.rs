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

use crate::reply::{parse_line, Reply};
use crate::{Error, LINE_BUF_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use vdime_tls::DxConnector;

/// One CRLF-terminated line read from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// Set when the line exceeded the input buffer and was returned
    /// truncated, without its terminator.
    pub overflow: bool,
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Torn down, or mid-upgrade.
    Closed,
}

/// A DMTP connection: a plain or TLS byte stream plus the bounded line
/// input buffer. The read/write layer is swapped in place by the
/// dual-mode STARTTLS upgrade; everything above it is unaffected.
pub struct Connection {
    transport: Transport,
    inbuf: Vec<u8>,
    open: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field(
                "transport",
                match self.transport {
                    Transport::Plain(_) => &"plain",
                    Transport::Tls(_) => &"tls",
                    Transport::Closed => &"closed",
                },
            )
            .field("buffered", &self.inbuf.len())
            .field("open", &self.open)
            .finish()
    }
}

impl Connection {
    /// Wrap a plain TCP stream (dual-mode entry).
    #[must_use]
    pub fn plain(stream: TcpStream) -> Self {
        Self {
            transport: Transport::Plain(stream),
            inbuf: Vec::with_capacity(LINE_BUF_SIZE),
            open: true,
        }
    }

    /// Wrap an established TLS stream (native entry).
    #[must_use]
    pub fn tls(stream: TlsStream<TcpStream>) -> Self {
        Self {
            transport: Transport::Tls(Box::new(stream)),
            inbuf: Vec::with_capacity(LINE_BUF_SIZE),
            open: true,
        }
    }

    /// Whether the transport is TLS-protected.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// Whether the peer is still there.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// DER encodings of the peer certificate chain, end-entity first.
    /// Only available on TLS transports.
    pub fn peer_chain(&self) -> Result<Vec<Vec<u8>>, Error> {
        match &self.transport {
            Transport::Tls(stream) => Ok(DxConnector::peer_chain(stream)?),
            Transport::Plain(_) | Transport::Closed => Err(Error::BadState {
                with_source: "connection carries no peer certificate".into(),
            }),
        }
    }

    async fn fill(&mut self) -> Result<usize, Error> {
        let mut chunk = [0u8; 1024];

        let nread = match &mut self.transport {
            Transport::Plain(stream) => stream.read(&mut chunk).await?,
            Transport::Tls(stream) => stream.read(&mut chunk).await?,
            Transport::Closed => 0,
        };

        if nread == 0 {
            self.open = false;
        } else {
            self.inbuf.extend_from_slice(&chunk[..nread]);
        }

        Ok(nread)
    }

    /// Read one CRLF-terminated line, buffering across reads. Lines are
    /// bounded at [`LINE_BUF_SIZE`] bytes; longer input is returned as an
    /// overflowed line. An unexpected disconnect surfaces any buffered
    /// partial line first and errors afterwards.
    pub async fn read_line(&mut self) -> Result<Line, Error> {
        loop {
            match memchr::memmem::find(&self.inbuf, b"\r\n") {
                Some(at) if at <= LINE_BUF_SIZE => {
                    let line = String::from_utf8_lossy(&self.inbuf[..at]).into_owned();
                    self.inbuf.drain(..at + 2);

                    tracing::trace!(line, "DMTP <");

                    return Ok(Line {
                        text: line,
                        overflow: false,
                    });
                }
                _ => {}
            }

            // A line that outgrows the buffer is surfaced truncated; the
            // unread tail will come back as (likely unparsable) input.
            if self.inbuf.len() > LINE_BUF_SIZE {
                let line = String::from_utf8_lossy(&self.inbuf[..LINE_BUF_SIZE]).into_owned();
                self.inbuf.drain(..LINE_BUF_SIZE);

                tracing::warn!("peer line exceeded the input buffer");

                return Ok(Line {
                    text: line,
                    overflow: true,
                });
            }

            if !self.open {
                return Err(Error::Connection {
                    with_source: "connection closed by peer".into(),
                });
            }

            if self.fill().await? == 0 && !self.inbuf.is_empty() {
                // Hand back whatever is buffered; the next read errors.
                let line = String::from_utf8_lossy(&self.inbuf).into_owned();
                self.inbuf.clear();

                return Ok(Line {
                    text: line,
                    overflow: false,
                });
            }
        }
    }

    /// Read one reply line (no continuation allowed).
    pub async fn read_reply_line(&mut self) -> Result<Reply, Error> {
        let line = self.read_line().await?;
        let parsed = parse_line(&line.text)?;

        Ok(Reply::new(parsed.code, vec![parsed.text], line.overflow))
    }

    /// Read a complete reply, following `CODE-TEXT` continuation lines
    /// until the terminal `CODE TEXT` line. Every line must repeat the
    /// same code.
    pub async fn read_reply(&mut self) -> Result<Reply, Error> {
        let mut code = None;
        let mut lines = vec![];
        let mut overflow = false;

        loop {
            let line = self.read_line().await?;
            let parsed = parse_line(&line.text)?;

            match code {
                None => code = Some(parsed.code),
                Some(code) if code == parsed.code => {}
                Some(_) => {
                    return Err(Error::ReplyParsing {
                        with_source: "multiline response returned unexpected response code".into(),
                    })
                }
            }

            overflow |= line.overflow;
            lines.push(parsed.text);

            if !parsed.continued {
                break;
            }
        }

        Ok(Reply::new(code.unwrap_or_default(), lines, overflow))
    }

    /// Write a full buffer to the peer.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.write_all(data).await?,
            Transport::Tls(stream) => stream.write_all(data).await?,
            Transport::Closed => {
                return Err(Error::BadState {
                    with_source: "connection is closed".into(),
                })
            }
        }

        Ok(())
    }

    /// Issue one CRLF-terminated command line.
    pub async fn send_command(&mut self, command: &str) -> Result<(), Error> {
        tracing::trace!(command = command.trim_end(), "DMTP >");

        self.write_all(command.as_bytes()).await
    }

    /// Swap the plain read/write layer for TLS on the same socket. The
    /// pre-upgrade line buffer must have been fully drained: bytes read
    /// before the handshake cannot belong to the TLS stream.
    pub async fn upgrade_tls(&mut self, connector: &DxConnector, host: &str) -> Result<(), Error> {
        if !self.inbuf.is_empty() {
            return Err(Error::BadState {
                with_source: "line buffer still held data at STARTTLS time".into(),
            });
        }

        let Transport::Plain(stream) = std::mem::replace(&mut self.transport, Transport::Closed)
        else {
            return Err(Error::BadState {
                with_source: "cannot initiate STARTTLS if a TLS session already exists".into(),
            });
        };

        match connector.handshake(stream, host).await {
            Ok(stream) => {
                self.transport = Transport::Tls(Box::new(stream));
                Ok(())
            }
            Err(e) => {
                self.open = false;
                Err(e.into())
            }
        }
    }

    /// Drop the connection without a protocol farewell.
    pub async fn shutdown(&mut self) {
        let result = match &mut self.transport {
            Transport::Plain(stream) => stream.shutdown().await,
            Transport::Tls(stream) => stream.shutdown().await,
            Transport::Closed => Ok(()),
        };

        if let Err(e) = result {
            tracing::debug!(%e, "connection shutdown reported an error");
        }

        self.open = false;
    }
}
