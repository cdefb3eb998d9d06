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
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Timeout for TCP connection attempts.
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Handshake-time certificate verifier that accepts every chain.
///
/// Peer trust for DX connections is not a property of the chain alone: it
/// depends on the DIME management record, so the decision is taken after
/// the handshake by [`crate::verify_dx_certificate`]. A session whose
/// peer fails that check is torn down before any protocol traffic.
struct DeferredVerification;

impl rustls::client::ServerCertVerifier for DeferredVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// TLS connection factory for DX sessions, both native (port 26) and as a
/// STARTTLS upgrade of an existing dual-mode socket.
#[derive(Clone)]
pub struct DxConnector {
    connector: TlsConnector,
}

impl std::fmt::Debug for DxConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DxConnector").finish()
    }
}

impl Default for DxConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl DxConnector {
    #[must_use]
    pub fn new() -> Self {
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(DeferredVerification))
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    fn server_name(host: &str) -> Result<rustls::ServerName, Error> {
        rustls::ServerName::try_from(host).map_err(|e| Error::Tls {
            with_source: format!("{host:?} is not a valid SNI name: {e}"),
        })
    }

    /// Open a TCP connection with the connect timeout applied.
    pub async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, Error> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: host.to_owned(),
                port,
            })??;

        tracing::debug!(host, port, "established TCP connection");

        Ok(stream)
    }

    /// Connect to a host over native TLS.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn connect(&self, host: &str, port: u16) -> Result<TlsStream<TcpStream>, Error> {
        let stream = self.connect_tcp(host, port).await?;

        self.handshake(stream, host).await
    }

    /// Upgrade an existing plain socket to TLS (STARTTLS). The caller must
    /// have drained its read buffer before the handshake begins.
    pub async fn handshake(
        &self,
        stream: TcpStream,
        host: &str,
    ) -> Result<TlsStream<TcpStream>, Error> {
        let name = Self::server_name(host)?;

        self.connector
            .connect(name, stream)
            .await
            .map_err(|e| Error::Tls {
                with_source: format!("TLS handshake with {host} failed: {e}"),
            })
    }

    /// DER encodings of the peer certificate chain of an open session,
    /// end-entity first.
    pub fn peer_chain(stream: &TlsStream<TcpStream>) -> Result<Vec<Vec<u8>>, Error> {
        let (_, session) = stream.get_ref();

        session
            .peer_certificates()
            .map(|certs| certs.iter().map(|cert| cert.0.clone()).collect())
            .ok_or_else(|| Error::Certificate {
                with_source: "could not get peer certificate".into(),
            })
    }
}
