// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Byte-stream transport for one connection: plain TCP or TLS, with a
//! mid-stream STARTTLS upgrade. The transport owns the response
//! decoder so callers only ever see complete typed responses.

use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::imap::command::WireChunk;
use crate::modules::imap::parser::ResponseDecoder;
use crate::modules::imap::response::ImapResponse;
use crate::modules::settings::{Encryption, ImapServerConfig};
use crate::raise_error;
use rustls::RootCertStore;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Install the process-wide rustls crypto provider. Safe to call more
/// than once; later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());
}

pub enum TransportStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Stands in while a STARTTLS upgrade is in flight or after the
    /// transport died; any I/O on it is a bug and errors out.
    Closed,
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStream::Tcp(_) => f.write_str("TransportStream::Tcp"),
            TransportStream::Tls(_) => f.write_str("TransportStream::Tls"),
            TransportStream::Closed => f.write_str("TransportStream::Closed"),
        }
    }
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "transport is closed")
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            TransportStream::Closed => Poll::Ready(Err(closed_error())),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            TransportStream::Closed => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            TransportStream::Closed => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            TransportStream::Closed => Poll::Ready(Err(closed_error())),
        }
    }
}

fn tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.into(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn wrap_tls(stream: TcpStream, server_hostname: &str) -> MailBeamResult<TransportStream> {
    let server_name = rustls_pki_types::ServerName::try_from(server_hostname)
        .map_err(|_| raise_error!("Invalid DNS name".into(), ErrorCode::NetworkError))?
        .to_owned();
    let tls_stream = tls_connector()
        .connect(server_name, stream)
        .await
        .map_err(|e| raise_error!(e.to_string(), ErrorCode::TlsHandshakeFailed))?;
    Ok(TransportStream::Tls(Box::new(tls_stream)))
}

#[derive(Debug)]
pub struct Transport {
    stream: TransportStream,
    decoder: ResponseDecoder,
    host: String,
    /// Set once the transport has failed; any further use errors out.
    dead: bool,
}

impl Transport {
    /// Open a TCP connection (with the configured timeout) and, for
    /// implicit TLS, complete the handshake. The greeting is *not*
    /// consumed here; that is the state machine's job.
    pub async fn connect(config: &ImapServerConfig) -> MailBeamResult<Self> {
        let address = format!("{}:{}", config.host, config.port);
        debug!("Attempting IMAP connection to {address}");
        let tcp_stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                raise_error!(
                    format!("connect to {address} timed out"),
                    ErrorCode::ConnectionTimeout
                )
            })?
            .map_err(|e| raise_error!(e.to_string(), ErrorCode::NetworkError))?;
        tcp_stream
            .set_nodelay(true)
            .map_err(|e| raise_error!(e.to_string(), ErrorCode::NetworkError))?;

        let stream = match config.encryption {
            Encryption::Ssl => wrap_tls(tcp_stream, &config.host).await?,
            Encryption::StartTls | Encryption::None => TransportStream::Tcp(tcp_stream),
        };

        Ok(Self {
            stream,
            decoder: ResponseDecoder::new(),
            host: config.host.clone(),
            dead: false,
        })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.stream, TransportStream::Tls(_))
    }

    /// Upgrade a plain stream after the tagged STARTTLS OK. Any bytes
    /// still sitting in the decoder would have arrived outside TLS;
    /// that is a protocol violation.
    pub async fn upgrade_tls(&mut self) -> MailBeamResult<()> {
        if self.decoder.buffered_len() > 0 {
            return Err(raise_error!(
                "server data received between STARTTLS completion and handshake".into(),
                ErrorCode::ProtocolViolation
            ));
        }
        let host = self.host.clone();
        // steal the stream; on failure the transport stays dead
        let old = std::mem::replace(&mut self.stream, TransportStream::Closed);
        let tcp = match old {
            TransportStream::Tcp(tcp) => tcp,
            other => {
                self.stream = other;
                return Err(raise_error!(
                    "STARTTLS on an already encrypted stream".into(),
                    ErrorCode::ProtocolViolation
                ));
            }
        };
        match wrap_tls(tcp, &host).await {
            Ok(upgraded) => {
                self.stream = upgraded;
                Ok(())
            }
            Err(err) => {
                self.dead = true;
                Err(err)
            }
        }
    }

    /// Write one serialized chunk. Waiting for continuations between
    /// chunks is the session's responsibility.
    pub async fn send(&mut self, chunk: &WireChunk) -> MailBeamResult<()> {
        if self.dead {
            return Err(raise_error!(
                "transport is closed".into(),
                ErrorCode::ConnectionClosed
            ));
        }
        self.stream
            .write_all(&chunk.bytes)
            .await
            .map_err(|e| raise_error!(e.to_string(), ErrorCode::NetworkError))?;
        self.stream
            .flush()
            .await
            .map_err(|e| raise_error!(e.to_string(), ErrorCode::NetworkError))?;
        Ok(())
    }

    /// Read until one complete response is available. Returns the
    /// terminal `Disconnected` record exactly once when the peer goes
    /// away; afterwards every call errors.
    pub async fn read_response(&mut self) -> MailBeamResult<ImapResponse> {
        if self.dead {
            return Err(raise_error!(
                "transport is closed".into(),
                ErrorCode::ConnectionClosed
            ));
        }
        loop {
            if let Some(response) = self.decoder.try_next()? {
                return Ok(response);
            }
            let mut buf = [0u8; 8 * 1024];
            let n = self
                .stream
                .read(&mut buf)
                .await
                .map_err(|e| raise_error!(e.to_string(), ErrorCode::NetworkError))?;
            if n == 0 {
                self.dead = true;
                return Ok(ImapResponse::Disconnected {
                    reason: "connection closed by server".into(),
                });
            }
            self.decoder.feed(&buf[..n]);
        }
    }
}

