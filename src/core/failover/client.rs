// src/core/failover/client.rs

//! A small, internal, asynchronous Valkey client used by the failover loop
//! to talk to the managed instances and to the virtual address.
//!
//! The client has no command pipelining, no client-side caching and no
//! automatic retries; the reconciliation loop owns the retry policy.

use crate::core::VigilError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::{TlsConnector, rustls};
use tokio_util::codec::{Decoder, Encoder};

/// Object-safe alias for the transport, so plain TCP and TLS connections
/// flow through the same client.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> AsyncStream for T {}

/// Connection settings applied uniformly to every instance, derived from the
/// `valkey` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

/// An internal client for sending commands to and receiving responses from
/// Valkey instances.
pub struct ValkeyClient {
    stream: Box<dyn AsyncStream>,
    codec: RespFrameCodec,
}

impl ValkeyClient {
    /// Opens a connection to `host:port`, performing the TLS and `AUTH`
    /// handshakes as dictated by the options. Every step is bounded by
    /// `deadline`.
    pub async fn connect(
        deadline: Instant,
        host: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<Self, VigilError> {
        let addr = format!("{host}:{port}");
        let tcp_stream = timeout_at(deadline, TcpStream::connect(&addr))
            .await
            .map_err(|_| VigilError::Timeout)??;

        let stream: Box<dyn AsyncStream> = if options.tls {
            let mut root_cert_store = rustls::RootCertStore::empty();
            root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();
            let connector = TlsConnector::from(Arc::new(tls_config));

            let domain = rustls::pki_types::ServerName::try_from(host)
                .map_err(|_| VigilError::InvalidServerName(host.to_string()))?
                .to_owned();

            let tls_stream = timeout_at(deadline, connector.connect(domain, tcp_stream))
                .await
                .map_err(|_| VigilError::Timeout)??;
            Box::new(tls_stream)
        } else {
            Box::new(tcp_stream)
        };

        let mut client = Self {
            stream,
            codec: RespFrameCodec,
        };
        client.authenticate(deadline, options).await?;
        Ok(client)
    }

    /// Issues `AUTH` when a password is configured.
    async fn authenticate(
        &mut self,
        deadline: Instant,
        options: &ConnectOptions,
    ) -> Result<(), VigilError> {
        let Some(password) = options.password.as_deref() else {
            return Ok(());
        };

        let mut parts = vec!["AUTH".to_string()];
        if let Some(username) = options.username.as_deref() {
            parts.push(username.to_string());
        }
        parts.push(password.to_string());

        let reply = self
            .send_and_receive(deadline, RespFrame::command(parts))
            .await?;
        match reply {
            RespFrame::SimpleString(s) if s == "OK" => Ok(()),
            other => Err(reply_error("AUTH", other)),
        }
    }

    /// A generic method to send a RESP frame and wait for a single response frame.
    pub async fn send_and_receive(
        &mut self,
        deadline: Instant,
        frame: RespFrame,
    ) -> Result<RespFrame, VigilError> {
        // 1. Encode the command frame into a byte buffer.
        let mut write_buf = BytesMut::new();
        self.codec.encode(frame, &mut write_buf)?;

        // 2. Send the encoded command to the server.
        timeout_at(deadline, self.stream.write_all(&write_buf))
            .await
            .map_err(|_| VigilError::Timeout)??;

        // 3. Loop to read the response from the server.
        let mut read_buf = BytesMut::with_capacity(4096);
        loop {
            let read_fut = self.stream.read_buf(&mut read_buf);
            match timeout_at(deadline, read_fut).await {
                Ok(Ok(0)) => return Err(VigilError::ConnectionClosed),
                Ok(Ok(_)) => {
                    if let Some(reply) = self.codec.decode(&mut read_buf)? {
                        return Ok(reply);
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(VigilError::Timeout),
            }
        }
    }

    /// Sends a `PING` command and expects a "PONG" simple string response.
    pub async fn ping(&mut self, deadline: Instant) -> Result<(), VigilError> {
        let reply = self
            .send_and_receive(deadline, RespFrame::command(["PING"]))
            .await?;
        match reply {
            RespFrame::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(reply_error("PING", other)),
        }
    }

    /// Sends an `INFO <section>` command and expects a bulk string response.
    pub async fn info(&mut self, deadline: Instant, section: &str) -> Result<String, VigilError> {
        let frame = RespFrame::command(vec!["INFO".to_string(), section.to_string()]);
        let reply = self.send_and_receive(deadline, frame).await?;
        match reply {
            RespFrame::BulkString(bs) => Ok(String::from_utf8_lossy(&bs).to_string()),
            other => Err(reply_error("INFO", other)),
        }
    }

    /// Issues `REPLICAOF <host> <port>`, pointing the server at the given master.
    pub async fn replicaof(
        &mut self,
        deadline: Instant,
        host: &str,
        port: u16,
    ) -> Result<(), VigilError> {
        let frame = RespFrame::command(vec![
            "REPLICAOF".to_string(),
            host.to_string(),
            port.to_string(),
        ]);
        let reply = self.send_and_receive(deadline, frame).await?;
        match reply {
            RespFrame::SimpleString(_) => Ok(()),
            other => Err(reply_error("REPLICAOF", other)),
        }
    }

    /// Issues `REPLICAOF NO ONE`, promoting the server to master.
    pub async fn replicaof_no_one(&mut self, deadline: Instant) -> Result<(), VigilError> {
        let reply = self
            .send_and_receive(deadline, RespFrame::command(["REPLICAOF", "NO", "ONE"]))
            .await?;
        match reply {
            RespFrame::SimpleString(_) => Ok(()),
            other => Err(reply_error("REPLICAOF", other)),
        }
    }
}

/// Maps an unwanted reply to the matching error: server `-ERR` replies keep
/// their message, anything else is reported against the command name.
fn reply_error(command: &str, reply: RespFrame) -> VigilError {
    match reply {
        RespFrame::Error(message) => VigilError::Server(message),
        _ => VigilError::UnexpectedReply(command.to_string()),
    }
}
