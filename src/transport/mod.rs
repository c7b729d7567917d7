//! Transport Module
//!
//! Stream layer between consensus nodes: plain or TLS TCP, behind the
//! dial/accept/close/addr capability the consensus engine drives.

pub mod tls;

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsConnector;

use crate::addr;
use crate::error::{Error, Result};

/// A stream between two cluster nodes.
///
/// Accepted streams are plain TCP; dialed streams are TLS when the layer is
/// configured with TLS material.
#[derive(Debug)]
pub enum RaftStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for RaftStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RaftStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            RaftStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RaftStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            RaftStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            RaftStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RaftStream::Plain(s) => Pin::new(s).poll_flush(cx),
            RaftStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RaftStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            RaftStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dial a peer with a hard deadline, negotiating TLS when configured.
pub(crate) async fn dial_stream(
    address: &str,
    dial_timeout: Duration,
    tls: Option<Arc<rustls::ClientConfig>>,
) -> Result<RaftStream> {
    let connect = async move {
        let tcp = TcpStream::connect(address)
            .await
            .map_err(|e| Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        tcp.set_nodelay(true)?;

        match tls {
            None => Ok(RaftStream::Plain(tcp)),
            Some(config) => {
                let (host, _) = addr::split_host_port(address)?;
                let server_name = rustls::pki_types::ServerName::try_from(host)
                    .map_err(|e| Error::Tls(e.to_string()))?;
                let stream = TlsConnector::from(config)
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Tls(e.to_string()))?;
                Ok(RaftStream::Tls(Box::new(stream)))
            }
        }
    };

    match tokio::time::timeout(dial_timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
    }
}

/// Stream capability consumed by the consensus engine.
#[async_trait]
pub trait StreamLayer: Send + Sync {
    /// Dial a peer, failing with a timeout error past the deadline.
    async fn dial(&self, address: &str, timeout: Duration) -> Result<RaftStream>;

    /// Accept the next inbound stream.
    async fn accept(&self) -> Result<(RaftStream, SocketAddr)>;

    /// Stop accepting; pending and future `accept`/`dial` calls return
    /// `Error::ShuttingDown`.
    fn close(&self);

    /// The address peers should dial.
    fn addr(&self) -> SocketAddr;
}

/// TCP stream layer with optional TLS on dial.
#[derive(Debug)]
pub struct TcpStreamLayer {
    listener: TcpListener,
    advertise: SocketAddr,
    tls: Option<Arc<rustls::ClientConfig>>,
    shutdown: watch::Sender<bool>,
}

impl TcpStreamLayer {
    /// Wrap a bound listener.
    ///
    /// `advertise` defaults to the listener's bound address. Construction
    /// fails when the effective advertise address is not concrete: a
    /// wildcard bind cannot be handed to peers and must be resolved to an
    /// interface address first.
    pub fn new(
        listener: TcpListener,
        advertise: Option<SocketAddr>,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self> {
        let advertise = match advertise {
            Some(advertise) => advertise,
            None => listener.local_addr()?,
        };

        if advertise.ip().is_unspecified() || advertise.port() == 0 {
            return Err(Error::NotAdvertisable(advertise.to_string()));
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            advertise,
            tls,
            shutdown,
        })
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[async_trait]
impl StreamLayer for TcpStreamLayer {
    async fn dial(&self, address: &str, timeout: Duration) -> Result<RaftStream> {
        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }
        dial_stream(address, timeout, self.tls.clone()).await
    }

    async fn accept(&self) -> Result<(RaftStream, SocketAddr)> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }

        tokio::select! {
            result = self.listener.accept() => {
                let (stream, peer) = result?;
                stream.set_nodelay(true)?;
                Ok((RaftStream::Plain(stream), peer))
            }
            _ = shutdown.changed() => Err(Error::ShuttingDown),
        }
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    fn addr(&self) -> SocketAddr {
        self.advertise
    }
}
