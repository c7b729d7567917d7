//! Health Check Protocol
//!
//! Framed health checking for pooled RPC connections: a one-shot `Check`
//! plus a long-lived `Watch` stream of status updates. Peers that predate
//! health checking answer `NotImplemented` and are left unwatched. Serving
//! this protocol is the application RPC server's responsibility.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{read_message, write_message};
use crate::error::{Error, Result};
use crate::transport::{dial_stream, RaftStream};

/// Health requests carried over a dedicated framed stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HealthRequest {
    /// One-shot status probe
    Check { service: String },
    /// Subscribe to status updates until the stream ends
    Watch { service: String },
}

/// Health responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HealthResponse {
    Status(ServingStatus),
    /// The peer does not serve health checks
    NotImplemented,
}

/// Reported liveness of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
    ServiceUnknown,
}

impl std::fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServingStatus::Unknown => write!(f, "UNKNOWN"),
            ServingStatus::Serving => write!(f, "SERVING"),
            ServingStatus::NotServing => write!(f, "NOT_SERVING"),
            ServingStatus::ServiceUnknown => write!(f, "SERVICE_UNKNOWN"),
        }
    }
}

/// Client side of the health protocol for one peer endpoint.
pub struct HealthClient {
    endpoint: String,
    service: String,
    tls: Option<Arc<rustls::ClientConfig>>,
    dial_timeout: Duration,
}

impl HealthClient {
    pub fn new(
        endpoint: impl Into<String>,
        service: impl Into<String>,
        tls: Option<Arc<rustls::ClientConfig>>,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            service: service.into(),
            tls,
            dial_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open(&self) -> Result<RaftStream> {
        dial_stream(&self.endpoint, self.dial_timeout, self.tls.clone()).await
    }

    /// One-shot health probe.
    ///
    /// `Error::HealthUnimplemented` means the peer answered but does not
    /// serve health checks.
    pub async fn check(&self) -> Result<ServingStatus> {
        let mut stream = self.open().await?;
        write_message(
            &mut stream,
            &HealthRequest::Check {
                service: self.service.clone(),
            },
        )
        .await?;

        match read_message(&mut stream).await? {
            HealthResponse::Status(status) => Ok(status),
            HealthResponse::NotImplemented => Err(Error::HealthUnimplemented),
        }
    }

    /// Open a streaming watch; the peer pushes a status frame on every
    /// transition until it closes the stream.
    pub async fn watch(&self) -> Result<HealthWatch> {
        let mut stream = self.open().await?;
        write_message(
            &mut stream,
            &HealthRequest::Watch {
                service: self.service.clone(),
            },
        )
        .await?;

        Ok(HealthWatch { stream })
    }
}

/// A live health watch stream.
pub struct HealthWatch {
    stream: RaftStream,
}

impl HealthWatch {
    /// Next status update; `None` when the peer closed the stream.
    pub async fn next(&mut self) -> Result<Option<ServingStatus>> {
        match read_message(&mut self.stream).await {
            Ok(HealthResponse::Status(status)) => Ok(Some(status)),
            Ok(HealthResponse::NotImplemented) => Ok(None),
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_status_display() {
        assert_eq!(ServingStatus::Serving.to_string(), "SERVING");
        assert_eq!(ServingStatus::NotServing.to_string(), "NOT_SERVING");
    }

    #[tokio::test]
    async fn test_check_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request: HealthRequest = read_message(&mut socket).await.unwrap();
            assert!(matches!(request, HealthRequest::Check { service } if service == "db.rpc"));
            write_message(&mut socket, &HealthResponse::Status(ServingStatus::Serving))
                .await
                .unwrap();
        });

        let client = HealthClient::new(endpoint, "db.rpc", None, Duration::from_secs(5));
        assert_eq!(client.check().await.unwrap(), ServingStatus::Serving);
    }

    #[tokio::test]
    async fn test_check_not_implemented() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _: HealthRequest = read_message(&mut socket).await.unwrap();
            write_message(&mut socket, &HealthResponse::NotImplemented)
                .await
                .unwrap();
        });

        let client = HealthClient::new(endpoint, "db.rpc", None, Duration::from_secs(5));
        assert!(matches!(
            client.check().await,
            Err(Error::HealthUnimplemented)
        ));
    }

    #[tokio::test]
    async fn test_watch_stream_until_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _: HealthRequest = read_message(&mut socket).await.unwrap();
            for status in [ServingStatus::Serving, ServingStatus::NotServing] {
                write_message(&mut socket, &HealthResponse::Status(status))
                    .await
                    .unwrap();
            }
            // Dropping the socket ends the watch.
        });

        let client = HealthClient::new(endpoint, "db.rpc", None, Duration::from_secs(5));
        let mut watch = client.watch().await.unwrap();

        assert_eq!(watch.next().await.unwrap(), Some(ServingStatus::Serving));
        assert_eq!(watch.next().await.unwrap(), Some(ServingStatus::NotServing));
        assert_eq!(watch.next().await.unwrap(), None);
    }
}
