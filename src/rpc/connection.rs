//! Pooled RPC Connection
//!
//! A shared handle to one outbound application-RPC stream. The application
//! defines its own request/response messages; this layer only carries them
//! as frames.

use tokio::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{read_message, write_message};
use crate::error::Result;
use crate::transport::RaftStream;

/// One established connection to a peer's RPC endpoint.
#[derive(Debug)]
pub struct RpcConnection {
    endpoint: String,
    raft_address: String,
    stream: Mutex<RaftStream>,
}

impl RpcConnection {
    pub(crate) fn new(
        endpoint: impl Into<String>,
        raft_address: impl Into<String>,
        stream: RaftStream,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            raft_address: raft_address.into(),
            stream: Mutex::new(stream),
        }
    }

    /// The RPC endpoint this connection is dialed to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The peer's raft transport address the pool keys this connection by.
    pub fn raft_address(&self) -> &str {
        &self.raft_address
    }

    /// Send a request frame and wait for the response frame.
    ///
    /// The stream is held for the full exchange, so concurrent callers are
    /// serialized rather than interleaved.
    pub async fn request<Q, R>(&self, message: &Q) -> Result<R>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        let mut stream = self.stream.lock().await;
        write_message(&mut *stream, message).await?;
        read_message(&mut *stream).await
    }

    /// Send a frame without waiting for a response.
    pub async fn send<Q>(&self, message: &Q) -> Result<()>
    where
        Q: Serialize,
    {
        let mut stream = self.stream.lock().await;
        write_message(&mut *stream, message).await
    }
}
