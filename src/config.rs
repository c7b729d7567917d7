//! WolfRaft Configuration
//!
//! Configuration for the cluster connectivity layer: gossip feed, raft
//! transport, application RPC pool, and snapshot storage.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::addr;
use crate::error::{Error, Result};

/// Main WolfRaft configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfRaftConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Gossip membership configuration
    pub gossip: GossipConfig,

    /// Raft transport configuration
    pub raft: RaftConfig,

    /// Application RPC configuration
    pub rpc: RpcConfig,

    /// TLS material (optional; plain TCP when absent)
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Snapshot storage configuration
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Cluster role this node announces and expects from peers
    pub role: String,

    /// Data directory for snapshot storage
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Gossip membership configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Address the membership engine binds (its port becomes the `port` tag)
    pub listen_address: String,

    /// Membership event channel capacity; events are dropped beyond it
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Full reconciliation interval in seconds
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

/// Raft transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Address the raft stream layer binds
    pub listen_address: String,

    /// Advertised address for peers to dial; must be a concrete address.
    /// Falls back to `listen_address` when unset.
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Dial timeout in seconds
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

/// Application RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Address the application RPC server binds; its port distance from the
    /// raft listen port defines the pool's endpoint derivation offset
    pub listen_address: String,

    /// Health service name; health checking is skipped entirely when unset
    #[serde(default)]
    pub health_service: Option<String>,

    /// Dial timeout in seconds for pooled RPC connections
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

/// TLS material for the stream layer and the RPC pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM-encoded certificate chain
    pub cert_file: PathBuf,

    /// PEM-encoded private key
    pub key_file: PathBuf,
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Number of snapshots retained on disk
    #[serde(default = "default_retain_count")]
    pub retain_count: usize,

    /// Encryption token; snapshots are stored unencrypted when unset
    #[serde(default)]
    pub encryption_token: Option<String>,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfraft")
}

fn default_queue_size() -> usize {
    2048
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_dial_timeout_secs() -> u64 {
    10
}

fn default_retain_count() -> usize {
    5
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retain_count: default_retain_count(),
            encryption_token: None,
        }
    }
}

impl WolfRaftConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: WolfRaftConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.id.is_empty() {
            return Err(Error::Config("node.id cannot be empty".into()));
        }

        if self.node.role.is_empty() {
            return Err(Error::Config("node.role cannot be empty".into()));
        }

        addr::port_number(&self.gossip.listen_address)
            .map_err(|e| Error::Config(format!("gossip.listen_address: {}", e)))?;

        addr::port_number(&self.raft.listen_address)
            .map_err(|e| Error::Config(format!("raft.listen_address: {}", e)))?;

        addr::port_number(&self.rpc.listen_address)
            .map_err(|e| Error::Config(format!("rpc.listen_address: {}", e)))?;

        if self.snapshot.retain_count == 0 {
            return Err(Error::Config(
                "snapshot.retain_count must be at least 1".into(),
            ));
        }

        if let Some(token) = &self.snapshot.encryption_token {
            if token.is_empty() {
                return Err(Error::Config(
                    "snapshot.encryption_token is set but empty".into(),
                ));
            }
        }

        if let Some(service) = &self.rpc.health_service {
            if service.is_empty() {
                return Err(Error::Config("rpc.health_service is set but empty".into()));
            }
        }

        Ok(())
    }

    /// Raft dial timeout as Duration
    pub fn raft_dial_timeout(&self) -> Duration {
        Duration::from_secs(self.raft.dial_timeout_secs)
    }

    /// RPC dial timeout as Duration
    pub fn rpc_dial_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.dial_timeout_secs)
    }

    /// Reconciliation interval as Duration
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.gossip.reconcile_interval_secs)
    }

    /// The address peers dial for raft streams.
    ///
    /// Errors when the effective address is not concrete (unspecified IP or
    /// port zero): a wildcard bind cannot be advertised to peers.
    pub fn advertise_addr(&self) -> Result<SocketAddr> {
        let address = self
            .raft
            .advertise_address
            .as_deref()
            .unwrap_or(&self.raft.listen_address);

        let sa: SocketAddr = address.parse().map_err(|_| Error::InvalidAddress {
            address: address.to_string(),
            reason: "advertise address must be a concrete socket address".to_string(),
        })?;

        if sa.ip().is_unspecified() || sa.port() == 0 {
            return Err(Error::NotAdvertisable(address.to_string()));
        }

        Ok(sa)
    }

    /// Offset between the application RPC port and the raft port, applied to
    /// peer raft addresses to derive their RPC endpoints.
    pub fn rpc_port_offset(&self) -> Result<i32> {
        let raft_port = addr::port_number(&self.raft.listen_address)?;
        let rpc_port = addr::port_number(&self.rpc.listen_address)?;
        Ok(rpc_port as i32 - raft_port as i32)
    }
}
