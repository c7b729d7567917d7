//! WolfRaft - Cluster Connectivity Layer
//!
//! The networking and secure-persistence layer beneath a WolfScale
//! consensus node. The consensus algorithm, the gossip protocol, and the
//! durable log stores are external; this crate supplies everything that
//! connects them:
//!
//! - A concurrent routing table resolving server IDs and addresses to peer
//!   descriptors, fed by gossip membership events with periodic
//!   reconciliation against the authoritative member list
//! - A plain/TLS TCP stream layer satisfying the consensus engine's
//!   dial/accept contract
//! - A deduplicated, health-checked pool of outbound RPC connections with
//!   port-offset endpoint derivation
//! - Transparent per-snapshot stream encryption over any snapshot store
//!
//! # Security
//!
//! Inter-node TLS intentionally skips server-certificate verification:
//! peers authenticate each other at the consensus protocol layer, and TLS
//! here provides transport privacy only. See `transport::tls`.

pub mod addr;
pub mod cluster;
pub mod config;
pub mod error;
pub mod rpc;
pub mod snapshot;
pub mod transport;

pub use config::WolfRaftConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{
        Member, MembershipBridge, MembershipEvent, MembershipFeed, ServerAddressProvider,
        ServerDescriptor, ServerLookup,
    };
    pub use crate::config::WolfRaftConfig;
    pub use crate::error::{Error, Result};
    pub use crate::rpc::{ClientPool, RpcConnection};
    pub use crate::snapshot::{EncryptedSnapshotStore, FileSnapshotStore, SnapshotStore};
    pub use crate::transport::{StreamLayer, TcpStreamLayer};
}
