//! Server descriptors and gossip member tag parsing.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A member record as reported by the gossip engine.
#[derive(Debug, Clone)]
pub struct Member {
    /// Gossip node name
    pub name: String,
    /// Member IP address
    pub addr: IpAddr,
    /// Gossip bind port
    pub port: u16,
    /// Announced tags (`id`, `role`, `port`, `raft-port`, `rpc-port`, ...)
    pub tags: HashMap<String, String>,
    /// Gossip liveness status ("alive", "failed", "left", ...)
    pub status: String,
}

impl Member {
    /// True when the gossip engine considers the member live.
    pub fn is_alive(&self) -> bool {
        self.status.eq_ignore_ascii_case("alive")
    }
}

/// Identity and address record for one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Gossip node name
    pub name: String,
    /// Globally unique server ID
    pub id: String,
    /// Logical network address (`host:port`) the transport resolves to
    pub address: String,
    /// Port component of `address`
    pub port: u16,
    /// Gossip bind port the member joined on
    pub join_port: u16,
    /// Raft stream layer port
    pub raft_port: u16,
    /// Application RPC port
    pub rpc_port: u16,
    /// Build identifier announced by the member
    pub build: String,
    /// Version announced by the member
    pub version: String,
    /// Gossip status at parse time
    pub status: String,
}

impl std::fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}] at {}", self.name, self.id, self.address)
    }
}

fn port_tag(member: &Member, key: &str) -> Result<u16> {
    let value = member.tags.get(key).ok_or_else(|| Error::MemberTags {
        member: member.name.clone(),
        reason: format!("missing '{}' tag", key),
    })?;
    value.parse().map_err(|_| Error::MemberTags {
        member: member.name.clone(),
        reason: format!("invalid '{}' tag '{}'", key, value),
    })
}

/// Translate a gossip member record into a server descriptor.
///
/// Members whose `role` tag does not match this cluster's expected role are
/// rejected; callers log and skip them rather than failing.
pub fn parse_member_tags(member: &Member, expected_role: &str) -> Result<ServerDescriptor> {
    let role = member.tags.get("role").map(String::as_str).unwrap_or("");
    if role != expected_role {
        return Err(Error::RoleMismatch {
            member: member.name.clone(),
            role: role.to_string(),
            expected: expected_role.to_string(),
        });
    }

    let port = port_tag(member, "port")?;
    let raft_port = port_tag(member, "raft-port")?;
    let rpc_port = port_tag(member, "rpc-port")?;

    let id = member.tags.get("id").cloned().ok_or_else(|| Error::MemberTags {
        member: member.name.clone(),
        reason: "missing 'id' tag".to_string(),
    })?;

    Ok(ServerDescriptor {
        name: member.name.clone(),
        id,
        address: SocketAddr::new(member.addr, port).to_string(),
        port,
        join_port: member.port,
        raft_port,
        rpc_port,
        build: member.tags.get("build").cloned().unwrap_or_default(),
        version: member.tags.get("version").cloned().unwrap_or_default(),
        status: member.status.clone(),
    })
}
