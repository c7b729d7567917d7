//! Cluster Module
//!
//! Routing table and gossip membership bridge.

mod bridge;
mod lookup;
mod server;

pub use bridge::{
    MemberList, MembershipBridge, MembershipEvent, MembershipFeed, UserEventHandler,
};
pub use lookup::{ServerAddressProvider, ServerLookup};
pub use server::{parse_member_tags, Member, ServerDescriptor};
