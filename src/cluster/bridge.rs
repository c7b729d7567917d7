//! Membership Bridge
//!
//! Consumes membership events from the gossip engine and keeps the routing
//! table in sync. Event delivery is lossy under backpressure; a periodic
//! full reconciliation against the engine's member list bounds staleness.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::lookup::ServerLookup;
use super::server::{parse_member_tags, Member};

/// Membership events as emitted by the gossip engine.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    Join(Vec<Member>),
    Update(Vec<Member>),
    Leave(Vec<Member>),
    Failed(Vec<Member>),
    Reap(Vec<Member>),
    /// Application-level broadcast; never mutates the routing table
    User { name: String, payload: Vec<u8> },
    /// Query events are acknowledged elsewhere; ignored here
    Query { name: String },
}

impl MembershipEvent {
    fn type_name(&self) -> &'static str {
        match self {
            MembershipEvent::Join(_) => "Join",
            MembershipEvent::Update(_) => "Update",
            MembershipEvent::Leave(_) => "Leave",
            MembershipEvent::Failed(_) => "Failed",
            MembershipEvent::Reap(_) => "Reap",
            MembershipEvent::User { .. } => "User",
            MembershipEvent::Query { .. } => "Query",
        }
    }
}

/// Authoritative member list capability, used for reconciliation.
pub trait MemberList: Send + Sync {
    fn members(&self) -> Vec<Member>;
}

/// Side-channel handler for `"<role>:*"` user events.
pub type UserEventHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Publishing side of the membership event channel.
///
/// `publish` never blocks the gossip engine: when the bridge falls behind
/// the bounded channel, events are dropped and reconciliation catches up.
#[derive(Clone)]
pub struct MembershipFeed {
    tx: mpsc::Sender<MembershipEvent>,
}

impl MembershipFeed {
    pub fn publish(&self, event: MembershipEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            warn!(
                "Membership event queue full, dropping {} event (reconciliation will recover)",
                event.type_name()
            );
        }
    }
}

/// Bridges gossip membership into the routing table.
pub struct MembershipBridge {
    lookup: Arc<ServerLookup>,
    expected_role: String,
    member_list: Arc<dyn MemberList>,
    user_handler: Option<UserEventHandler>,
    reconcile_interval: Duration,
}

impl MembershipBridge {
    pub fn new(
        lookup: Arc<ServerLookup>,
        expected_role: impl Into<String>,
        member_list: Arc<dyn MemberList>,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            lookup,
            expected_role: expected_role.into(),
            member_list,
            user_handler: None,
            reconcile_interval,
        }
    }

    /// Install a handler for application user events.
    pub fn with_user_handler(mut self, handler: UserEventHandler) -> Self {
        self.user_handler = Some(handler);
        self
    }

    /// Create the bounded event channel the gossip engine publishes into.
    pub fn channel(capacity: usize) -> (MembershipFeed, mpsc::Receiver<MembershipEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (MembershipFeed { tx }, rx)
    }

    /// Seed the routing table from the engine's current member list.
    pub fn bootstrap(&self) {
        self.reconcile();
        info!(
            "Membership bridge bootstrapped with {} servers",
            self.lookup.len()
        );
    }

    /// Apply a single membership event to the routing table.
    pub fn handle_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Join(members) | MembershipEvent::Update(members) => {
                for member in &members {
                    match parse_member_tags(member, &self.expected_role) {
                        Ok(server) => {
                            info!("Member up: {}", server);
                            self.lookup.add_server(server);
                        }
                        Err(e) => debug!("Skipping member '{}': {}", member.name, e),
                    }
                }
            }
            MembershipEvent::Leave(members)
            | MembershipEvent::Failed(members)
            | MembershipEvent::Reap(members) => {
                for member in &members {
                    match parse_member_tags(member, &self.expected_role) {
                        Ok(server) => {
                            info!("Member down: {}", server);
                            self.lookup.remove_server(&server);
                        }
                        Err(e) => debug!("Skipping member '{}': {}", member.name, e),
                    }
                }
            }
            MembershipEvent::User { name, payload } => self.handle_user_event(&name, &payload),
            MembershipEvent::Query { name } => {
                debug!("Ignoring membership query '{}'", name);
            }
        }
    }

    fn handle_user_event(&self, name: &str, payload: &[u8]) {
        let prefix = format!("{}:", self.expected_role);
        let Some(event) = name.strip_prefix(prefix.as_str()) else {
            return;
        };

        if event == "new-leader" {
            info!("New leader elected: {}", String::from_utf8_lossy(payload));
        }

        if let Some(handler) = &self.user_handler {
            handler(event, payload);
        }
    }

    /// Full pass against the authoritative member list.
    ///
    /// Recovers from any events dropped by the bounded channel: alive
    /// members are upserted, dead ones removed, and routing entries whose
    /// ID no longer appears in the list are dropped as stale.
    pub fn reconcile(&self) {
        let members = self.member_list.members();
        let mut live_ids = std::collections::HashSet::new();

        for member in &members {
            match parse_member_tags(member, &self.expected_role) {
                Ok(server) => {
                    if member.is_alive() {
                        live_ids.insert(server.id.clone());
                        self.lookup.add_server(server);
                    } else {
                        self.lookup.remove_server(&server);
                    }
                }
                Err(e) => debug!("Reconcile skipping member '{}': {}", member.name, e),
            }
        }

        for stale in self
            .lookup
            .all_servers()
            .into_iter()
            .filter(|s| !live_ids.contains(&s.id))
        {
            info!("Reconcile dropping stale server: {}", stale);
            self.lookup.remove_server(&stale);
        }
    }

    /// Run the bridge loop until the event channel closes or shutdown fires.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<MembershipEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut reconcile = tokio::time::interval(self.reconcile_interval);
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick doubles as the startup bootstrap pass.

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = reconcile.tick() => self.reconcile(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Membership bridge stopped");
    }
}
