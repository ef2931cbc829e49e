//! Group fabric — named delivery groups with cross-process fan-out.
//!
//! ARCHITECTURE
//! ============
//! Every connection owns a bounded mpsc sender registered under the groups it
//! has joined. Publishing to a group walks the local membership map and also
//! relays the envelope over a Redis channel so sibling processes can deliver
//! to their own members. Each process tags relayed messages with its own id
//! and skips its own relays, so local members never see a duplicate.
//!
//! DESIGN
//! ======
//! - Delivery is best-effort `try_send`: a slow client drops messages rather
//!   than stalling the publisher.
//! - Membership is tracked both ways (group → members, connection → groups)
//!   so disconnect cleanup is a single `leave_all`.
//! - Empty groups are removed eagerly; a long-lived process holds no entries
//!   for vehicles nobody watches anymore.

use std::collections::{HashMap, HashSet};
use std::fmt;

use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::protocol::Envelope;
use crate::services::auth::Role;

/// Redis pub/sub channel carrying relayed group messages between processes.
const RELAY_CHANNEL: &str = "fleet:groups";

// =============================================================================
// GROUP NAMES
// =============================================================================

/// A delivery group. The `Display` form is the canonical group key, which is
/// also what travels over the relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// Every open connection.
    All,
    /// Every connection whose caller holds the role.
    Role(Role),
    /// Every connection belonging to one user.
    User(i64),
    /// Subscribers of one vehicle's movement.
    Vehicle(i64),
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::All => f.write_str("all-connections"),
            Group::Role(role) => write!(f, "role:{role}"),
            Group::User(user_id) => write!(f, "user:{user_id}"),
            Group::Vehicle(vehicle_id) => write!(f, "vehicle:{vehicle_id}"),
        }
    }
}

// =============================================================================
// FABRIC
// =============================================================================

#[derive(Serialize, Deserialize)]
struct RelayMessage {
    origin: Uuid,
    group: String,
    envelope: Envelope,
}

#[derive(Default)]
struct FabricInner {
    /// group key → connection id → that connection's outbound sender.
    members: HashMap<String, HashMap<Uuid, mpsc::Sender<Envelope>>>,
    /// connection id → group keys it has joined. Mirror of `members`.
    joined: HashMap<Uuid, HashSet<String>>,
}

/// Shared group membership and fan-out. One per process.
pub struct GroupFabric {
    process_id: Uuid,
    inner: RwLock<FabricInner>,
    relay: Option<redis::aio::MultiplexedConnection>,
}

impl GroupFabric {
    /// Local-only fabric: no relay, single-process delivery.
    #[must_use]
    pub fn new() -> Self {
        Self { process_id: Uuid::new_v4(), inner: RwLock::default(), relay: None }
    }

    /// Fabric that relays every publish over Redis pub/sub.
    #[must_use]
    pub fn with_relay(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { process_id: Uuid::new_v4(), inner: RwLock::default(), relay: Some(conn) }
    }

    /// Register a connection's sender under a group.
    pub async fn join(&self, conn_id: Uuid, group: &Group, tx: mpsc::Sender<Envelope>) {
        let key = group.to_string();
        let mut inner = self.inner.write().await;
        inner.members.entry(key.clone()).or_default().insert(conn_id, tx);
        inner.joined.entry(conn_id).or_default().insert(key);
    }

    /// Remove a connection from one group.
    pub async fn leave(&self, conn_id: Uuid, group: &Group) {
        let key = group.to_string();
        let mut inner = self.inner.write().await;
        remove_member(&mut inner.members, &key, conn_id);
        let emptied = inner.joined.get_mut(&conn_id).is_some_and(|joined| {
            joined.remove(&key);
            joined.is_empty()
        });
        if emptied {
            inner.joined.remove(&conn_id);
        }
    }

    /// Remove a connection from every group it joined. Called on disconnect.
    pub async fn leave_all(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(joined) = inner.joined.remove(&conn_id) else {
            return;
        };
        for key in joined {
            remove_member(&mut inner.members, &key, conn_id);
        }
    }

    /// Deliver an envelope to every member of a group, here and in sibling
    /// processes.
    pub async fn publish(&self, group: &Group, envelope: &Envelope) {
        let key = group.to_string();
        self.deliver_local(&key, envelope).await;

        if let Some(conn) = &self.relay {
            let relay = RelayMessage {
                origin: self.process_id,
                group: key,
                envelope: envelope.clone(),
            };
            let Ok(payload) = serde_json::to_string(&relay) else {
                return;
            };
            let mut conn = conn.clone();
            if let Err(e) = conn.publish::<_, _, ()>(RELAY_CHANNEL, payload).await {
                warn!(error = %e, "group relay publish failed");
            }
        }
    }

    async fn deliver_local(&self, key: &str, envelope: &Envelope) {
        let inner = self.inner.read().await;
        let Some(members) = inner.members.get(key) else {
            return;
        };
        for (conn_id, tx) in members {
            if tx.try_send(envelope.clone()).is_err() {
                // Full or closed channel: drop rather than block the publisher.
                debug!(%conn_id, group = key, "dropped group message for slow client");
            }
        }
    }

    /// Number of connections in a group.
    pub async fn member_count(&self, group: &Group) -> usize {
        let inner = self.inner.read().await;
        inner.members.get(&group.to_string()).map_or(0, HashMap::len)
    }

    /// Total group entries held, across all groups. Drops to zero once every
    /// connection has left.
    pub async fn tracked_groups(&self) -> usize {
        self.inner.read().await.members.len()
    }
}

impl Default for GroupFabric {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop a member from a group map, erasing the group once it empties.
fn remove_member(
    members: &mut HashMap<String, HashMap<Uuid, mpsc::Sender<Envelope>>>,
    key: &str,
    conn_id: Uuid,
) {
    let emptied = members.get_mut(key).is_some_and(|group| {
        group.remove(&conn_id);
        group.is_empty()
    });
    if emptied {
        members.remove(key);
    }
}

// =============================================================================
// RELAY SUBSCRIBER
// =============================================================================

/// Subscribe to the relay channel and deliver messages published by sibling
/// processes to local members. Runs until the connection drops.
pub fn spawn_relay(fabric: std::sync::Arc<GroupFabric>, client: redis::Client) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                error!(error = %e, "group relay: pubsub connect failed");
                return;
            }
        };
        if let Err(e) = pubsub.subscribe(RELAY_CHANNEL).await {
            error!(error = %e, "group relay: subscribe failed");
            return;
        }

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "group relay: non-text payload");
                    continue;
                }
            };
            let relay: RelayMessage = match serde_json::from_str(&payload) {
                Ok(relay) => relay,
                Err(e) => {
                    warn!(error = %e, "group relay: malformed message");
                    continue;
                }
            };
            // Our own publishes were already delivered locally.
            if relay.origin == fabric.process_id {
                continue;
            }
            fabric.deliver_local(&relay.group, &relay.envelope).await;
        }
        warn!("group relay: subscription stream ended");
    })
}

#[cfg(test)]
#[path = "groups_test.rs"]
mod tests;
