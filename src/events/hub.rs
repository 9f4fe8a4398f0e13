//! Connection registry and fan-out.
//!
//! A single task owns the `user_id -> connections` map. Registration,
//! unregistration, delivery and stats requests all reach it through one
//! command channel and are applied strictly one after another, so a message
//! can never reach a connection before its registration or after its removal
//! as seen from the loop.
//!
//! Each connection's outbound buffer is a bounded `mpsc` channel. The registry
//! holds the only `Sender`; removing the entry drops it, which closes the
//! buffer. The map entry can only be removed once, so the close happens
//! exactly once no matter whether an unregister or a failed delivery sees the
//! connection first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HubConfig;

pub type ConnectionId = Uuid;

/// One event as pushed to clients. An empty `user_id` addresses everyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(kind: impl Into<String>, user_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            user_id: user_id.into(),
            payload,
        }
    }
}

/// Hub-side half of a client connection. Handed to [`EventHub::register`].
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    user_id: String,
    sender: mpsc::Sender<Message>,
}

impl ClientConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Transport-side half: drains the outbound buffer in order. `recv` yields
/// `None` once the hub has dropped the connection.
#[derive(Debug)]
pub struct Outbound {
    id: ConnectionId,
    user_id: String,
    receiver: mpsc::Receiver<Message>,
}

impl Outbound {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

/// Creates both halves of a connection with a buffer of `capacity` messages.
pub fn open_connection(user_id: impl Into<String>, capacity: usize) -> (ClientConnection, Outbound) {
    let id = Uuid::new_v4();
    let user_id = user_id.into();
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ClientConnection {
            id,
            user_id: user_id.clone(),
            sender,
        },
        Outbound {
            id,
            user_id,
            receiver,
        },
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub users: usize,
    pub connections: usize,
}

enum HubCommand {
    Register(ClientConnection),
    Unregister { id: ConnectionId, user_id: String },
    Send(Message),
    Stats(oneshot::Sender<HubStats>),
}

/// Cloneable handle to the registry task.
#[derive(Clone)]
pub struct EventHub {
    commands: mpsc::Sender<HubCommand>,
    client_buffer: usize,
}

impl EventHub {
    /// Starts the registry task. It exits once every handle is dropped.
    pub fn spawn(config: &HubConfig) -> (Self, JoinHandle<()>) {
        let (commands, inbox) = mpsc::channel(config.backlog.max(1));
        let task = tokio::spawn(Registry::default().run(inbox));
        info!(
            client_buffer = config.client_buffer,
            backlog = config.backlog,
            "Event hub started"
        );
        (
            Self {
                commands,
                client_buffer: config.client_buffer,
            },
            task,
        )
    }

    /// Opens a connection sized by the configured client buffer. The caller
    /// still has to [`register`](Self::register) it.
    pub fn open(&self, user_id: impl Into<String>) -> (ClientConnection, Outbound) {
        open_connection(user_id, self.client_buffer)
    }

    pub async fn register(&self, connection: ClientConnection) {
        if self.commands.send(HubCommand::Register(connection)).await.is_err() {
            warn!("Event hub is not running, registration dropped");
        }
    }

    /// Removing a connection that is already gone is a no-op.
    pub async fn unregister(&self, id: ConnectionId, user_id: impl Into<String>) {
        let command = HubCommand::Unregister {
            id,
            user_id: user_id.into(),
        };
        if self.commands.send(command).await.is_err() {
            debug!(connection_id = %id, "Event hub is not running, unregister ignored");
        }
    }

    /// Queues a message for every live connection of `user_id`, or of every
    /// user when `user_id` is empty. Never blocks; if the hub is backed up the
    /// message is dropped.
    pub fn send_to_user(&self, user_id: &str, kind: &str, payload: serde_json::Value) {
        let message = Message::new(kind, user_id, payload);
        match self.commands.try_send(HubCommand::Send(message)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(user_id = %user_id, event = %kind, "Event hub backlog full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(event = %kind, "Event hub is not running, dropping event");
            }
        }
    }

    pub fn broadcast(&self, kind: &str, payload: serde_json::Value) {
        self.send_to_user("", kind, payload);
    }

    pub async fn stats(&self) -> HubStats {
        let (reply, answer) = oneshot::channel();
        if self.commands.send(HubCommand::Stats(reply)).await.is_err() {
            return HubStats::default();
        }
        answer.await.unwrap_or_default()
    }
}

type Connections = HashMap<ConnectionId, mpsc::Sender<Message>>;

#[derive(Default)]
struct Registry {
    clients: HashMap<String, Connections>,
}

impl Registry {
    async fn run(mut self, mut inbox: mpsc::Receiver<HubCommand>) {
        while let Some(command) = inbox.recv().await {
            match command {
                HubCommand::Register(connection) => self.register(connection),
                HubCommand::Unregister { id, user_id } => self.unregister(id, &user_id),
                HubCommand::Send(message) => self.deliver(&message),
                HubCommand::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
            }
        }
        info!("Event hub stopped");
    }

    fn register(&mut self, connection: ClientConnection) {
        debug!(
            user_id = %connection.user_id,
            connection_id = %connection.id,
            "Client registered"
        );
        self.clients
            .entry(connection.user_id)
            .or_default()
            .insert(connection.id, connection.sender);
    }

    fn unregister(&mut self, id: ConnectionId, user_id: &str) {
        let Some(connections) = self.clients.get_mut(user_id) else {
            debug!(connection_id = %id, "Unregister for unknown user ignored");
            return;
        };
        if connections.remove(&id).is_none() {
            debug!(connection_id = %id, "Connection already removed");
            return;
        }
        if connections.is_empty() {
            self.clients.remove(user_id);
        }
        debug!(user_id = %user_id, connection_id = %id, "Client unregistered");
    }

    fn deliver(&mut self, message: &Message) {
        if message.user_id.is_empty() {
            for (user_id, connections) in self.clients.iter_mut() {
                fan_out(user_id, connections, message);
            }
            self.clients.retain(|_, connections| !connections.is_empty());
            return;
        }

        let Some(connections) = self.clients.get_mut(&message.user_id) else {
            debug!(user_id = %message.user_id, event = %message.kind, "No live connections, event discarded");
            return;
        };
        fan_out(&message.user_id, connections, message);
        if connections.is_empty() {
            self.clients.remove(&message.user_id);
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            users: self.clients.len(),
            connections: self.clients.values().map(HashMap::len).sum(),
        }
    }
}

/// Non-blocking enqueue on every connection; anything that cannot take the
/// message right now is dropped from the set.
fn fan_out(user_id: &str, connections: &mut Connections, message: &Message) {
    connections.retain(|id, sender| match sender.try_send(message.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(user_id = %user_id, connection_id = %id, "Client buffer full, disconnecting");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(user_id = %user_id, connection_id = %id, "Client went away, removing");
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn hub_with_buffer(client_buffer: usize) -> EventHub {
        let (hub, _task) = EventHub::spawn(&HubConfig {
            client_buffer,
            backlog: 64,
        });
        hub
    }

    async fn next(outbound: &mut Outbound) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("timed out waiting for hub")
    }

    #[tokio::test]
    async fn test_register_then_send_delivers_once() {
        let hub = hub_with_buffer(8);
        let (conn, mut outbound) = hub.open("u1");
        hub.register(conn).await;

        hub.send_to_user("u1", "x", json!({"a": 1}));
        // Stats round-trip: everything queued before it has been applied.
        hub.stats().await;

        let message = next(&mut outbound).await.unwrap();
        assert_eq!(message.kind, "x");
        assert_eq!(message.payload, json!({"a": 1}));
        assert!(outbound.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unregister_closes_buffer() {
        let hub = hub_with_buffer(8);
        let (conn, mut outbound) = hub.open("u1");
        hub.register(conn).await;
        hub.unregister(outbound.id(), "u1").await;
        hub.send_to_user("u1", "x", json!({}));

        assert_eq!(hub.stats().await, HubStats::default());
        assert!(next(&mut outbound).await.is_none());
    }

    #[tokio::test]
    async fn test_send_without_connections_is_noop() {
        let hub = hub_with_buffer(8);
        hub.send_to_user("nobody", "x", json!({"a": 1}));
        hub.broadcast("y", json!({}));
        assert_eq!(hub.stats().await, HubStats::default());
    }

    #[tokio::test]
    async fn test_double_unregister_is_noop() {
        let hub = hub_with_buffer(8);
        let (conn, outbound) = hub.open("u1");
        let (other, _other_outbound) = hub.open("u1");
        hub.register(conn).await;
        hub.register(other).await;

        hub.unregister(outbound.id(), "u1").await;
        hub.unregister(outbound.id(), "u1").await;
        hub.unregister(Uuid::new_v4(), "ghost").await;

        assert_eq!(hub.stats().await, HubStats { users: 1, connections: 1 });
    }

    #[tokio::test]
    async fn test_saturated_connection_is_dropped() {
        let hub = hub_with_buffer(1);
        let (slow, mut slow_outbound) = hub.open("u1");
        let (fast, mut fast_outbound) = hub.open("u1");
        hub.register(slow).await;
        hub.register(fast).await;

        hub.send_to_user("u1", "first", json!({}));
        hub.stats().await;
        // Fast reader drains; slow reader does not.
        assert_eq!(next(&mut fast_outbound).await.unwrap().kind, "first");

        hub.send_to_user("u1", "second", json!({}));
        assert_eq!(hub.stats().await, HubStats { users: 1, connections: 1 });
        assert_eq!(next(&mut fast_outbound).await.unwrap().kind, "second");

        hub.send_to_user("u1", "third", json!({}));
        hub.stats().await;

        assert_eq!(next(&mut slow_outbound).await.unwrap().kind, "first");
        assert!(next(&mut slow_outbound).await.is_none());
        assert_eq!(next(&mut fast_outbound).await.unwrap().kind, "third");
    }

    #[tokio::test]
    async fn test_closed_transport_is_removed_on_delivery() {
        let hub = hub_with_buffer(4);
        let (conn, outbound) = hub.open("u1");
        hub.register(conn).await;
        drop(outbound);

        hub.send_to_user("u1", "x", json!({}));
        assert_eq!(hub.stats().await, HubStats::default());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_user() {
        let hub = hub_with_buffer(4);
        let (a, mut a_out) = hub.open("u1");
        let (b, mut b_out) = hub.open("u2");
        hub.register(a).await;
        hub.register(b).await;

        hub.broadcast("maintenance", json!({"in": 5}));
        hub.send_to_user("u2", "private", json!({}));
        hub.stats().await;

        assert_eq!(next(&mut a_out).await.unwrap().kind, "maintenance");
        assert!(a_out.try_recv().is_none());
        assert_eq!(next(&mut b_out).await.unwrap().kind, "maintenance");
        assert_eq!(next(&mut b_out).await.unwrap().kind, "private");
    }

    #[test]
    fn test_message_wire_shape() {
        let targeted = Message::new("job-completed", "u1", json!({"job_id": "j1"}));
        let value = serde_json::to_value(&targeted).unwrap();
        assert_eq!(value["type"], "job-completed");
        assert_eq!(value["user_id"], "u1");

        let broadcast = Message::new("notice", "", json!({}));
        let value = serde_json::to_value(&broadcast).unwrap();
        assert!(value.get("user_id").is_none());
    }
}
