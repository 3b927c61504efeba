//! WebSocket fan-out of progress events, grounded on
//! `progress/websocket.py`'s `WebSocketConnection`/`WebSocketManager`.
//!
//! The transport itself (accepting an actual socket, framing, ping/pong at
//! the protocol level) is out of scope here; a connection is represented by
//! whatever channel the caller hands in, so this crate stays independent of
//! any particular HTTP/WebSocket framework.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::events::ProgressEvent;
use crate::wire::{ProgressEventPayload, ServerMessage};
use manga_core::ids::{new_id, now_rfc3339};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

struct Connection {
    sender: mpsc::UnboundedSender<ServerMessage>,
    user_id: Option<String>,
    session_id: Option<String>,
    subscribed_operations: HashSet<String>,
    subscribed_operation_types: HashSet<String>,
    active: AtomicBool,
}

impl Connection {
    /// Mirrors `WebSocketConnection.should_receive_event`: four independent
    /// gates, each of which can only reject, never admit on its own.
    /// User/session gates only apply when both sides set a value and they
    /// differ; the two subscription gates only apply when non-empty.
    fn should_receive(&self, event: &ProgressEvent) -> bool {
        if let (Some(conn_user), Some(event_user)) = (&self.user_id, &event.user_id) {
            if conn_user != event_user {
                return false;
            }
        }
        if let (Some(conn_session), Some(event_session)) = (&self.session_id, &event.session_id) {
            if conn_session != event_session {
                return false;
            }
        }
        if !self.subscribed_operations.is_empty()
            && !self.subscribed_operations.contains(&event.operation_id)
        {
            return false;
        }
        if !self.subscribed_operation_types.is_empty()
            && !self.subscribed_operation_types.contains(&event.operation_type)
        {
            return false;
        }
        true
    }
}

/// Broadcasts progress events to subscribed WebSocket connections.
pub struct WebSocketBroadcaster {
    connections: Mutex<HashMap<String, Connection>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            heartbeat_task: Mutex::new(None),
        })
    }

    /// Registers a new connection and returns its id. `sender` is the
    /// caller's write half, however it chooses to realize one.
    pub async fn connect(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
        user_id: Option<String>,
        session_id: Option<String>,
    ) -> String {
        let id = new_id();
        let _ = sender.send(ServerMessage::ConnectionEstablished {
            connection_id: id.clone(),
            timestamp: now_rfc3339(),
        });
        let conn = Connection {
            sender,
            user_id,
            session_id,
            subscribed_operations: HashSet::new(),
            subscribed_operation_types: HashSet::new(),
            active: AtomicBool::new(true),
        };
        self.connections.lock().await.insert(id.clone(), conn);
        id
    }

    pub async fn disconnect(&self, connection_id: &str) {
        self.connections.lock().await.remove(connection_id);
    }

    pub async fn subscribe_operation(&self, connection_id: &str, operation_id: &str) {
        let mut conns = self.connections.lock().await;
        if let Some(conn) = conns.get_mut(connection_id) {
            conn.subscribed_operations.insert(operation_id.to_string());
            let _ = conn.sender.send(ServerMessage::SubscriptionConfirmed {
                operation_id: Some(operation_id.to_string()),
                operation_type: None,
            });
        }
    }

    pub async fn unsubscribe_operation(&self, connection_id: &str, operation_id: &str) {
        let mut conns = self.connections.lock().await;
        if let Some(conn) = conns.get_mut(connection_id) {
            conn.subscribed_operations.remove(operation_id);
            let _ = conn.sender.send(ServerMessage::UnsubscriptionConfirmed {
                operation_id: Some(operation_id.to_string()),
                operation_type: None,
            });
        }
    }

    pub async fn subscribe_operation_type(&self, connection_id: &str, operation_type: &str) {
        let mut conns = self.connections.lock().await;
        if let Some(conn) = conns.get_mut(connection_id) {
            conn.subscribed_operation_types.insert(operation_type.to_string());
            let _ = conn.sender.send(ServerMessage::SubscriptionConfirmed {
                operation_id: None,
                operation_type: Some(operation_type.to_string()),
            });
        }
    }

    pub async fn unsubscribe_operation_type(&self, connection_id: &str, operation_type: &str) {
        let mut conns = self.connections.lock().await;
        if let Some(conn) = conns.get_mut(connection_id) {
            conn.subscribed_operation_types.remove(operation_type);
            let _ = conn.sender.send(ServerMessage::UnsubscriptionConfirmed {
                operation_id: None,
                operation_type: Some(operation_type.to_string()),
            });
        }
    }

    /// Sends `event` to every connection whose subscriptions match it.
    /// Returns the number of connections it was delivered to. Connections
    /// whose send fails are marked inactive and dropped on the next sweep.
    pub async fn broadcast_event(&self, event: &ProgressEvent) -> usize {
        let payload = ProgressEventPayload::from(event);
        let mut conns = self.connections.lock().await;
        let mut delivered = 0usize;
        let mut dead = Vec::new();
        for (id, conn) in conns.iter() {
            if !conn.active.load(Ordering::Relaxed) || !conn.should_receive(event) {
                continue;
            }
            let msg = ServerMessage::ProgressEvent { event: payload.clone() };
            if conn.sender.send(msg).is_ok() {
                delivered += 1;
            } else {
                dead.push(id.clone());
            }
        }
        for id in dead {
            conns.remove(&id);
        }
        delivered
    }

    pub async fn send_to_user(&self, user_id: &str, event: &ProgressEvent) -> usize {
        let payload = ProgressEventPayload::from(event);
        let conns = self.connections.lock().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.user_id.as_deref() == Some(user_id) {
                let msg = ServerMessage::ProgressEvent { event: payload.clone() };
                if conn.sender.send(msg).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub async fn send_to_session(&self, session_id: &str, event: &ProgressEvent) -> usize {
        let payload = ProgressEventPayload::from(event);
        let conns = self.connections.lock().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.session_id.as_deref() == Some(session_id) {
                let msg = ServerMessage::ProgressEvent { event: payload.clone() };
                if conn.sender.send(msg).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub async fn get_connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Starts the 30s heartbeat loop (idempotent). Connections whose send
    /// fails are evicted.
    pub async fn start_heartbeat(self: &Arc<Self>) {
        let mut task_guard = self.heartbeat_task.lock().await;
        if task_guard.is_some() {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut tick = interval(HEARTBEAT_INTERVAL);
            loop {
                tick.tick().await;
                this.send_heartbeat().await;
            }
        });
        *task_guard = Some(handle);
    }

    pub async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn send_heartbeat(&self) {
        let msg = ServerMessage::Heartbeat { timestamp: now_rfc3339() };
        let mut conns = self.connections.lock().await;
        let mut dead = Vec::new();
        for (id, conn) in conns.iter() {
            if conn.sender.send(msg.clone()).is_err() {
                dead.push(id.clone());
            }
        }
        for id in dead {
            conns.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressEventKind;
    use std::time::Instant;

    fn event(operation_id: &str, operation_type: &str) -> ProgressEvent {
        ProgressEvent {
            id: new_id(),
            operation_id: operation_id.to_string(),
            operation_type: operation_type.to_string(),
            kind: ProgressEventKind::Progress,
            progress: 50.0,
            step: None,
            message: None,
            error: None,
            warning: None,
            timestamp: Instant::now(),
            estimated_completion: None,
            user_id: None,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn connection_with_no_subscriptions_receives_everything() {
        let broadcaster = WebSocketBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.connect(tx, None, None).await;
        assert!(matches!(rx.recv().await, Some(ServerMessage::ConnectionEstablished { .. })));

        let delivered = broadcaster.broadcast_event(&event("op1", "search")).await;
        assert_eq!(delivered, 1);
        assert!(matches!(rx.recv().await, Some(ServerMessage::ProgressEvent { .. })));
    }

    #[tokio::test]
    async fn subscription_filters_to_matching_operation_only() {
        let broadcaster = WebSocketBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = broadcaster.connect(tx, None, None).await;
        rx.recv().await;

        broadcaster.subscribe_operation(&id, "op1").await;
        rx.recv().await;

        let delivered_match = broadcaster.broadcast_event(&event("op1", "search")).await;
        assert_eq!(delivered_match, 1);
        rx.recv().await;

        let delivered_other = broadcaster.broadcast_event(&event("op2", "search")).await;
        assert_eq!(delivered_other, 0);
    }

    #[tokio::test]
    async fn subscribing_to_both_rejects_an_event_matching_only_one() {
        let broadcaster = WebSocketBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = broadcaster.connect(tx, None, None).await;
        rx.recv().await;

        broadcaster.subscribe_operation(&id, "op1").await;
        rx.recv().await;
        broadcaster.subscribe_operation_type(&id, "download").await;
        rx.recv().await;

        // Matches the operation-id gate but not the operation-type gate.
        let delivered = broadcaster.broadcast_event(&event("op1", "search")).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn event_for_a_different_user_is_not_delivered() {
        let broadcaster = WebSocketBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.connect(tx, Some("alice".to_string()), None).await;
        rx.recv().await;

        let mut other_user_event = event("op1", "search");
        other_user_event.user_id = Some("bob".to_string());
        assert_eq!(broadcaster.broadcast_event(&other_user_event).await, 0);

        let mut same_user_event = event("op1", "search");
        same_user_event.user_id = Some("alice".to_string());
        assert_eq!(broadcaster.broadcast_event(&same_user_event).await, 1);
    }

    #[tokio::test]
    async fn disconnected_receiver_is_evicted_on_broadcast() {
        let broadcaster = WebSocketBroadcaster::new();
        let (tx, rx) = mpsc::unbounded_channel();
        broadcaster.connect(tx, None, None).await;
        drop(rx);

        let delivered = broadcaster.broadcast_event(&event("op1", "search")).await;
        assert_eq!(delivered, 0);
        assert_eq!(broadcaster.get_connection_count().await, 0);
    }
}
