//! JSON wire shapes for the WebSocket protocol (spec §6). Kept separate
//! from the internal [`crate::events::ProgressEvent`], which carries
//! monotonic `Instant` timestamps not meaningful off-process.

use crate::events::ProgressEvent;
use serde::{Deserialize, Serialize};

/// A `progress_event` payload, serializable and round-trippable (spec §8
/// invariant 11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEventPayload {
    pub operation_id: String,
    pub operation_type: String,
    pub event_type: String,
    pub progress_percentage: f64,
    pub current_step: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl From<&ProgressEvent> for ProgressEventPayload {
    fn from(event: &ProgressEvent) -> Self {
        let message = event
            .message
            .clone()
            .or_else(|| event.error.clone())
            .or_else(|| event.warning.clone());
        Self {
            operation_id: event.operation_id.clone(),
            operation_type: event.operation_type.clone(),
            event_type: event.kind.wire_str().to_string(),
            progress_percentage: event.progress,
            current_step: event.step.clone(),
            message,
            metadata: serde_json::Value::Null,
            timestamp: manga_core::ids::now_rfc3339(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
        }
    }
}

/// Messages the server sends to a WebSocket client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection_established")]
    ConnectionEstablished { connection_id: String, timestamp: String },
    #[serde(rename = "progress_event")]
    ProgressEvent { event: ProgressEventPayload },
    #[serde(rename = "subscription_confirmed")]
    SubscriptionConfirmed {
        #[serde(skip_serializing_if = "Option::is_none")]
        operation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation_type: Option<String>,
    },
    #[serde(rename = "unsubscription_confirmed")]
    UnsubscriptionConfirmed {
        #[serde(skip_serializing_if = "Option::is_none")]
        operation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation_type: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong { timestamp: String },
    #[serde(rename = "heartbeat")]
    Heartbeat { timestamp: String },
}

/// Messages a client may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe_operation")]
    SubscribeOperation { operation_id: String },
    #[serde(rename = "unsubscribe_operation")]
    UnsubscribeOperation { operation_id: String },
    #[serde(rename = "subscribe_operation_type")]
    SubscribeOperationType { operation_type: String },
    #[serde(rename = "unsubscribe_operation_type")]
    UnsubscribeOperationType { operation_type: String },
    #[serde(rename = "ping")]
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_round_trips_through_json() {
        let msg = ServerMessage::ProgressEvent {
            event: ProgressEventPayload {
                operation_id: "op1".into(),
                operation_type: "search".into(),
                event_type: "PROGRESS".into(),
                progress_percentage: 42.0,
                current_step: Some("fetching".into()),
                message: None,
                metadata: serde_json::Value::Null,
                timestamp: "2026-07-30T00:00:00Z".into(),
                user_id: None,
                session_id: None,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::ProgressEvent { event } => {
                assert_eq!(event.operation_id, "op1");
                assert_eq!(event.progress_percentage, 42.0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_message_parses_subscribe_operation() {
        let json = r#"{"type":"subscribe_operation","operation_id":"abc"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        matches!(msg, ClientMessage::SubscribeOperation { operation_id } if operation_id == "abc");
    }
}
