//! Protocol Messages
//!
//! Wire format between observers and the authority over WebSocket.
//! Observers send intents; the authority answers with replicated field
//! updates, one-shot session events and resync snapshots. Messages are
//! JSON text frames; replicated updates also have a bincode form.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::events::SessionEvent;
use crate::game::gate::SlotKey;
use crate::game::types::{ParticipantId, SlotId};
use crate::session::replication::{ReplicatedUpdate, SessionSnapshot};

/// Codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encode/decode failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encode/decode failed.
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),

    /// Participant id is not a UUID.
    #[error("invalid participant id: {0}")]
    InvalidParticipantId(String),
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Intents sent from an observer to the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a participant.
    Join {
        /// Participant UUID.
        participant_id: String,
        /// Ordinal rank (turn order).
        rank: u32,
    },

    /// End the current turn.
    EndTurn,

    /// Spend one action of the current turn.
    SpendAction,

    /// This participant died.
    Died,

    /// Reached a readiness slot.
    EnterGate {
        /// Gate set generation the slot was read from.
        generation: u64,
        /// Slot identifier.
        slot: String,
    },

    /// Left a readiness slot.
    ExitGate {
        /// Gate set generation the slot was read from.
        generation: u64,
        /// Slot identifier.
        slot: String,
    },

    /// Ask for a temporary hazard bonus.
    RequestBonus {
        /// Multiplier delta (> 0).
        multiplier_delta: f64,
        /// Duration in turns.
        duration_turns: u32,
    },

    /// Retry the last level from its checkpoint.
    Retry,

    /// Finished loading a scene.
    SceneLoaded {
        /// Scene name.
        scene: String,
    },

    /// Reached a checkpoint.
    Checkpoint {
        /// Checkpoint coordinate.
        coordinate: f64,
    },

    /// Request a full state snapshot.
    SyncRequest,

    /// Ping for latency measurement.
    Ping { timestamp: u64 },

    /// Participant is leaving the session.
    Leave,
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Slot key carried by a gate intent.
    pub fn slot_key(&self) -> Option<SlotKey> {
        match self {
            ClientMessage::EnterGate { generation, slot }
            | ClientMessage::ExitGate { generation, slot } => Some(SlotKey {
                generation: *generation,
                slot: SlotId::new(slot.as_str()),
            }),
            _ => None,
        }
    }
}

/// Parse a participant UUID string.
pub fn parse_participant_id(s: &str) -> Result<ParticipantId, ProtocolError> {
    ParticipantId::from_uuid_str(s).ok_or_else(|| ProtocolError::InvalidParticipantId(s.to_string()))
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from the authority to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted.
    Welcome(WelcomeInfo),

    /// A replicated field changed.
    Replicated {
        /// Field update.
        update: ReplicatedUpdate,
    },

    /// One-shot session event.
    Event {
        /// Sequenced event.
        event: SessionEvent,
    },

    /// Full state for resync.
    Snapshot {
        /// Snapshot with digest.
        snapshot: SessionSnapshot,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (Unix millis).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason for shutdown.
        reason: String,
    },
}

/// Join acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Bound participant UUID.
    pub participant_id: String,
    /// Rank the participant joined with.
    pub rank: u32,
    /// Server version.
    pub server_version: String,
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed message.
    InvalidInput,
    /// Intent sent before `join`.
    NotJoined,
    /// Connection or participant already bound.
    AlreadyJoined,
    /// Binary frames are not accepted.
    UnsupportedFormat,
    /// Server overloaded.
    ServerOverloaded,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::{EndingCause, SessionEventData};
    use crate::session::replication::{HazardReplica, ReplicatedValue};

    #[test]
    fn test_client_message_json_shape() {
        let json = r#"{"type":"enter_gate","generation":3,"slot":"door-left"}"#;
        let msg = ClientMessage::from_json(json).unwrap();

        let key = msg.slot_key().unwrap();
        assert_eq!(key.generation, 3);
        assert_eq!(key.slot, SlotId::new("door-left"));

        assert_eq!(ClientMessage::from_json(r#"{"type":"end_turn"}"#).unwrap(), ClientMessage::EndTurn);
        assert!(ClientMessage::EndTurn.slot_key().is_none());
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(matches!(
            ClientMessage::from_json(r#"{"type":"teleport"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_participant_id_parsing() {
        let id = ParticipantId::random();
        assert_eq!(parse_participant_id(&id.to_uuid_string()).unwrap(), id);
        assert!(matches!(
            parse_participant_id("player-one"),
            Err(ProtocolError::InvalidParticipantId(_))
        ));
    }

    #[test]
    fn test_server_event_roundtrip() {
        let msg = ServerMessage::Event {
            event: SessionEvent::new(12, SessionEventData::SessionEnding {
                cause: EndingCause::Flooded,
            }),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_replicated_roundtrip() {
        let msg = ServerMessage::Replicated {
            update: ReplicatedUpdate {
                sequence: 4,
                value: ReplicatedValue::Hazard(HazardReplica {
                    position: 1.5,
                    rate: 0.4,
                    multiplier: 2.0,
                    elapsed_turns: 10,
                    bonus_turns_remaining: 2,
                    flooded: false,
                }),
            },
        };
        let json = msg.to_json().unwrap();
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_error_serialization() {
        let json = ServerMessage::error(ErrorCode::NotJoined, "join first").to_json().unwrap();
        assert!(json.contains("not_joined"));
    }
}
