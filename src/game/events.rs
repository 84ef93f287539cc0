//! Session Events
//!
//! One-shot notifications produced by the coordination components.
//! Each event is emitted exactly once by the component that owns the
//! transition; the coordinator stamps a sequence number and hands them to
//! the transport.

use serde::{Serialize, Deserialize};
use crate::game::types::{ParticipantId, SceneId};

/// Why a session is ending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndingCause {
    /// A participant died (the first accepted reporter is recorded).
    ParticipantDied {
        participant: ParticipantId,
    },
    /// The hazard reached its flood ceiling.
    Flooded,
    /// Ended by a collaborator outside the participant set.
    External,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEventData {
    /// Participant registered with the turn schedule.
    ParticipantJoined {
        participant: ParticipantId,
        rank: u32,
    },

    /// Participant removed from the turn schedule.
    ParticipantLeft {
        participant: ParticipantId,
    },

    /// A participant's turn began.
    TurnStarted {
        participant: ParticipantId,
        turn_number: u64,
    },

    /// A participant's turn finished.
    TurnEnded {
        participant: ParticipantId,
    },

    /// A hazard bonus was applied.
    HazardBonusApplied {
        multiplier: f64,
        remaining_turns: u32,
    },

    /// The accumulated hazard bonus expired and was reverted.
    HazardBonusExpired {
        multiplier: f64,
    },

    /// The hazard reached its flood ceiling; its rate is now zero.
    HazardFlooded {
        position: f64,
    },

    /// Every readiness slot of the current gate set became present.
    AllReady {
        generation: u64,
    },

    /// A session-ending trigger was accepted. Observers freeze and show the
    /// blocking overlay on this event.
    SessionEnding {
        cause: EndingCause,
    },

    /// A scene transition was accepted.
    TransitionRequested {
        target: SceneId,
    },

    /// Loaders should begin loading this scene.
    SceneLoadRequested {
        scene: SceneId,
    },

    /// The destination finished loading and the session is running in it.
    SessionEntered {
        scene: SceneId,
        gameplay: bool,
    },

    /// A checkpoint was committed.
    CheckpointCommitted {
        coordinate: f64,
        turn_baseline: u32,
    },
}

/// A session event with its emission sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Monotonic per-session sequence number.
    pub sequence: u64,
    /// Event data.
    pub data: SessionEventData,
}

impl SessionEvent {
    /// Wrap event data with its sequence number.
    pub fn new(sequence: u64, data: SessionEventData) -> Self {
        Self { sequence, data }
    }

    /// Participant involved, if any.
    pub fn participant(&self) -> Option<ParticipantId> {
        match &self.data {
            SessionEventData::ParticipantJoined { participant, .. } => Some(*participant),
            SessionEventData::ParticipantLeft { participant } => Some(*participant),
            SessionEventData::TurnStarted { participant, .. } => Some(*participant),
            SessionEventData::TurnEnded { participant } => Some(*participant),
            SessionEventData::SessionEnding {
                cause: EndingCause::ParticipantDied { participant },
            } => Some(*participant),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_participant() {
        let id = ParticipantId::new([7; 16]);
        let event = SessionEvent::new(3, SessionEventData::TurnStarted {
            participant: id,
            turn_number: 1,
        });
        assert_eq!(event.participant(), Some(id));

        let ending = SessionEvent::new(4, SessionEventData::SessionEnding {
            cause: EndingCause::Flooded,
        });
        assert_eq!(ending.participant(), None);
    }

    #[test]
    fn test_event_json_tagging() {
        let event = SessionEventData::SessionEnding {
            cause: EndingCause::ParticipantDied { participant: ParticipantId::new([1; 16]) },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"session_ending\""));
        assert!(json.contains("\"kind\":\"participant_died\""));
    }
}
