//! Coordination State
//!
//! The authoritative state machines of a session. All of them are
//! tick-driven and never touch wall-clock time or the network.
//!
//! ## Module Structure
//!
//! - `types`: Participant, scene and slot identifiers, node role
//! - `events`: One-shot session events
//! - `turn`: Rank-ordered turn schedule
//! - `hazard`: Rising hazard with turn-scoped bonuses
//! - `gate`: Multi-slot readiness aggregator
//! - `flow`: Scene transition / session lifecycle state machine

pub mod types;
pub mod events;
pub mod turn;
pub mod hazard;
pub mod gate;
pub mod flow;

// Re-export key types
pub use types::{ParticipantId, SceneId, SlotId, NodeRole};
pub use events::{SessionEvent, SessionEventData, EndingCause};
pub use turn::{TurnSchedule, TurnConfig, Participant, TurnHandoff};
pub use hazard::{HazardState, HazardConfig};
pub use gate::{ReadinessGate, GateSpec, SlotKey, SlotOutcome};
pub use flow::{FlowStateMachine, FlowState, FlowConfig};
