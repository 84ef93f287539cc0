//! # Ascent Session Server
//!
//! Authoritative coordinator for a two-participant, turn-gated co-op
//! platformer: whose turn it is, how fast the hazard rises, when both exits
//! are occupied, and which scene the session is in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ASCENT SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Primitives                              │
//! │  ├── hash.rs       - Snapshot digests                        │
//! │  └── timer.rs      - Cancelable tick-driven timers           │
//! │                                                              │
//! │  game/             - Coordination state (authority-gated)    │
//! │  ├── types.rs      - Ids and node role                       │
//! │  ├── events.rs     - One-shot session events                 │
//! │  ├── turn.rs       - Rank-ordered turn schedule              │
//! │  ├── hazard.rs     - Rising hazard and bonuses               │
//! │  ├── gate.rs       - Readiness aggregator                    │
//! │  └── flow.rs       - Scene / lifecycle state machine         │
//! │                                                              │
//! │  session/          - Composition                             │
//! │  ├── config.rs     - Levels and tuning                       │
//! │  ├── replication.rs- Authority → observer replication        │
//! │  └── coordinator.rs- Entry points, checkpoints, retry        │
//! │                                                              │
//! │  network/          - Transport (non-deterministic)           │
//! │  ├── protocol.rs   - Message types                           │
//! │  └── server.rs     - WebSocket session host                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! Exactly one node runs with [`NodeRole::Authority`]. Every mutating
//! operation on an observer copy is a silent no-op; observers only read
//! replicated state through [`session::ObserverMirror`] and send intents.
//!
//! Nothing in `core/`, `game/` or `session/` reads the wall clock; time
//! only advances through `advance(dt)` calls from the host's tick loop.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod session;
pub mod network;

// Re-export commonly used types
pub use game::types::{NodeRole, ParticipantId, SceneId, SlotId};
pub use game::events::{SessionEvent, SessionEventData, EndingCause};
pub use game::flow::FlowState;
pub use session::{SessionConfig, SessionCoordinator, ObserverMirror};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Participants required before turns run
pub const QUORUM: usize = 2;
