//! Session Layer
//!
//! Composes the coordination components into one authoritative session
//! and exposes the replication surface observers consume.

pub mod config;
pub mod replication;
pub mod coordinator;

pub use config::{SessionConfig, LevelSpec, ConfigError};
pub use replication::{
    ReplicationOutbox, ObserverMirror, ReplicatedUpdate, ReplicatedValue, ReplicatedField,
    SessionSnapshot, TurnReplica, HazardReplica, FlowReplica, GateReplica,
};
pub use coordinator::{SessionCoordinator, PersistedProgress};
