//! State Replication
//!
//! One-way authority → observer replication of the coordination state.
//!
//! Each component publishes one replicated field. Updates carry a
//! per-field sequence number; the channel is ordered per field only, so
//! observers drop anything not newer than what they already applied and
//! never assume cross-field consistency.
//!
//! ```text
//! Authority                                 Observer
//! ─────────                                 ────────
//! mutation ─► ReplicationOutbox ─drain─►   ObserverMirror::apply
//!             (latest value per field)      (drop stale / duplicate)
//! ```

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::hash::{StateHash, StateHasher};
use crate::game::flow::FlowState;
use crate::game::types::{ParticipantId, SceneId, SlotId};

// =============================================================================
// REPLICATED VALUES
// =============================================================================

/// Replicated turn schedule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TurnReplica {
    /// Participants in turn order.
    pub order: Vec<ParticipantId>,
    /// Active participant (None before quorum).
    pub active: Option<ParticipantId>,
    /// Turns started so far.
    pub turn_number: u64,
    /// Actions left to the active participant.
    pub actions_remaining: u32,
}

/// Replicated hazard state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HazardReplica {
    /// Flood line coordinate.
    pub position: f64,
    /// Effective rise rate.
    pub rate: f64,
    /// Running multiplier.
    pub multiplier: f64,
    /// Turns elapsed since reset.
    pub elapsed_turns: u32,
    /// Turns until the active bonus reverts.
    pub bonus_turns_remaining: u32,
    /// Flood ceiling reached.
    pub flooded: bool,
}

/// Replicated flow state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowReplica {
    /// Lifecycle state.
    pub state: FlowState,
    /// In-flight transition target.
    pub pending_target: Option<SceneId>,
    /// Loaded scene.
    pub current_scene: Option<SceneId>,
    /// Gameplay simulation not running on the authority.
    pub frozen: bool,
}

/// Replicated readiness gate set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GateReplica {
    /// Gate set generation.
    pub generation: u64,
    /// Slot presence flags in slot order.
    pub slots: Vec<(SlotId, bool)>,
    /// Every slot present.
    pub satisfied: bool,
}

/// Replicated field identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicatedField {
    /// Turn schedule.
    Turn,
    /// Hazard.
    Hazard,
    /// Flow state machine.
    Flow,
    /// Readiness gates.
    Gate,
}

impl ReplicatedField {
    /// All fields, in publication order.
    pub const ALL: [ReplicatedField; 4] = [
        ReplicatedField::Turn,
        ReplicatedField::Hazard,
        ReplicatedField::Flow,
        ReplicatedField::Gate,
    ];
}

/// Value of one replicated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicatedValue {
    /// Turn schedule.
    Turn(TurnReplica),
    /// Hazard.
    Hazard(HazardReplica),
    /// Flow state machine.
    Flow(FlowReplica),
    /// Readiness gates.
    Gate(GateReplica),
}

impl ReplicatedValue {
    /// Field this value belongs to.
    pub fn field(&self) -> ReplicatedField {
        match self {
            ReplicatedValue::Turn(_) => ReplicatedField::Turn,
            ReplicatedValue::Hazard(_) => ReplicatedField::Hazard,
            ReplicatedValue::Flow(_) => ReplicatedField::Flow,
            ReplicatedValue::Gate(_) => ReplicatedField::Gate,
        }
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        match self {
            ReplicatedValue::Turn(t) => {
                hasher.update_u8(0);
                hasher.update_u32(t.order.len() as u32);
                for id in &t.order {
                    hasher.update_uuid(id.as_bytes());
                }
                match &t.active {
                    Some(id) => {
                        hasher.update_bool(true);
                        hasher.update_uuid(id.as_bytes());
                    }
                    None => hasher.update_bool(false),
                }
                hasher.update_u64(t.turn_number);
                hasher.update_u32(t.actions_remaining);
            }
            ReplicatedValue::Hazard(h) => {
                hasher.update_u8(1);
                hasher.update_f64(h.position);
                hasher.update_f64(h.rate);
                hasher.update_f64(h.multiplier);
                hasher.update_u32(h.elapsed_turns);
                hasher.update_u32(h.bonus_turns_remaining);
                hasher.update_bool(h.flooded);
            }
            ReplicatedValue::Flow(f) => {
                hasher.update_u8(2);
                hasher.update_u8(f.state as u8);
                hasher.update_opt_str(f.pending_target.as_ref().map(SceneId::as_str));
                hasher.update_opt_str(f.current_scene.as_ref().map(SceneId::as_str));
                hasher.update_bool(f.frozen);
            }
            ReplicatedValue::Gate(g) => {
                hasher.update_u8(3);
                hasher.update_u64(g.generation);
                hasher.update_u32(g.slots.len() as u32);
                for (slot, present) in &g.slots {
                    hasher.update_str(slot.as_str());
                    hasher.update_bool(*present);
                }
                hasher.update_bool(g.satisfied);
            }
        }
    }
}

/// A replicated value with its per-field sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedUpdate {
    /// Monotonic per-field sequence.
    pub sequence: u64,
    /// New value.
    pub value: ReplicatedValue,
}

impl ReplicatedUpdate {
    /// Field this update belongs to.
    pub fn field(&self) -> ReplicatedField {
        self.value.field()
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// AUTHORITY SIDE
// =============================================================================

/// Pending replication updates, coalesced to the latest value per field.
#[derive(Debug, Clone, Default)]
pub struct ReplicationOutbox {
    sequences: BTreeMap<ReplicatedField, u64>,
    published: BTreeMap<ReplicatedField, ReplicatedValue>,
    pending: BTreeMap<ReplicatedField, ReplicatedUpdate>,
}

impl ReplicationOutbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a field value. Unchanged values are not re-sent.
    pub fn publish(&mut self, value: ReplicatedValue) -> bool {
        let field = value.field();
        if self.published.get(&field) == Some(&value) {
            return false;
        }

        let sequence = self.sequences.entry(field).or_insert(0);
        *sequence += 1;
        let update = ReplicatedUpdate { sequence: *sequence, value: value.clone() };

        self.published.insert(field, value);
        self.pending.insert(field, update);
        true
    }

    /// Take pending updates in field order.
    pub fn drain(&mut self) -> Vec<ReplicatedUpdate> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Latest published update of a field.
    pub fn latest(&self, field: ReplicatedField) -> Option<ReplicatedUpdate> {
        let value = self.published.get(&field)?.clone();
        let sequence = self.sequences.get(&field).copied().unwrap_or(0);
        Some(ReplicatedUpdate { sequence, value })
    }

    /// Number of fields with undrained updates.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Full replicated state for observer resynchronisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Latest update of every published field, in field order.
    pub updates: Vec<ReplicatedUpdate>,
    /// Sequence of the last emitted session event.
    pub event_sequence: u64,
    /// SHA-256 over the updates and event sequence.
    pub digest: StateHash,
}

impl SessionSnapshot {
    /// Build a snapshot from the outbox's latest values.
    pub fn capture(outbox: &ReplicationOutbox, event_sequence: u64) -> Self {
        let updates: Vec<_> = ReplicatedField::ALL.iter()
            .filter_map(|field| outbox.latest(*field))
            .collect();
        let digest = Self::compute_digest(&updates, event_sequence);
        Self { updates, event_sequence, digest }
    }

    /// Hash the snapshot contents.
    pub fn compute_digest(updates: &[ReplicatedUpdate], event_sequence: u64) -> StateHash {
        let mut hasher = StateHasher::for_snapshot();
        hasher.update_u64(event_sequence);
        hasher.update_u32(updates.len() as u32);
        for update in updates {
            hasher.update_u64(update.sequence);
            update.value.hash_into(&mut hasher);
        }
        hasher.finalize()
    }

    /// Check the digest matches the contents.
    pub fn verify(&self) -> bool {
        Self::compute_digest(&self.updates, self.event_sequence) == self.digest
    }

    /// Digest as hex.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

// =============================================================================
// OBSERVER SIDE
// =============================================================================

/// Read-only observer copy of the replicated state.
#[derive(Debug, Clone, Default)]
pub struct ObserverMirror {
    applied: BTreeMap<ReplicatedField, u64>,
    /// Turn schedule.
    pub turn: Option<TurnReplica>,
    /// Hazard.
    pub hazard: Option<HazardReplica>,
    /// Flow state machine.
    pub flow: Option<FlowReplica>,
    /// Readiness gates.
    pub gate: Option<GateReplica>,
}

impl ObserverMirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update. Stale and duplicate sequences are dropped.
    pub fn apply(&mut self, update: ReplicatedUpdate) -> bool {
        let field = update.field();
        let last = self.applied.get(&field).copied().unwrap_or(0);
        if update.sequence <= last {
            debug!("dropped {:?} update {} (have {})", field, update.sequence, last);
            return false;
        }

        self.applied.insert(field, update.sequence);
        match update.value {
            ReplicatedValue::Turn(v) => self.turn = Some(v),
            ReplicatedValue::Hazard(v) => self.hazard = Some(v),
            ReplicatedValue::Flow(v) => self.flow = Some(v),
            ReplicatedValue::Gate(v) => self.gate = Some(v),
        }
        true
    }

    /// Apply a resync snapshot. Rejected outright if the digest does not match.
    pub fn apply_snapshot(&mut self, snapshot: SessionSnapshot) -> bool {
        if !snapshot.verify() {
            debug!("dropped snapshot: digest mismatch");
            return false;
        }
        let mut changed = false;
        for update in snapshot.updates {
            changed |= self.apply(update);
        }
        changed
    }

    /// Last applied sequence of a field (0 if none).
    pub fn sequence(&self, field: ReplicatedField) -> u64 {
        self.applied.get(&field).copied().unwrap_or(0)
    }

    /// Active participant as currently mirrored.
    pub fn active_participant(&self) -> Option<ParticipantId> {
        self.turn.as_ref().and_then(|t| t.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hazard(position: f64) -> ReplicatedValue {
        ReplicatedValue::Hazard(HazardReplica {
            position,
            rate: 0.3,
            multiplier: 1.0,
            ..Default::default()
        })
    }

    fn flow(state: FlowState) -> ReplicatedValue {
        ReplicatedValue::Flow(FlowReplica { state, ..Default::default() })
    }

    #[test]
    fn test_outbox_coalesces_per_field() {
        let mut outbox = ReplicationOutbox::new();
        outbox.publish(hazard(1.0));
        outbox.publish(hazard(2.0));
        outbox.publish(flow(FlowState::InSession));

        let updates = outbox.drain();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].value, hazard(2.0));
        assert_eq!(updates[0].sequence, 2);
        assert_eq!(updates[1].sequence, 1);
        assert_eq!(outbox.pending_len(), 0);
    }

    #[test]
    fn test_outbox_skips_unchanged() {
        let mut outbox = ReplicationOutbox::new();
        assert!(outbox.publish(hazard(1.0)));
        outbox.drain();
        assert!(!outbox.publish(hazard(1.0)));
        assert!(outbox.drain().is_empty());
    }

    #[test]
    fn test_mirror_drops_stale_and_duplicate() {
        let mut mirror = ObserverMirror::new();
        let newer = ReplicatedUpdate { sequence: 2, value: hazard(2.0) };
        let older = ReplicatedUpdate { sequence: 1, value: hazard(1.0) };

        assert!(mirror.apply(newer.clone()));
        assert!(!mirror.apply(older));
        assert!(!mirror.apply(newer));
        assert_eq!(mirror.hazard.as_ref().unwrap().position, 2.0);
        assert_eq!(mirror.sequence(ReplicatedField::Hazard), 2);
    }

    #[test]
    fn test_fields_sequence_independently() {
        let mut mirror = ObserverMirror::new();
        assert!(mirror.apply(ReplicatedUpdate { sequence: 5, value: hazard(1.0) }));
        assert!(mirror.apply(ReplicatedUpdate { sequence: 1, value: flow(FlowState::Idle) }));
    }

    #[test]
    fn test_snapshot_digest() {
        let mut outbox = ReplicationOutbox::new();
        outbox.publish(hazard(3.0));
        outbox.publish(flow(FlowState::InSession));

        let snapshot = SessionSnapshot::capture(&outbox, 7);
        assert!(snapshot.verify());
        assert_eq!(snapshot.digest_hex().len(), 64);

        let mut tampered = snapshot.clone();
        tampered.event_sequence = 8;
        assert!(!tampered.verify());

        let mut mirror = ObserverMirror::new();
        assert!(!mirror.apply_snapshot(tampered));
        assert!(mirror.apply_snapshot(snapshot));
        assert_eq!(mirror.flow.as_ref().unwrap().state, FlowState::InSession);
    }

    #[test]
    fn test_update_binary_roundtrip() {
        let update = ReplicatedUpdate {
            sequence: 9,
            value: ReplicatedValue::Turn(TurnReplica {
                order: vec![ParticipantId::new([1; 16]), ParticipantId::new([2; 16])],
                active: Some(ParticipantId::new([2; 16])),
                turn_number: 4,
                actions_remaining: 1,
            }),
        };
        let bytes = update.to_bytes().unwrap();
        assert_eq!(ReplicatedUpdate::from_bytes(&bytes).unwrap(), update);
    }
}
