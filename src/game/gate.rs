//! Readiness Gates
//!
//! Aggregates per-slot presence flags (one per exit door, say) into a single
//! edge-triggered "all ready" signal. The slot set is rebuilt for every level;
//! each rebuild bumps a generation number so that presence reports still
//! addressed to the previous level's slots are dropped.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::game::events::SessionEventData;
use crate::game::types::{NodeRole, SlotId};

/// Slot declared by a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    /// Slot identifier, unique within the level.
    pub slot: SlotId,
    /// Rank of the only participant allowed to flip this slot.
    pub owner_rank: u32,
}

impl GateSpec {
    /// Create a gate spec.
    pub fn new(slot: impl Into<String>, owner_rank: u32) -> Self {
        Self {
            slot: SlotId::new(slot),
            owner_rank,
        }
    }
}

/// Generation-scoped reference to a slot, handed to presence sources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    /// Gate set generation the slot belongs to.
    pub generation: u64,
    /// Slot identifier.
    pub slot: SlotId,
}

#[derive(Debug, Clone)]
struct Slot {
    owner_rank: u32,
    present: bool,
}

/// Result of a slot update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotOutcome {
    /// The slot value flipped.
    pub changed: bool,
    /// This update completed the set (false -> true aggregate edge).
    pub all_ready: bool,
}

/// Per-level readiness aggregator.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    role: NodeRole,
    generation: u64,
    slots: BTreeMap<SlotId, Slot>,
    satisfied: bool,
    events: Vec<SessionEventData>,
}

impl ReadinessGate {
    /// Create an empty gate set (generation 0, nothing tracked).
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            generation: 0,
            slots: BTreeMap::new(),
            satisfied: false,
            events: Vec::new(),
        }
    }

    /// Replace the tracked slots with a fresh set, all absent.
    ///
    /// Keys from earlier generations stop matching immediately.
    pub fn rebuild(&mut self, specs: &[GateSpec]) -> Vec<SlotKey> {
        if !self.role.is_authority() {
            debug!("gate rebuild rejected: not authority");
            return Vec::new();
        }

        self.generation += 1;
        self.satisfied = false;
        self.slots = specs.iter()
            .map(|spec| (spec.slot.clone(), Slot { owner_rank: spec.owner_rank, present: false }))
            .collect();

        debug!("Gate set generation {} tracks {} slots", self.generation, self.slots.len());
        self.keys()
    }

    /// Drop every tracked slot (level unloaded).
    pub fn clear(&mut self) -> bool {
        if !self.role.is_authority() {
            debug!("gate clear rejected: not authority");
            return false;
        }
        self.generation += 1;
        self.satisfied = false;
        self.slots.clear();
        true
    }

    /// Set a slot's presence flag. Idempotent.
    pub fn set_slot(&mut self, key: &SlotKey, present: bool) -> SlotOutcome {
        if !self.role.is_authority() {
            debug!("set_slot {} rejected: not authority", key.slot);
            return SlotOutcome::default();
        }
        if key.generation != self.generation {
            debug!("set_slot {} ignored: stale generation {} (current {})",
                key.slot, key.generation, self.generation);
            return SlotOutcome::default();
        }
        let Some(slot) = self.slots.get_mut(&key.slot) else {
            debug!("set_slot {} ignored: unknown slot", key.slot);
            return SlotOutcome::default();
        };
        if slot.present == present {
            return SlotOutcome::default();
        }

        slot.present = present;

        let now_satisfied = self.is_satisfied();
        let all_ready = now_satisfied && !self.satisfied;
        self.satisfied = now_satisfied;

        if all_ready {
            info!("All {} readiness slots present (generation {})", self.slots.len(), self.generation);
            self.events.push(SessionEventData::AllReady { generation: self.generation });
        }

        SlotOutcome { changed: true, all_ready }
    }

    /// True iff at least one slot is tracked and every slot is present.
    pub fn is_satisfied(&self) -> bool {
        !self.slots.is_empty() && self.slots.values().all(|s| s.present)
    }

    /// Rank allowed to flip a slot of the current generation.
    pub fn owner_rank(&self, key: &SlotKey) -> Option<u32> {
        if key.generation != self.generation {
            return None;
        }
        self.slots.get(&key.slot).map(|s| s.owner_rank)
    }

    /// Presence flag of a slot in the current generation.
    pub fn is_present(&self, slot: &SlotId) -> Option<bool> {
        self.slots.get(slot).map(|s| s.present)
    }

    /// Keys of the current generation's slots.
    pub fn keys(&self) -> Vec<SlotKey> {
        self.slots.keys()
            .map(|slot| SlotKey { generation: self.generation, slot: slot.clone() })
            .collect()
    }

    /// Slot presence flags in slot order.
    pub fn slot_states(&self) -> Vec<(SlotId, bool)> {
        self.slots.iter().map(|(id, s)| (id.clone(), s.present)).collect()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Take pending events.
    pub fn take_events(&mut self) -> Vec<SessionEventData> {
        std::mem::take(&mut self.events)
    }
}
