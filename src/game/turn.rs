//! Turn Scheduling
//!
//! Orders participants by rank and tracks whose turn is active.
//! The schedule only runs once a quorum is registered; before that no
//! participant is active.

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::game::events::SessionEventData;
use crate::game::types::{NodeRole, ParticipantId};
use crate::QUORUM;

/// Configuration for turn scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Participants required before the schedule runs.
    pub quorum: usize,
    /// Actions granted to a participant at the start of each of its turns.
    pub actions_per_turn: u32,
    /// End the turn automatically once the active participant runs out of actions.
    pub auto_end_on_exhaust: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            quorum: QUORUM,
            actions_per_turn: 3,
            auto_end_on_exhaust: true,
        }
    }
}

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity.
    pub id: ParticipantId,
    /// Ordinal rank; lower ranks act first.
    pub rank: u32,
    /// Actions left in the current turn.
    pub actions_remaining: u32,
    /// Is it this participant's turn?
    pub active: bool,
    /// Completed turns.
    pub turns_taken: u32,
}

impl Participant {
    fn new(id: ParticipantId, rank: u32, actions: u32) -> Self {
        Self {
            id,
            rank,
            actions_remaining: actions,
            active: false,
            turns_taken: 0,
        }
    }
}

/// Result of a completed turn change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnHandoff {
    /// Participant whose turn just ended.
    pub ended: ParticipantId,
    /// Participant whose turn just started.
    pub started: ParticipantId,
}

/// Rank-ordered turn schedule.
#[derive(Debug, Clone)]
pub struct TurnSchedule {
    role: NodeRole,
    config: TurnConfig,
    /// Sorted by (rank, id).
    participants: Vec<Participant>,
    cursor: usize,
    turn_number: u64,
    events: Vec<SessionEventData>,
}

impl TurnSchedule {
    /// Create an empty schedule.
    pub fn new(role: NodeRole, config: TurnConfig) -> Self {
        Self {
            role,
            config,
            participants: Vec::new(),
            cursor: 0,
            turn_number: 0,
            events: Vec::new(),
        }
    }

    /// Register a participant. Idempotent; re-sorts by rank and resets the
    /// schedule when the quorum is first reached.
    pub fn register(&mut self, id: ParticipantId, rank: u32) -> bool {
        if !self.role.is_authority() {
            debug!("register {} rejected: not authority", id);
            return false;
        }
        if self.contains(&id) {
            debug!("register {} ignored: already registered", id);
            return false;
        }

        let was_running = self.is_running();
        let active_id = self.active_id();

        self.participants.push(Participant::new(id, rank, self.config.actions_per_turn));
        self.participants.sort_by(|a, b| a.rank.cmp(&b.rank).then(a.id.cmp(&b.id)));

        // Keep the cursor on whoever was already acting.
        if let Some(active) = active_id {
            if let Some(idx) = self.index_of(&active) {
                self.cursor = idx;
            }
        }

        self.events.push(SessionEventData::ParticipantJoined { participant: id, rank });

        if !was_running && self.is_running() {
            info!("Turn quorum reached with {} participants", self.participants.len());
            self.reset();
        }

        true
    }

    /// Remove a participant (disconnect).
    pub fn unregister(&mut self, id: &ParticipantId) -> bool {
        if !self.role.is_authority() {
            debug!("unregister {} rejected: not authority", id);
            return false;
        }
        let Some(idx) = self.index_of(id) else {
            debug!("unregister {} ignored: unknown participant", id);
            return false;
        };

        let was_running = self.is_running();
        let was_active = self.participants[idx].active;

        self.participants.remove(idx);
        self.events.push(SessionEventData::ParticipantLeft { participant: *id });

        if !self.is_running() {
            if was_running {
                info!("Turn schedule stopped: below quorum");
            }
            for p in &mut self.participants {
                p.active = false;
            }
            self.cursor = 0;
            return true;
        }

        if idx < self.cursor {
            self.cursor -= 1;
        } else if was_active {
            self.cursor = idx % self.participants.len();
            self.activate_cursor();
        }

        true
    }

    /// Deactivate everyone, move the cursor to the first participant and
    /// start its turn (when the quorum is present).
    pub fn reset(&mut self) -> bool {
        if !self.role.is_authority() {
            debug!("turn reset rejected: not authority");
            return false;
        }

        for p in &mut self.participants {
            p.active = false;
            p.actions_remaining = self.config.actions_per_turn;
        }
        self.cursor = 0;

        if self.is_running() {
            self.activate_cursor();
        }
        true
    }

    /// End the active participant's turn and start the next one.
    pub fn end_turn(&mut self) -> Option<TurnHandoff> {
        if !self.role.is_authority() {
            debug!("end_turn rejected: not authority");
            return None;
        }
        if self.participants.is_empty() || !self.is_running() {
            debug!("end_turn ignored: schedule not running");
            return None;
        }

        let ended = {
            let current = &mut self.participants[self.cursor];
            current.active = false;
            current.turns_taken = current.turns_taken.saturating_add(1);
            current.id
        };
        self.events.push(SessionEventData::TurnEnded { participant: ended });

        self.cursor = (self.cursor + 1) % self.participants.len();
        let started = self.activate_cursor();

        Some(TurnHandoff { ended, started })
    }

    /// Spend one action of the active participant. Returns the actions left.
    pub fn spend_action(&mut self, id: &ParticipantId) -> Option<u32> {
        if !self.role.is_authority() {
            debug!("spend_action {} rejected: not authority", id);
            return None;
        }
        if self.active_id() != Some(*id) {
            debug!("spend_action {} ignored: not the active participant", id);
            return None;
        }

        let current = &mut self.participants[self.cursor];
        if current.actions_remaining == 0 {
            debug!("spend_action {} ignored: no actions left", id);
            return None;
        }
        current.actions_remaining -= 1;
        Some(current.actions_remaining)
    }

    fn activate_cursor(&mut self) -> ParticipantId {
        let current = &mut self.participants[self.cursor];
        current.active = true;
        current.actions_remaining = self.config.actions_per_turn;
        let id = current.id;

        self.turn_number += 1;
        self.events.push(SessionEventData::TurnStarted {
            participant: id,
            turn_number: self.turn_number,
        });
        debug!("Turn {} started for {}", self.turn_number, id);
        id
    }

    fn index_of(&self, id: &ParticipantId) -> Option<usize> {
        self.participants.iter().position(|p| p.id == *id)
    }

    /// Check if a participant is registered.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.index_of(id).is_some()
    }

    /// Get a participant.
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == *id)
    }

    /// Participants in turn order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Currently active participant.
    pub fn active(&self) -> Option<&Participant> {
        self.participants.get(self.cursor).filter(|p| p.active)
    }

    /// Id of the currently active participant.
    pub fn active_id(&self) -> Option<ParticipantId> {
        self.active().map(|p| p.id)
    }

    /// Check if it is this participant's turn.
    pub fn is_active(&self, id: &ParticipantId) -> bool {
        self.active_id() == Some(*id)
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Check if nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Check if the quorum is present.
    pub fn is_running(&self) -> bool {
        self.participants.len() >= self.config.quorum
    }

    /// Number of turns started so far.
    pub fn turn_number(&self) -> u64 {
        self.turn_number
    }

    /// Schedule configuration.
    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Take pending events.
    pub fn take_events(&mut self) -> Vec<SessionEventData> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn authority() -> TurnSchedule {
        TurnSchedule::new(NodeRole::Authority, TurnConfig::default())
    }

    fn active_count(schedule: &TurnSchedule) -> usize {
        schedule.participants().iter().filter(|p| p.active).count()
    }

    #[test]
    fn test_nobody_active_before_quorum() {
        let mut schedule = authority();
        assert!(schedule.register(pid(1), 0));

        assert_eq!(active_count(&schedule), 0);
        assert!(!schedule.is_running());
        assert!(schedule.end_turn().is_none());
    }

    #[test]
    fn test_quorum_starts_lowest_rank() {
        let mut schedule = authority();
        schedule.register(pid(1), 5);
        schedule.register(pid(2), 1);

        assert_eq!(schedule.active_id(), Some(pid(2)));
        assert_eq!(active_count(&schedule), 1);

        let started: Vec<_> = schedule.take_events().into_iter()
            .filter(|e| matches!(e, SessionEventData::TurnStarted { .. }))
            .collect();
        assert_eq!(started.len(), 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut schedule = authority();
        assert!(schedule.register(pid(1), 0));
        assert!(!schedule.register(pid(1), 0));
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn test_observer_cannot_mutate() {
        let mut schedule = TurnSchedule::new(NodeRole::Observer, TurnConfig::default());
        assert!(!schedule.register(pid(1), 0));
        assert!(!schedule.reset());
        assert!(schedule.end_turn().is_none());
        assert!(schedule.is_empty());
        assert!(schedule.take_events().is_empty());
    }

    #[test]
    fn test_end_turn_alternates() {
        let mut schedule = authority();
        schedule.register(pid(1), 0);
        schedule.register(pid(2), 1);

        let handoff = schedule.end_turn().unwrap();
        assert_eq!(handoff, TurnHandoff { ended: pid(1), started: pid(2) });

        let handoff = schedule.end_turn().unwrap();
        assert_eq!(handoff, TurnHandoff { ended: pid(2), started: pid(1) });
        assert_eq!(schedule.get(&pid(1)).unwrap().turns_taken, 1);
    }

    #[test]
    fn test_late_join_keeps_active_participant() {
        let mut schedule = authority();
        schedule.register(pid(1), 1);
        schedule.register(pid(2), 2);
        schedule.end_turn();
        assert_eq!(schedule.active_id(), Some(pid(2)));

        // Lower rank sorts in front of the active participant.
        schedule.register(pid(3), 0);
        assert_eq!(schedule.active_id(), Some(pid(2)));
        assert_eq!(schedule.cursor(), 2);
    }

    #[test]
    fn test_spend_action_only_for_active() {
        let mut schedule = authority();
        schedule.register(pid(1), 0);
        schedule.register(pid(2), 1);

        assert_eq!(schedule.spend_action(&pid(2)), None);
        assert_eq!(schedule.spend_action(&pid(1)), Some(2));
        assert_eq!(schedule.spend_action(&pid(1)), Some(1));
        assert_eq!(schedule.spend_action(&pid(1)), Some(0));
        assert_eq!(schedule.spend_action(&pid(1)), None);

        // Counters refill when the turn comes back around.
        schedule.end_turn();
        schedule.end_turn();
        assert_eq!(schedule.get(&pid(1)).unwrap().actions_remaining, 3);
    }

    #[test]
    fn test_unregister_below_quorum_stops() {
        let mut schedule = authority();
        schedule.register(pid(1), 0);
        schedule.register(pid(2), 1);

        assert!(schedule.unregister(&pid(1)));
        assert_eq!(active_count(&schedule), 0);
        assert!(schedule.active_id().is_none());
        assert!(!schedule.unregister(&pid(1)));
    }

    #[test]
    fn test_unregister_active_passes_turn() {
        let mut schedule = authority();
        schedule.register(pid(1), 0);
        schedule.register(pid(2), 1);
        schedule.register(pid(3), 2);
        schedule.end_turn();
        assert_eq!(schedule.active_id(), Some(pid(2)));

        schedule.unregister(&pid(2));
        assert_eq!(schedule.active_id(), Some(pid(3)));
        assert_eq!(active_count(&schedule), 1);
    }

    #[test]
    fn test_unregister_before_cursor_keeps_active() {
        let mut schedule = authority();
        schedule.register(pid(1), 0);
        schedule.register(pid(2), 1);
        schedule.register(pid(3), 2);
        schedule.end_turn();
        schedule.end_turn();
        assert_eq!(schedule.active_id(), Some(pid(3)));

        schedule.unregister(&pid(1));
        assert_eq!(schedule.active_id(), Some(pid(3)));
        assert_eq!(schedule.cursor(), 1);
    }

    #[test]
    fn test_reset_returns_to_first() {
        let mut schedule = authority();
        schedule.register(pid(1), 0);
        schedule.register(pid(2), 1);
        schedule.end_turn();

        schedule.reset();
        assert_eq!(schedule.cursor(), 0);
        assert_eq!(schedule.active_id(), Some(pid(1)));
        assert_eq!(active_count(&schedule), 1);
    }

    proptest! {
        #[test]
        fn prop_rotation_follows_rank_with_period_n(
            ranks in proptest::collection::btree_set(0u32..1000, 2..8),
        ) {
            let ranks: Vec<u32> = ranks.into_iter().collect();
            let mut schedule = authority();
            // Register in reverse rank order to exercise sorting.
            for (i, rank) in ranks.iter().enumerate().rev() {
                schedule.register(pid(i as u8 + 1), *rank);
            }
            schedule.reset();

            let n = ranks.len();
            let mut seen = Vec::new();
            for _ in 0..(2 * n) {
                prop_assert_eq!(active_count(&schedule), 1);
                seen.push(schedule.active().unwrap().rank);
                schedule.end_turn();
            }

            prop_assert_eq!(&seen[..n], &ranks[..]);
            prop_assert_eq!(&seen[n..], &ranks[..]);
        }
    }
}
