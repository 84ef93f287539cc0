//! Session Coordinator
//!
//! Authority-side façade composing the turn schedule, hazard, readiness
//! gates and flow state machine. Every intent coming from a participant
//! enters through one of the `on_*` entry points; each one runs to
//! completion before the next is processed.
//!
//! After an accepted entry point the coordinator stamps the components'
//! events with sequence numbers and republishes changed replicated fields.
//! Rejected calls change nothing and are only logged.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::game::events::{EndingCause, SessionEvent, SessionEventData};
use crate::game::flow::{FlowState, FlowStateMachine};
use crate::game::gate::{ReadinessGate, SlotKey};
use crate::game::hazard::HazardState;
use crate::game::turn::TurnSchedule;
use crate::game::types::{NodeRole, ParticipantId, SceneId};
use crate::session::config::SessionConfig;
use crate::session::replication::{
    FlowReplica, GateReplica, HazardReplica, ReplicatedUpdate, ReplicatedValue,
    ReplicationOutbox, SessionSnapshot, TurnReplica,
};

/// Progress that survives level reloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedProgress {
    /// Last committed checkpoint coordinate.
    pub checkpoint_coordinate: f64,
    /// Hazard elapsed-turn count at the checkpoint.
    pub hazard_turn_baseline: u32,
    /// Last gameplay scene entered.
    pub last_gameplay_target: Option<SceneId>,
}

impl PersistedProgress {
    fn starting_at(coordinate: f64) -> Self {
        Self {
            checkpoint_coordinate: coordinate,
            hazard_turn_baseline: 0,
            last_gameplay_target: None,
        }
    }
}

/// Authoritative session coordinator.
pub struct SessionCoordinator {
    role: NodeRole,
    turns: TurnSchedule,
    hazard: HazardState,
    gates: ReadinessGate,
    flow: FlowStateMachine,
    progress: PersistedProgress,
    /// Next entry into the last gameplay target restores the checkpoint.
    retry_pending: bool,
    load_acks: BTreeSet<ParticipantId>,
    ack_scene: Option<SceneId>,
    event_sequence: u64,
    events: Vec<SessionEvent>,
    outbox: ReplicationOutbox,
    config: SessionConfig,
}

impl SessionCoordinator {
    /// Create a coordinator for one session.
    pub fn new(role: NodeRole, config: SessionConfig) -> Self {
        let start = Self::initial_coordinate(&config);
        let mut coordinator = Self {
            role,
            turns: TurnSchedule::new(role, config.turn.clone()),
            hazard: HazardState::new(role, config.hazard.clone(), start),
            gates: ReadinessGate::new(role),
            flow: FlowStateMachine::new(role, config.flow.clone()),
            progress: PersistedProgress::starting_at(start),
            retry_pending: false,
            load_acks: BTreeSet::new(),
            ack_scene: None,
            event_sequence: 0,
            events: Vec::new(),
            outbox: ReplicationOutbox::new(),
            config,
        };
        if role.is_authority() {
            coordinator.publish();
        }
        coordinator
    }

    fn initial_coordinate(config: &SessionConfig) -> f64 {
        config.first_level().map(|l| l.start_coordinate).unwrap_or(0.0)
    }

    // =========================================================================
    // ENTRY POINTS
    // =========================================================================

    /// Participant joined.
    pub fn on_participant_joined(&mut self, participant: ParticipantId, rank: u32) -> bool {
        if self.rejects("on_participant_joined") {
            return false;
        }
        if !self.turns.register(participant, rank) {
            return false;
        }
        info!("Participant {} joined with rank {}", participant, rank);
        self.finish();
        true
    }

    /// Participant disconnected.
    pub fn on_participant_left(&mut self, participant: ParticipantId) -> bool {
        if self.rejects("on_participant_left") {
            return false;
        }
        if !self.turns.unregister(&participant) {
            return false;
        }
        info!("Participant {} left", participant);

        // The departed participant may have been the last ack outstanding.
        self.load_acks.remove(&participant);
        if let Some(expected) = self.flow.expected_scene().cloned() {
            if self.ack_scene.as_ref() == Some(&expected) && self.load_barrier_met() {
                self.complete_load(&expected);
            }
        }
        self.finish();
        true
    }

    /// Participant asks to end its turn.
    pub fn on_turn_end_requested(&mut self, participant: ParticipantId) -> bool {
        if self.rejects("on_turn_end_requested") {
            return false;
        }
        if !self.is_simulating() {
            debug!("end turn from {} ignored: not simulating", participant);
            return false;
        }
        if !self.turns.is_active(&participant) {
            debug!("end turn from {} ignored: not the active participant", participant);
            return false;
        }

        self.finish_turn();
        self.finish();
        true
    }

    /// Participant spent one action. Returns the actions left.
    pub fn on_action_spent(&mut self, participant: ParticipantId) -> Option<u32> {
        if self.rejects("on_action_spent") {
            return None;
        }
        if !self.is_simulating() {
            debug!("action from {} ignored: not simulating", participant);
            return None;
        }

        let remaining = self.turns.spend_action(&participant)?;
        if remaining == 0 && self.turns.config().auto_end_on_exhaust {
            debug!("{} is out of actions, ending turn", participant);
            self.finish_turn();
        }
        self.finish();
        Some(remaining)
    }

    /// Apply a temporary hazard bonus.
    pub fn on_hazard_bonus_requested(&mut self, multiplier_delta: f64, duration_turns: u32) -> bool {
        if self.rejects("on_hazard_bonus_requested") {
            return false;
        }
        if !self.is_simulating() {
            debug!("hazard bonus ignored: not simulating");
            return false;
        }
        if !self.hazard.add_bonus(multiplier_delta, duration_turns) {
            return false;
        }
        self.finish();
        true
    }

    /// Participant reached a readiness slot.
    pub fn on_gate_entered(&mut self, key: &SlotKey, participant: ParticipantId) -> bool {
        self.set_gate(key, participant, true)
    }

    /// Participant left a readiness slot.
    pub fn on_gate_exited(&mut self, key: &SlotKey, participant: ParticipantId) -> bool {
        self.set_gate(key, participant, false)
    }

    /// Death or failure signal. Only the first one per session period counts.
    pub fn on_session_ending_signal(&mut self, cause: EndingCause) -> bool {
        if self.rejects("on_session_ending_signal") {
            return false;
        }
        if !self.flow.trigger_session_ending(cause) {
            return false;
        }
        self.collect_events();

        let game_over = self.config.flow.game_over_scene.clone();
        self.flow.request_transition(game_over);
        self.finish();
        true
    }

    /// Re-enter the last gameplay level from its checkpoint.
    pub fn on_retry_requested(&mut self) -> bool {
        if self.rejects("on_retry_requested") {
            return false;
        }
        let Some(target) = self.flow.last_gameplay_target().cloned() else {
            debug!("retry ignored: no gameplay target recorded");
            return false;
        };
        if !self.flow.request_transition(target.clone()) {
            return false;
        }

        info!("Retrying {} from checkpoint {:.2}", target, self.progress.checkpoint_coordinate);
        self.retry_pending = true;
        self.finish();
        true
    }

    /// Begin the session by loading the first level.
    pub fn start_session(&mut self) -> bool {
        if self.rejects("start_session") {
            return false;
        }
        if self.flow.state() != FlowState::Idle {
            debug!("start_session ignored: state {:?}", self.flow.state());
            return false;
        }
        let Some(first) = self.config.first_level().map(|l| l.scene.clone()) else {
            debug!("start_session ignored: no levels");
            return false;
        };
        if !self.flow.request_transition(first) {
            return false;
        }
        self.finish();
        true
    }

    /// Scene load completed everywhere (single-node hosts report directly).
    pub fn on_scene_loaded(&mut self, scene: &SceneId) -> bool {
        if self.rejects("on_scene_loaded") {
            return false;
        }
        if !self.complete_load(scene) {
            return false;
        }
        self.finish();
        true
    }

    /// One participant finished loading `scene`. The scene counts as loaded
    /// once every registered participant has acknowledged it.
    pub fn on_load_acknowledged(&mut self, scene: &SceneId, participant: ParticipantId) -> bool {
        if self.rejects("on_load_acknowledged") {
            return false;
        }
        let Some(expected) = self.flow.expected_scene().cloned() else {
            debug!("load ack for {} from {} ignored: no load pending", scene, participant);
            return false;
        };
        if *scene != expected {
            debug!("load ack for {} from {} ignored: expecting {}", scene, participant, expected);
            return false;
        }
        if !self.turns.contains(&participant) {
            debug!("load ack from {} ignored: unknown participant", participant);
            return false;
        }

        if self.ack_scene.as_ref() != Some(&expected) {
            self.load_acks.clear();
            self.ack_scene = Some(expected.clone());
        }
        if !self.load_acks.insert(participant) {
            return false;
        }
        debug!("{} loaded {} ({}/{})", participant, scene, self.load_acks.len(), self.turns.len());

        if self.load_barrier_met() {
            self.complete_load(&expected);
        }
        self.finish();
        true
    }

    /// Commit a checkpoint at `coordinate`.
    pub fn on_checkpoint_reached(&mut self, coordinate: f64) -> bool {
        if self.rejects("on_checkpoint_reached") {
            return false;
        }
        if !self.is_simulating() {
            debug!("checkpoint ignored: not simulating");
            return false;
        }
        if !coordinate.is_finite() {
            debug!("checkpoint ignored: non-finite coordinate");
            return false;
        }
        if coordinate >= self.config.hazard.flood_ceiling {
            debug!("checkpoint at {} ignored: at or above flood ceiling {}", coordinate, self.config.hazard.flood_ceiling);
            return false;
        }

        self.progress.checkpoint_coordinate = coordinate;
        self.progress.hazard_turn_baseline = self.hazard.elapsed_turns();
        info!("Checkpoint at {:.2} (turn baseline {})", coordinate, self.progress.hazard_turn_baseline);

        self.collect_events();
        self.push_event(SessionEventData::CheckpointCommitted {
            coordinate,
            turn_baseline: self.progress.hazard_turn_baseline,
        });
        self.finish();
        true
    }

    /// Advance timers and the hazard by one simulation step.
    pub fn advance(&mut self, dt_secs: f64) -> bool {
        if !self.role.is_authority() {
            return false;
        }

        let mut changed = self.flow.advance(dt_secs);

        if self.is_simulating() {
            changed |= self.hazard.tick(dt_secs);
            if self.hazard.is_flooded() {
                self.collect_events();
                self.on_session_ending_signal(EndingCause::Flooded);
            }
        }

        if changed {
            self.finish();
        }
        changed
    }

    /// Tear the session down: cancel pending timers and reset every component.
    pub fn teardown(&mut self) -> bool {
        if self.rejects("teardown") {
            return false;
        }

        let start = Self::initial_coordinate(&self.config);
        self.flow.reset();
        self.gates.clear();
        self.hazard.reset_to(start);
        self.turns.reset();
        self.progress = PersistedProgress::starting_at(start);
        self.retry_pending = false;
        self.load_acks.clear();
        self.ack_scene = None;

        info!("Session torn down");
        self.finish();
        true
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn rejects(&self, op: &str) -> bool {
        if self.role.is_authority() {
            return false;
        }
        debug!("{} rejected: not authority", op);
        true
    }

    fn finish_turn(&mut self) {
        if self.turns.end_turn().is_some() {
            self.hazard.on_turn_ended();
        }
    }

    fn set_gate(&mut self, key: &SlotKey, participant: ParticipantId, present: bool) -> bool {
        if self.rejects("set_gate") {
            return false;
        }
        let Some(rank) = self.turns.get(&participant).map(|p| p.rank) else {
            debug!("gate {} from {} ignored: unknown participant", key.slot, participant);
            return false;
        };
        match self.gates.owner_rank(key) {
            Some(owner) if owner == rank => {}
            Some(owner) => {
                debug!("gate {} belongs to rank {}, ignoring {} (rank {})", key.slot, owner, participant, rank);
                return false;
            }
            None => {
                debug!("gate {} (generation {}) ignored: not in the current set", key.slot, key.generation);
                return false;
            }
        }

        let outcome = self.gates.set_slot(key, present);
        if !outcome.changed {
            return false;
        }
        if outcome.all_ready {
            self.collect_events();
            self.advance_level();
        }
        self.finish();
        true
    }

    fn advance_level(&mut self) {
        if !self.is_simulating() {
            debug!("all ready ignored: not in gameplay");
            return;
        }
        let Some(current) = self.flow.current_scene().cloned() else {
            return;
        };
        let target = match self.config.level_after(&current) {
            Some(next) => next.scene.clone(),
            None => self.config.flow.victory_scene.clone(),
        };
        info!("Level {} cleared, heading to {}", current, target);
        self.flow.request_transition(target);
    }

    fn load_barrier_met(&self) -> bool {
        !self.turns.is_empty()
            && self.turns.participants().iter().all(|p| self.load_acks.contains(&p.id))
    }

    fn complete_load(&mut self, scene: &SceneId) -> bool {
        if !self.flow.on_scene_loaded(scene) {
            return false;
        }
        self.load_acks.clear();
        self.ack_scene = None;

        if self.flow.state() == FlowState::InSession {
            self.collect_events();
            self.on_session_entered(scene.clone());
        }
        true
    }

    fn on_session_entered(&mut self, scene: SceneId) {
        let Some(level) = self.config.level(&scene).cloned() else {
            self.gates.clear();
            self.retry_pending = false;
            return;
        };

        let restoring = self.retry_pending
            && self.progress.last_gameplay_target.as_ref() == Some(&scene);
        if restoring {
            self.hazard.reset_to(self.progress.checkpoint_coordinate);
            self.hazard.restore_elapsed(self.progress.hazard_turn_baseline);
            info!("Restored {} at checkpoint {:.2}", scene, self.progress.checkpoint_coordinate);
        } else {
            self.progress.checkpoint_coordinate = level.start_coordinate;
            self.progress.hazard_turn_baseline = 0;
            self.hazard.reset_to(level.start_coordinate);
        }

        self.retry_pending = false;
        self.progress.last_gameplay_target = Some(scene);
        self.gates.rebuild(&level.gates);
        self.turns.reset();
    }

    fn is_simulating(&self) -> bool {
        self.flow.state() == FlowState::InSession
            && self.flow.current_scene().is_some_and(|s| self.flow.is_gameplay(s))
    }

    fn push_event(&mut self, data: SessionEventData) {
        self.event_sequence += 1;
        self.events.push(SessionEvent::new(self.event_sequence, data));
    }

    fn collect_events(&mut self) {
        let mut drained = self.turns.take_events();
        drained.extend(self.hazard.take_events());
        drained.extend(self.gates.take_events());
        drained.extend(self.flow.take_events());
        for data in drained {
            self.push_event(data);
        }
    }

    fn publish(&mut self) {
        let turn = TurnReplica {
            order: self.turns.participants().iter().map(|p| p.id).collect(),
            active: self.turns.active_id(),
            turn_number: self.turns.turn_number(),
            actions_remaining: self.turns.active().map(|p| p.actions_remaining).unwrap_or(0),
        };
        let hazard = HazardReplica {
            position: self.hazard.position(),
            rate: self.hazard.effective_rate(),
            multiplier: self.hazard.multiplier(),
            elapsed_turns: self.hazard.elapsed_turns(),
            bonus_turns_remaining: self.hazard.bonus_turns_remaining(),
            flooded: self.hazard.is_flooded(),
        };
        let flow = FlowReplica {
            state: self.flow.state(),
            pending_target: self.flow.pending_target().cloned(),
            current_scene: self.flow.current_scene().cloned(),
            frozen: !self.is_simulating(),
        };
        let gate = GateReplica {
            generation: self.gates.generation(),
            slots: self.gates.slot_states(),
            satisfied: self.gates.is_satisfied(),
        };

        self.outbox.publish(ReplicatedValue::Turn(turn));
        self.outbox.publish(ReplicatedValue::Hazard(hazard));
        self.outbox.publish(ReplicatedValue::Flow(flow));
        self.outbox.publish(ReplicatedValue::Gate(gate));

        #[cfg(feature = "debug-tracing")]
        debug!("replicated state digest {}", self.snapshot().digest_hex());
    }

    fn finish(&mut self) {
        self.collect_events();
        self.publish();
    }

    // =========================================================================
    // OUTPUT / ACCESSORS
    // =========================================================================

    /// Take emitted events in sequence order.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take pending replication updates.
    pub fn drain_replication(&mut self) -> Vec<ReplicatedUpdate> {
        self.outbox.drain()
    }

    /// Full replicated state for resync.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.outbox, self.event_sequence)
    }

    /// Progress that survives level reloads.
    pub fn persisted(&self) -> &PersistedProgress {
        &self.progress
    }

    /// Keys of the current level's readiness slots.
    pub fn gate_keys(&self) -> Vec<SlotKey> {
        self.gates.keys()
    }

    /// Check if the gameplay simulation is running (in a level, not ending).
    pub fn simulating(&self) -> bool {
        self.is_simulating()
    }

    /// Node role.
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Turn schedule.
    pub fn turns(&self) -> &TurnSchedule {
        &self.turns
    }

    /// Hazard state.
    pub fn hazard(&self) -> &HazardState {
        &self.hazard
    }

    /// Readiness gates.
    pub fn gates(&self) -> &ReadinessGate {
        &self.gates
    }

    /// Flow state machine.
    pub fn flow(&self) -> &FlowStateMachine {
        &self.flow
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::replication::{ObserverMirror, ReplicatedField};

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn scene(name: &str) -> SceneId {
        SceneId::new(name)
    }

    fn direct_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.flow.loading_scene = None;
        config
    }

    fn ack_all(c: &mut SessionCoordinator, name: &str) {
        c.on_load_acknowledged(&scene(name), pid(1));
        c.on_load_acknowledged(&scene(name), pid(2));
    }

    fn running(config: SessionConfig) -> SessionCoordinator {
        let mut c = SessionCoordinator::new(NodeRole::Authority, config);
        c.on_participant_joined(pid(1), 0);
        c.on_participant_joined(pid(2), 1);
        c.start_session();
        ack_all(&mut c, "level-1");
        c.drain_events();
        c
    }

    fn count(events: &[SessionEvent], pred: impl Fn(&SessionEventData) -> bool) -> usize {
        events.iter().filter(|e| pred(&e.data)).count()
    }

    #[test]
    fn test_start_session_enters_first_level() {
        let c = running(direct_config());

        assert_eq!(c.flow().state(), FlowState::InSession);
        assert_eq!(c.flow().current_scene(), Some(&scene("level-1")));
        assert!(c.simulating());
        assert_eq!(c.gate_keys().len(), 2);
        assert_eq!(c.turns().active_id(), Some(pid(1)));
        assert_eq!(c.persisted().last_gameplay_target, Some(scene("level-1")));
    }

    #[test]
    fn test_load_barrier_waits_for_everyone() {
        let mut c = SessionCoordinator::new(NodeRole::Authority, direct_config());
        c.on_participant_joined(pid(1), 0);
        c.on_participant_joined(pid(2), 1);
        c.start_session();

        assert!(c.on_load_acknowledged(&scene("level-1"), pid(1)));
        assert!(!c.on_load_acknowledged(&scene("level-1"), pid(1)));
        assert!(!c.on_load_acknowledged(&scene("level-2"), pid(2)));
        assert!(!c.on_load_acknowledged(&scene("level-1"), pid(9)));
        assert_eq!(c.flow().state(), FlowState::Transitioning);

        assert!(c.on_load_acknowledged(&scene("level-1"), pid(2)));
        assert_eq!(c.flow().state(), FlowState::InSession);
    }

    #[test]
    fn test_departure_releases_load_barrier() {
        let mut c = SessionCoordinator::new(NodeRole::Authority, direct_config());
        c.on_participant_joined(pid(1), 0);
        c.on_participant_joined(pid(2), 1);
        c.start_session();
        c.on_load_acknowledged(&scene("level-1"), pid(1));

        assert!(c.on_participant_left(pid(2)));
        assert_eq!(c.flow().state(), FlowState::InSession);
    }

    #[test]
    fn test_turn_end_advances_hazard() {
        let mut c = running(direct_config());

        assert!(!c.on_turn_end_requested(pid(2)));
        assert!(c.on_turn_end_requested(pid(1)));
        assert_eq!(c.turns().active_id(), Some(pid(2)));
        assert_eq!(c.hazard().elapsed_turns(), 1);

        let events = c.drain_events();
        assert_eq!(count(&events, |e| matches!(e, SessionEventData::TurnStarted { .. })), 1);
    }

    #[test]
    fn test_exhausted_actions_end_turn() {
        let mut c = running(direct_config());

        assert_eq!(c.on_action_spent(pid(2)), None);
        assert_eq!(c.on_action_spent(pid(1)), Some(2));
        assert_eq!(c.on_action_spent(pid(1)), Some(1));
        assert_eq!(c.on_action_spent(pid(1)), Some(0));

        assert_eq!(c.turns().active_id(), Some(pid(2)));
        assert_eq!(c.hazard().elapsed_turns(), 1);
    }

    #[test]
    fn test_double_ending_signal_requests_one_transition() {
        let mut c = running(direct_config());

        let died = |n| EndingCause::ParticipantDied { participant: pid(n) };
        assert!(c.on_session_ending_signal(died(1)));
        assert!(!c.on_session_ending_signal(died(2)));
        assert!(!c.simulating());
        assert!(!c.on_turn_end_requested(pid(1)));

        let events = c.drain_events();
        let game_over = scene("game_over");
        assert_eq!(count(&events, |e| matches!(e, SessionEventData::SessionEnding { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e,
            SessionEventData::TransitionRequested { target } if *target == game_over)), 1);
        assert_eq!(c.flow().pending_target(), Some(&game_over));
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_ending_signal_replicates_frozen_flow() {
        let mut c = running(direct_config());
        c.drain_replication();

        c.on_session_ending_signal(EndingCause::ParticipantDied { participant: pid(1) });

        let flow = c.drain_replication().into_iter()
            .find_map(|u| match u.value {
                ReplicatedValue::Flow(flow) => Some(flow),
                _ => None,
            })
            .unwrap();
        assert!(flow.frozen);
        assert_eq!(flow.pending_target, Some(scene("game_over")));
        assert!(!c.simulating());
    }

    #[test]
    fn test_checkpoint_at_flood_ceiling_rejected() {
        let mut c = running(direct_config());
        let ceiling = c.config().hazard.flood_ceiling;

        assert!(!c.on_checkpoint_reached(ceiling));
        assert!(!c.on_checkpoint_reached(1e9));
        assert_eq!(c.persisted().checkpoint_coordinate, 0.0);

        c.on_session_ending_signal(EndingCause::ParticipantDied { participant: pid(2) });
        ack_all(&mut c, "game_over");
        c.on_retry_requested();
        ack_all(&mut c, "level-1");
        c.advance(1.0 / 60.0);

        assert!(c.simulating());
        assert!(!c.hazard().is_flooded());
        assert!(c.hazard().position() < ceiling);
    }

    #[test]
    fn test_gate_exit_filtered_by_owner() {
        let mut c = running(direct_config());
        let keys = c.gate_keys();

        assert!(c.on_gate_entered(&keys[0], pid(1)));
        assert!(!c.on_gate_exited(&keys[0], pid(2)));
        assert!(c.gates().slot_states()[0].1);

        assert!(c.on_gate_exited(&keys[0], pid(1)));
        assert!(c.on_gate_entered(&keys[1], pid(2)));
        assert_eq!(c.flow().state(), FlowState::InSession);
        assert_eq!(count(&c.drain_events(), |e| matches!(e, SessionEventData::AllReady { .. })), 0);

        assert!(c.on_gate_entered(&keys[0], pid(1)));
        assert_eq!(count(&c.drain_events(), |e| matches!(e, SessionEventData::AllReady { .. })), 1);
        assert_eq!(c.flow().pending_target(), Some(&scene("level-2")));
    }

    #[test]
    fn test_gate_filtered_by_owner() {
        let mut c = running(direct_config());
        let keys = c.gate_keys();

        // door-left belongs to rank 0, door-right to rank 1.
        assert!(!c.on_gate_entered(&keys[0], pid(2)));
        assert!(c.on_gate_entered(&keys[0], pid(1)));
        assert!(!c.on_gate_entered(&keys[0], pid(1)));
        assert_eq!(c.flow().state(), FlowState::InSession);

        assert!(c.on_gate_entered(&keys[1], pid(2)));
        assert_eq!(c.flow().pending_target(), Some(&scene("level-2")));

        let events = c.drain_events();
        assert_eq!(count(&events, |e| matches!(e, SessionEventData::AllReady { .. })), 1);
    }

    #[test]
    fn test_stale_gate_key_after_level_change() {
        let mut c = running(direct_config());
        let old = c.gate_keys();
        c.on_gate_entered(&old[0], pid(1));
        c.on_gate_entered(&old[1], pid(2));
        ack_all(&mut c, "level-2");
        assert_eq!(c.flow().current_scene(), Some(&scene("level-2")));

        assert!(!c.on_gate_entered(&old[0], pid(1)));
        let fresh = c.gate_keys();
        assert!(c.on_gate_entered(&fresh[0], pid(1)));
    }

    #[test]
    fn test_last_level_leads_to_victory() {
        let mut c = running(direct_config());
        for level in ["level-2", "victory"] {
            let keys = c.gate_keys();
            c.on_gate_entered(&keys[0], pid(1));
            c.on_gate_entered(&keys[1], pid(2));
            ack_all(&mut c, level);
        }

        assert_eq!(c.flow().current_scene(), Some(&scene("victory")));
        assert!(!c.simulating());
        assert!(c.gate_keys().is_empty());
        assert_eq!(c.persisted().last_gameplay_target, Some(scene("level-2")));
    }

    #[test]
    fn test_retry_restores_checkpoint() {
        let mut c = running(direct_config());
        c.on_turn_end_requested(pid(1));
        c.on_turn_end_requested(pid(2));
        assert!(c.on_checkpoint_reached(10.0));
        c.on_turn_end_requested(pid(1));
        assert_eq!(c.hazard().elapsed_turns(), 3);

        c.on_session_ending_signal(EndingCause::ParticipantDied { participant: pid(2) });
        ack_all(&mut c, "game_over");
        assert_eq!(c.flow().current_scene(), Some(&scene("game_over")));

        assert!(c.on_retry_requested());
        ack_all(&mut c, "level-1");

        assert!(c.simulating());
        assert_eq!(c.hazard().position(), 10.0);
        assert_eq!(c.hazard().elapsed_turns(), 2);
        assert_eq!(c.turns().active_id(), Some(pid(1)));
    }

    #[test]
    fn test_retry_without_target_is_noop() {
        let mut c = SessionCoordinator::new(NodeRole::Authority, direct_config());
        assert!(!c.on_retry_requested());
        assert_eq!(c.flow().state(), FlowState::Idle);
    }

    #[test]
    fn test_flood_ends_session() {
        let mut config = direct_config();
        config.hazard.flood_ceiling = 0.5;
        let mut c = running(config);

        assert!(c.advance(1.0));
        assert!(c.simulating());
        c.advance(1.0);

        let events = c.drain_events();
        assert_eq!(count(&events, |e| matches!(e, SessionEventData::HazardFlooded { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e,
            SessionEventData::SessionEnding { cause: EndingCause::Flooded })), 1);
        assert_eq!(c.flow().pending_target(), Some(&scene("game_over")));
    }

    #[test]
    fn test_teardown_cancels_loading_delay() {
        let mut c = SessionCoordinator::new(NodeRole::Authority, SessionConfig::default());
        c.on_participant_joined(pid(1), 0);
        c.on_participant_joined(pid(2), 1);
        c.start_session();
        ack_all(&mut c, "loading");
        assert_eq!(c.flow().state(), FlowState::AwaitingLoad);

        assert!(c.teardown());
        c.drain_events();
        assert!(!c.advance(5.0));
        assert!(c.drain_events().is_empty());
        assert_eq!(c.flow().state(), FlowState::Idle);
    }

    #[test]
    fn test_staged_load_through_loading_scene() {
        let mut c = SessionCoordinator::new(NodeRole::Authority, SessionConfig::default());
        c.on_participant_joined(pid(1), 0);
        c.on_participant_joined(pid(2), 1);
        c.start_session();
        ack_all(&mut c, "loading");

        // Destination acks are ignored until the delay elapses.
        assert!(!c.on_load_acknowledged(&scene("level-1"), pid(1)));
        assert!(c.advance(1.5));
        ack_all(&mut c, "level-1");

        assert!(c.simulating());
    }

    #[test]
    fn test_observer_rejects_everything() {
        let mut c = SessionCoordinator::new(NodeRole::Observer, direct_config());
        assert!(!c.on_participant_joined(pid(1), 0));
        assert!(!c.start_session());
        assert!(!c.on_session_ending_signal(EndingCause::External));
        assert!(!c.advance(1.0));
        assert!(c.drain_events().is_empty());
        assert!(c.drain_replication().is_empty());
    }

    #[test]
    fn test_replication_reaches_mirror() {
        let mut c = running(direct_config());
        let mut mirror = ObserverMirror::new();
        for update in c.drain_replication() {
            mirror.apply(update);
        }
        assert_eq!(mirror.active_participant(), Some(pid(1)));

        c.on_turn_end_requested(pid(1));
        let updates = c.drain_replication();
        assert!(updates.iter().any(|u| u.field() == ReplicatedField::Turn));
        for update in updates {
            mirror.apply(update);
        }
        assert_eq!(mirror.active_participant(), Some(pid(2)));
        assert_eq!(mirror.hazard.as_ref().unwrap().elapsed_turns, 1);

        let snapshot = c.snapshot();
        assert!(snapshot.verify());
        assert_eq!(snapshot.updates.len(), 4);
    }
}
