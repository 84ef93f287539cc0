//! Session Flow State Machine
//!
//! Governs scene transitions and the session lifecycle:
//!
//! ```text
//! Idle ──request──► Transitioning ──loaded──► InSession ──ending──► SessionEnding
//!                        │                       ▲   │                  │
//!                        └─loaded (staged)─┐     │   └────request───────┤
//!                                          ▼     │                      │
//!                                    AwaitingLoad ┘ ◄──────request──────┘
//!                            (delay elapses, destination load requested,
//!                             destination loaded)
//! ```
//!
//! A transition holds the guard from acceptance until the destination scene
//! reports loaded; requests arriving while it is held are dropped. The
//! loading-screen delay runs on a cancelable timer owned by the machine.

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::timer::{TimerId, TimerQueue};
use crate::game::events::{EndingCause, SessionEventData};
use crate::game::types::{NodeRole, SceneId};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// No scene requested yet.
    #[default]
    Idle,
    /// A transition was accepted; waiting for the first scene to load.
    Transitioning,
    /// Loading screen is up; waiting out the delay and then the destination.
    AwaitingLoad,
    /// Running in a loaded scene.
    InSession,
    /// A session-ending trigger was accepted; simulation frozen.
    SessionEnding,
}

impl FlowState {
    /// States that accept a new transition request.
    pub fn accepts_transition(self) -> bool {
        matches!(self, FlowState::Idle | FlowState::InSession | FlowState::SessionEnding)
    }
}

/// Scene configuration for the flow machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Intermediate loading scene shown before gameplay destinations.
    pub loading_scene: Option<SceneId>,
    /// How long the loading scene stays up before the destination loads.
    pub loading_delay_secs: f64,
    /// Terminal scene after a session ends in failure.
    pub game_over_scene: SceneId,
    /// Terminal scene after the last level is cleared.
    pub victory_scene: SceneId,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            loading_scene: Some(SceneId::new("loading")),
            loading_delay_secs: 1.5,
            game_over_scene: SceneId::new("game_over"),
            victory_scene: SceneId::new("victory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowTimer {
    LoadDelay,
}

/// Session lifecycle state machine.
#[derive(Debug, Clone)]
pub struct FlowStateMachine {
    role: NodeRole,
    config: FlowConfig,
    state: FlowState,
    pending_target: Option<SceneId>,
    /// Current transition goes through the loading scene.
    staged: bool,
    /// Loading delay elapsed and the destination load was requested.
    destination_requested: bool,
    transition_guard: bool,
    /// A session-ending trigger was accepted in the current InSession period.
    ending_latched: bool,
    ending_cause: Option<EndingCause>,
    current_scene: Option<SceneId>,
    last_gameplay_target: Option<SceneId>,
    timers: TimerQueue<FlowTimer>,
    load_timer: Option<TimerId>,
    events: Vec<SessionEventData>,
}

impl FlowStateMachine {
    /// Create a machine in `Idle`.
    pub fn new(role: NodeRole, config: FlowConfig) -> Self {
        Self {
            role,
            config,
            state: FlowState::Idle,
            pending_target: None,
            staged: false,
            destination_requested: false,
            transition_guard: false,
            ending_latched: false,
            ending_cause: None,
            current_scene: None,
            last_gameplay_target: None,
            timers: TimerQueue::new(),
            load_timer: None,
            events: Vec::new(),
        }
    }

    /// Request a transition to `target`.
    ///
    /// Dropped while another transition holds the guard.
    pub fn request_transition(&mut self, target: SceneId) -> bool {
        if !self.role.is_authority() {
            debug!("transition to {} rejected: not authority", target);
            return false;
        }
        if self.transition_guard || !self.state.accepts_transition() {
            debug!("transition to {} rejected: state {:?}", target, self.state);
            return false;
        }

        self.staged = self.config.loading_scene.as_ref().is_some_and(|loading| *loading != target);
        self.destination_requested = false;
        self.transition_guard = true;
        self.state = FlowState::Transitioning;
        self.pending_target = Some(target.clone());

        info!("Transition to {} accepted{}", target, if self.staged { " (staged)" } else { "" });
        self.events.push(SessionEventData::TransitionRequested { target: target.clone() });

        let first = match (&self.config.loading_scene, self.staged) {
            (Some(loading), true) => loading.clone(),
            _ => target,
        };
        self.events.push(SessionEventData::SceneLoadRequested { scene: first });
        true
    }

    /// Scene the machine is currently waiting on, if any.
    pub fn expected_scene(&self) -> Option<&SceneId> {
        match self.state {
            FlowState::Transitioning if self.staged => self.config.loading_scene.as_ref(),
            FlowState::Transitioning => self.pending_target.as_ref(),
            FlowState::AwaitingLoad if self.destination_requested => self.pending_target.as_ref(),
            _ => None,
        }
    }

    /// Load-complete report for `scene` (all observers acknowledged).
    ///
    /// Reports for any scene other than the expected one are dropped.
    pub fn on_scene_loaded(&mut self, scene: &SceneId) -> bool {
        if !self.role.is_authority() {
            debug!("load report for {} rejected: not authority", scene);
            return false;
        }
        if self.expected_scene() != Some(scene) {
            debug!("load report for {} ignored in state {:?}", scene, self.state);
            return false;
        }

        if self.state == FlowState::Transitioning && self.staged {
            self.state = FlowState::AwaitingLoad;
            self.current_scene = Some(scene.clone());
            let id = self.timers.schedule(self.config.loading_delay_secs, FlowTimer::LoadDelay);
            self.load_timer = Some(id);
            debug!("Loading scene up, destination in {:.2}s", self.config.loading_delay_secs);
        } else {
            self.enter_session(scene.clone());
        }
        true
    }

    /// Advance the machine's timers by one simulation step.
    pub fn advance(&mut self, dt_secs: f64) -> bool {
        if !self.role.is_authority() {
            return false;
        }
        let mut changed = false;
        for (id, _) in self.timers.advance(dt_secs) {
            changed |= self.handle_timer(id);
        }
        changed
    }

    /// Handle a fired timer. Stale or canceled ids are a no-op.
    pub fn handle_timer(&mut self, id: TimerId) -> bool {
        if !self.role.is_authority() {
            return false;
        }
        if self.load_timer != Some(id) || self.state != FlowState::AwaitingLoad {
            debug!("timer {:?} ignored: stale", id);
            return false;
        }
        let Some(target) = self.pending_target.clone() else {
            return false;
        };

        self.load_timer = None;
        self.destination_requested = true;
        self.events.push(SessionEventData::SceneLoadRequested { scene: target });
        true
    }

    /// Accept a session-ending trigger. At most once per InSession period.
    pub fn trigger_session_ending(&mut self, cause: EndingCause) -> bool {
        if !self.role.is_authority() {
            debug!("session ending rejected: not authority");
            return false;
        }
        if self.state != FlowState::InSession || self.ending_latched {
            debug!("session ending ({:?}) ignored in state {:?}", cause, self.state);
            return false;
        }
        if !self.current_scene.as_ref().is_some_and(|s| self.is_gameplay(s)) {
            debug!("session ending ({:?}) ignored outside gameplay", cause);
            return false;
        }

        self.ending_latched = true;
        self.state = FlowState::SessionEnding;
        self.ending_cause = Some(cause.clone());

        info!("Session ending: {:?}", cause);
        self.events.push(SessionEventData::SessionEnding { cause });
        true
    }

    /// Tear down: cancel timers and return to `Idle`, forgetting all targets.
    pub fn reset(&mut self) -> bool {
        if !self.role.is_authority() {
            debug!("flow reset rejected: not authority");
            return false;
        }

        self.timers.cancel_all();
        self.load_timer = None;
        self.state = FlowState::Idle;
        self.pending_target = None;
        self.staged = false;
        self.destination_requested = false;
        self.transition_guard = false;
        self.ending_latched = false;
        self.ending_cause = None;
        self.current_scene = None;
        self.last_gameplay_target = None;
        true
    }

    fn enter_session(&mut self, scene: SceneId) {
        let gameplay = self.is_gameplay(&scene);

        self.state = FlowState::InSession;
        self.transition_guard = false;
        self.ending_latched = false;
        self.ending_cause = None;
        self.pending_target = None;
        self.staged = false;
        self.destination_requested = false;
        self.current_scene = Some(scene.clone());
        if gameplay {
            self.last_gameplay_target = Some(scene.clone());
        }

        info!("Entered {} ({})", scene, if gameplay { "gameplay" } else { "terminal" });
        self.events.push(SessionEventData::SessionEntered { scene, gameplay });
    }

    /// Check if a scene is a gameplay target (not loading, not terminal).
    pub fn is_gameplay(&self, scene: &SceneId) -> bool {
        self.config.loading_scene.as_ref() != Some(scene)
            && *scene != self.config.game_over_scene
            && *scene != self.config.victory_scene
    }

    /// Current state.
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Target of the in-flight transition.
    pub fn pending_target(&self) -> Option<&SceneId> {
        self.pending_target.as_ref()
    }

    /// Scene currently loaded.
    pub fn current_scene(&self) -> Option<&SceneId> {
        self.current_scene.as_ref()
    }

    /// Last gameplay scene successfully entered.
    pub fn last_gameplay_target(&self) -> Option<&SceneId> {
        self.last_gameplay_target.as_ref()
    }

    /// Cause of the accepted session-ending trigger, if any.
    pub fn ending_cause(&self) -> Option<&EndingCause> {
        self.ending_cause.as_ref()
    }

    /// Check if a transition holds the guard.
    pub fn is_guarded(&self) -> bool {
        self.transition_guard
    }

    /// Pending loading-delay timer.
    pub fn load_timer(&self) -> Option<TimerId> {
        self.load_timer
    }

    /// Flow configuration.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Take pending events.
    pub fn take_events(&mut self) -> Vec<SessionEventData> {
        std::mem::take(&mut self.events)
    }
}
