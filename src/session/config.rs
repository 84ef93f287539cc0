//! Session Configuration
//!
//! Level sequence plus the tuning of every coordination component.
//! Loaded from JSON; every field has a default.

use std::collections::BTreeSet;
use std::path::Path;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::flow::FlowConfig;
use crate::game::gate::GateSpec;
use crate::game::hazard::HazardConfig;
use crate::game::turn::TurnConfig;
use crate::game::types::SceneId;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Config is not valid JSON for the schema.
    #[error("failed to parse session config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config parsed but is unusable.
    #[error("invalid session config: {0}")]
    Invalid(String),
}

/// One gameplay level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    /// Scene to load.
    pub scene: SceneId,
    /// Hazard start coordinate (and first checkpoint) of the level.
    #[serde(default)]
    pub start_coordinate: f64,
    /// Readiness slots that must all be present to leave the level.
    #[serde(default)]
    pub gates: Vec<GateSpec>,
}

impl LevelSpec {
    /// Level with one exit slot per participant rank.
    pub fn two_door(scene: &str, start_coordinate: f64) -> Self {
        Self {
            scene: SceneId::new(scene),
            start_coordinate,
            gates: vec![GateSpec::new("door-left", 0), GateSpec::new("door-right", 1)],
        }
    }
}

/// Full session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Turn scheduling.
    pub turn: TurnConfig,
    /// Hazard curve.
    pub hazard: HazardConfig,
    /// Scene flow.
    pub flow: FlowConfig,
    /// Ordered gameplay levels.
    pub levels: Vec<LevelSpec>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn: TurnConfig::default(),
            hazard: HazardConfig::default(),
            flow: FlowConfig::default(),
            levels: vec![
                LevelSpec::two_door("level-1", 0.0),
                LevelSpec::two_door("level-2", 0.0),
            ],
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check the config is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn.quorum < 2 {
            return Err(ConfigError::Invalid(format!("quorum must be at least 2, got {}", self.turn.quorum)));
        }
        if self.levels.is_empty() {
            return Err(ConfigError::Invalid("no levels configured".into()));
        }

        let h = &self.hazard;
        for (name, value) in [
            ("base_rate", h.base_rate),
            ("growth_per_turn", h.growth_per_turn),
            ("ceiling_rate", h.ceiling_rate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("hazard.{} must be finite and >= 0, got {}", name, value)));
            }
        }
        if !h.flood_ceiling.is_finite() || h.flood_ceiling <= 0.0 {
            return Err(ConfigError::Invalid(format!("hazard.flood_ceiling must be > 0, got {}", h.flood_ceiling)));
        }
        if !self.flow.loading_delay_secs.is_finite() || self.flow.loading_delay_secs < 0.0 {
            return Err(ConfigError::Invalid("flow.loading_delay_secs must be finite and >= 0".into()));
        }

        let mut scenes = BTreeSet::new();
        for level in &self.levels {
            if !scenes.insert(&level.scene) {
                return Err(ConfigError::Invalid(format!("duplicate level scene {}", level.scene)));
            }
            if self.flow.loading_scene.as_ref() == Some(&level.scene)
                || level.scene == self.flow.game_over_scene
                || level.scene == self.flow.victory_scene
            {
                return Err(ConfigError::Invalid(format!("level scene {} collides with a loading/terminal scene", level.scene)));
            }
            if !level.start_coordinate.is_finite() {
                return Err(ConfigError::Invalid(format!("level {} has a non-finite start", level.scene)));
            }
            if level.start_coordinate >= h.flood_ceiling {
                return Err(ConfigError::Invalid(format!(
                    "level {} starts at {} (flood ceiling {})",
                    level.scene, level.start_coordinate, h.flood_ceiling,
                )));
            }
            let mut slots = BTreeSet::new();
            for gate in &level.gates {
                if !slots.insert(&gate.slot) {
                    return Err(ConfigError::Invalid(format!("level {} repeats slot {}", level.scene, gate.slot)));
                }
            }
        }
        Ok(())
    }

    /// Look up a level by scene.
    pub fn level(&self, scene: &SceneId) -> Option<&LevelSpec> {
        self.levels.iter().find(|l| l.scene == *scene)
    }

    /// Level that follows `scene`, or None after the last one.
    pub fn level_after(&self, scene: &SceneId) -> Option<&LevelSpec> {
        let idx = self.levels.iter().position(|l| l.scene == *scene)?;
        self.levels.get(idx + 1)
    }

    /// First level.
    pub fn first_level(&self) -> Option<&LevelSpec> {
        self.levels.first()
    }
}
