//! Session configuration sent to the engine before each episode

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ConfigError;

use super::action::{ActionSpace, MAX_WALK_SPEED};
use super::state::{AgentId, Position};

/// Game modes the engine can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Reach the target location
    #[default]
    Navigation,
    /// Collect as many supplies as possible
    SupplyGather,
    /// Collect supplies while fighting other agents
    SupplyBattle,
}

impl TryFrom<u8> for GameMode {
    type Error = ConfigError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Navigation),
            1 => Ok(Self::SupplyGather),
            2 => Ok(Self::SupplyBattle),
            other => Err(ConfigError::Invalid {
                field: "game_mode",
                reason: format!("unknown game mode {}", other),
            }),
        }
    }
}

/// Inclusive quantity range for supply crates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityRange {
    pub min: u32,
    pub max: u32,
}

impl QuantityRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

/// Supply placement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyConfig {
    /// Heatmap center on the ground plane (x, z)
    pub heatmap_center: [f64; 2],
    pub heatmap_radius: f64,
    /// Percentage of indoor spots that receive supplies
    pub indoor_richness: u32,
    /// Percentage of outdoor spots that receive supplies
    pub outdoor_richness: u32,
    pub indoor_quantity: QuantityRange,
    pub outdoor_quantity: QuantityRange,
    /// Minimum distance between supply crates
    pub spacing: f64,
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            heatmap_center: [0.0, 0.0],
            heatmap_radius: 30.0,
            indoor_richness: 80,
            outdoor_richness: 20,
            indoor_quantity: QuantityRange::new(10, 50),
            outdoor_quantity: QuantityRange::new(1, 5),
            spacing: 5.0,
        }
    }
}

/// Spawn settings for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpawn {
    pub start_location: Position,
}

/// Full session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub map_id: u32,
    pub map_dir: PathBuf,
    pub engine_dir: PathBuf,
    pub server_port: u16,
    pub game_mode: GameMode,
    pub random_seed: u64,
    /// Episode timeout in seconds
    pub episode_timeout: u32,
    pub start_location: Position,
    pub target_location: Position,
    pub supply: SupplyConfig,
    pub available_actions: ActionSpace,
    /// One entry per agent, agent 0 first
    pub agents: Vec<AgentSpawn>,
    pub use_depth_map: bool,
    pub record: bool,
    pub replay_suffix: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        let start_location = Position::default();
        Self {
            map_id: 1,
            map_dir: PathBuf::from("../map_data"),
            engine_dir: PathBuf::from("../unity3d"),
            server_port: 50051,
            game_mode: GameMode::Navigation,
            random_seed: 0,
            episode_timeout: 10,
            start_location,
            target_location: Position::new(5.0, 0.0, 5.0),
            supply: SupplyConfig::default(),
            available_actions: ActionSpace::default(),
            agents: vec![AgentSpawn { start_location }],
            use_depth_map: false,
            record: false,
            replay_suffix: String::new(),
        }
    }
}

impl GameConfig {
    pub fn set_map_id(&mut self, map_id: u32) -> &mut Self {
        self.map_id = map_id;
        self
    }

    pub fn set_game_mode(&mut self, mode: GameMode) -> &mut Self {
        self.game_mode = mode;
        self
    }

    pub fn set_random_seed(&mut self, seed: u64) -> &mut Self {
        self.random_seed = seed;
        self
    }

    pub fn set_episode_timeout(&mut self, secs: u32) -> &mut Self {
        self.episode_timeout = secs;
        self
    }

    /// Sets the default spawn and moves agent 0 there
    pub fn set_start_location(&mut self, location: Position) -> &mut Self {
        self.start_location = location;
        if let Some(first) = self.agents.first_mut() {
            first.start_location = location;
        }
        self
    }

    pub fn set_target_location(&mut self, location: Position) -> &mut Self {
        self.target_location = location;
        self
    }

    pub fn set_supply_heatmap_center(&mut self, center: [f64; 2]) -> &mut Self {
        self.supply.heatmap_center = center;
        self
    }

    pub fn set_supply_heatmap_radius(&mut self, radius: f64) -> &mut Self {
        self.supply.heatmap_radius = radius;
        self
    }

    pub fn set_supply_indoor_richness(&mut self, richness: u32) -> &mut Self {
        self.supply.indoor_richness = richness;
        self
    }

    pub fn set_supply_outdoor_richness(&mut self, richness: u32) -> &mut Self {
        self.supply.outdoor_richness = richness;
        self
    }

    pub fn set_supply_indoor_quantity_range(&mut self, min: u32, max: u32) -> &mut Self {
        self.supply.indoor_quantity = QuantityRange::new(min, max);
        self
    }

    pub fn set_supply_outdoor_quantity_range(&mut self, min: u32, max: u32) -> &mut Self {
        self.supply.outdoor_quantity = QuantityRange::new(min, max);
        self
    }

    pub fn set_supply_spacing(&mut self, spacing: f64) -> &mut Self {
        self.supply.spacing = spacing;
        self
    }

    pub fn set_available_actions(&mut self, actions: ActionSpace) -> &mut Self {
        self.available_actions = actions;
        self
    }

    pub fn turn_on_depth_map(&mut self) -> &mut Self {
        self.use_depth_map = true;
        self
    }

    pub fn turn_on_record(&mut self) -> &mut Self {
        self.record = true;
        self
    }

    pub fn set_game_replay_suffix(&mut self, suffix: impl Into<String>) -> &mut Self {
        self.replay_suffix = suffix.into();
        self
    }

    /// Add an agent spawning at the default start location
    pub fn add_agent(&mut self) -> AgentId {
        self.agents.push(AgentSpawn {
            start_location: self.start_location,
        });
        (self.agents.len() - 1) as AgentId
    }

    pub fn set_agent_start_location(
        &mut self,
        agent_id: AgentId,
        location: Position,
    ) -> Result<(), ConfigError> {
        let spawn = self
            .agents
            .get_mut(agent_id as usize)
            .ok_or_else(|| ConfigError::Invalid {
                field: "agents",
                reason: format!("no agent with id {}", agent_id),
            })?;
        spawn.start_location = location;
        Ok(())
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = AgentId> {
        0..self.agents.len() as AgentId
    }

    /// Check field ranges before handing the config to the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: String) -> ConfigError {
            ConfigError::Invalid { field, reason }
        }

        if self.agents.is_empty() {
            return Err(invalid("agents", "at least one agent is required".into()));
        }
        if self.episode_timeout == 0 {
            return Err(invalid("episode_timeout", "must be positive".into()));
        }

        let supply = &self.supply;
        if supply.heatmap_radius.is_nan() || supply.heatmap_radius <= 0.0 {
            return Err(invalid(
                "supply.heatmap_radius",
                format!("must be positive, got {}", supply.heatmap_radius),
            ));
        }
        if supply.spacing < 0.0 {
            return Err(invalid(
                "supply.spacing",
                format!("must not be negative, got {}", supply.spacing),
            ));
        }
        for (field, richness) in [
            ("supply.indoor_richness", supply.indoor_richness),
            ("supply.outdoor_richness", supply.outdoor_richness),
        ] {
            if richness > 100 {
                return Err(invalid(field, format!("must be within 0..=100, got {}", richness)));
            }
        }
        for (field, range) in [
            ("supply.indoor_quantity", supply.indoor_quantity),
            ("supply.outdoor_quantity", supply.outdoor_quantity),
        ] {
            if range.min > range.max {
                return Err(invalid(
                    field,
                    format!("min {} exceeds max {}", range.min, range.max),
                ));
            }
        }

        Ok(())
    }

    /// Short digest identifying this exact configuration
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(&digest[..8])
    }
}

/// Reject walk speeds the engine would clamp
pub fn check_walk_speed(speed: f64) -> Result<f64, ConfigError> {
    if (0.0..=MAX_WALK_SPEED).contains(&speed) {
        Ok(speed)
    } else {
        Err(ConfigError::Invalid {
            field: "walk_speed",
            reason: format!("must be within 0..={}, got {}", MAX_WALK_SPEED, speed),
        })
    }
}
