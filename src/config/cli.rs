//! Command line flags for the episode driver

use std::num::NonZeroU32;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::game::action::ActionSpace;
use crate::game::config::{check_walk_speed, GameConfig, GameMode};
use crate::game::episode::RunOptions;
use crate::game::policy::{Policy, RandomPolicy, SupplyGatherPolicy};
use crate::game::state::Position;

use super::ConfigError;

/// Preset matching one of the stock driver setups
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Random policy over movement, view and jump channels
    Basic,
    /// Walk, jump every 60 steps and pick up everything in reach
    SupplyGather,
}

impl Scenario {
    fn default_mode(self) -> GameMode {
        match self {
            Self::Basic => GameMode::Navigation,
            Self::SupplyGather => GameMode::SupplyGather,
        }
    }

    fn default_map_dir(self) -> PathBuf {
        match self {
            Self::Basic => PathBuf::from("../map_data"),
            Self::SupplyGather => PathBuf::from("../data"),
        }
    }

    fn heatmap_radius(self) -> f64 {
        match self {
            Self::Basic => 30.0,
            Self::SupplyGather => 50.0,
        }
    }

    fn action_space(self) -> ActionSpace {
        match self {
            Self::Basic => ActionSpace::default(),
            Self::SupplyGather => ActionSpace::supply_gather(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "fps-agent-runner",
    about = "Drive agents through episodes of a remote FPS simulation",
    version
)]
pub struct Cli {
    /// Driver preset (game mode, action channels, policy)
    #[arg(long, value_enum, default_value_t = Scenario::Basic)]
    pub scenario: Scenario,

    /// Engine port
    #[arg(long, default_value_t = 50051)]
    pub port: u16,

    /// Engine host (overrides ENGINE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Episode timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u32,

    /// Game mode code: 0 navigation, 1 supply gather, 2 supply battle
    #[arg(long)]
    pub game_mode: Option<u8>,

    #[arg(long, default_value_t = 0)]
    pub random_seed: u64,

    #[arg(long, default_value_t = 1)]
    pub num_episodes: u32,

    #[arg(long, default_value_t = 1)]
    pub map_id: u32,

    /// Map data directory [default: ../map_data, or ../data for supply-gather]
    #[arg(long)]
    pub map_dir: Option<PathBuf>,

    #[arg(long, default_value = "../unity3d")]
    pub engine_dir: PathBuf,

    /// Ask the engine for depth images
    #[arg(long)]
    pub use_depth_map: bool,

    /// Let the engine pick a spawn point for every agent before each episode
    #[arg(long)]
    pub random_start_location: bool,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub num_agents: u32,

    /// Record replays
    #[arg(long)]
    pub record: bool,

    #[arg(long, default_value = "")]
    pub replay_suffix: String,

    #[arg(
        long,
        num_args = 3,
        value_names = ["X", "Y", "Z"],
        default_values_t = vec![0.0, 0.0, 0.0],
        allow_negative_numbers = true
    )]
    pub start_location: Vec<f64>,

    /// Navigation target; the engine default (5 0 5) applies when omitted
    #[arg(
        long,
        num_args = 3,
        value_names = ["X", "Y", "Z"],
        allow_negative_numbers = true
    )]
    pub target_location: Option<Vec<f64>>,

    /// Walk speed used by the supply-gather policy
    #[arg(long, default_value_t = 1.0)]
    pub walk_speed: f64,

    /// Stop an episode after this many steps even if the engine keeps going
    #[arg(long)]
    pub max_steps: Option<u64>,

    /// Cap on steps per second
    #[arg(long)]
    pub max_step_rate: Option<NonZeroU32>,

    /// Log step telemetry every N steps
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub log_every: u64,

    /// Connect to an engine that is already running
    #[arg(long)]
    pub no_launch: bool,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Build the session configuration described by the flags
    pub fn game_config(&self) -> Result<GameConfig, ConfigError> {
        let start = position("start_location", &self.start_location)?;
        let target = self
            .target_location
            .as_deref()
            .map(|coords| position("target_location", coords))
            .transpose()?;
        let mode = match self.game_mode {
            Some(code) => GameMode::try_from(code)?,
            None => self.scenario.default_mode(),
        };

        let mut config = GameConfig::default();
        config
            .set_game_mode(mode)
            .set_random_seed(self.random_seed)
            .set_supply_heatmap_center([start.x, start.z])
            .set_supply_heatmap_radius(self.scenario.heatmap_radius())
            .set_supply_indoor_richness(80)
            .set_supply_outdoor_richness(20)
            .set_supply_indoor_quantity_range(10, 50)
            .set_supply_outdoor_quantity_range(1, 5)
            .set_supply_spacing(5.0)
            .set_episode_timeout(self.timeout)
            .set_start_location(start)
            .set_available_actions(self.scenario.action_space())
            .set_map_id(self.map_id);

        if let Some(target) = target {
            config.set_target_location(target);
        }
        config.map_dir = self
            .map_dir
            .clone()
            .unwrap_or_else(|| self.scenario.default_map_dir());
        config.engine_dir = self.engine_dir.clone();
        config.server_port = self.port;

        for _ in 1..self.num_agents {
            config.add_agent();
        }
        if self.use_depth_map {
            config.turn_on_depth_map();
        }
        if self.record {
            config.turn_on_record();
        }

        config.validate()?;
        Ok(config)
    }

    /// Policy for the selected scenario
    pub fn policy(&self) -> Result<Box<dyn Policy>, ConfigError> {
        Ok(match self.scenario {
            Scenario::Basic => Box::new(RandomPolicy::new(self.random_seed)),
            Scenario::SupplyGather => Box::new(SupplyGatherPolicy::new(
                self.random_seed,
                check_walk_speed(self.walk_speed)?,
            )),
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            num_episodes: self.num_episodes,
            random_start_location: self.random_start_location,
            replay_suffix: self.replay_suffix.clone(),
            max_steps: self.max_steps,
            max_step_rate: self.max_step_rate,
            log_every: self.log_every,
        }
    }
}

fn position(field: &'static str, coords: &[f64]) -> Result<Position, ConfigError> {
    match coords {
        &[x, y, z] => Ok(Position::new(x, y, z)),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("expected 3 coordinates, got {}", coords.len()),
        }),
    }
}
