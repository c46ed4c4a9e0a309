//! Step and run telemetry

pub mod stats;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::info;

use crate::game::action::{Action, ActionSpace, ActionValue, ActionVariable};
use crate::game::state::{AgentId, AgentState, Position};
use crate::util::time::step_rate;

pub use stats::StepStats;

/// Action values keyed by channel name, in channel order
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledAction(pub Vec<(ActionVariable, ActionValue)>);

impl Serialize for LabelledAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (channel, value) in &self.0 {
            map.serialize_entry(channel.name(), value)?;
        }
        map.end()
    }
}

/// What happened to one agent during one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub episode: u32,
    pub agent_id: AgentId,
    pub game_state: i32,
    pub time_step: u64,
    pub location: Position,
    pub action: LabelledAction,
    pub supplies_in_view: usize,
    pub enemies_in_view: usize,
    /// Steps per second implied by this step's round trip
    pub step_rate: u64,
    /// (rows, columns) of the depth image, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_map: Option<(usize, usize)>,
}

impl StepReport {
    pub fn new(
        episode: u32,
        agent_id: AgentId,
        state: &AgentState,
        space: &ActionSpace,
        action: &Action,
        dt: Duration,
    ) -> Self {
        Self {
            episode,
            agent_id,
            game_state: state.game_state,
            time_step: state.time_step,
            location: state.position(),
            action: LabelledAction(space.label(action)),
            supplies_in_view: state.supply_states.len(),
            enemies_in_view: state.enemy_states.len(),
            step_rate: step_rate(dt),
            depth_map: state.depth_map.as_ref().map(|d| d.shape()),
        }
    }

    pub fn log(&self) {
        let action = serde_json::to_string(&self.action).unwrap_or_default();
        info!(
            episode = self.episode,
            agent_id = self.agent_id,
            game_state = self.game_state,
            time_step = self.time_step,
            x = self.location.x,
            y = self.location.y,
            z = self.location.z,
            action = %action,
            supplies = self.supplies_in_view,
            enemies = self.enemies_in_view,
            step_rate = self.step_rate,
            depth_map = ?self.depth_map,
            "Step"
        );
    }
}

/// Outcome of one episode
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeReport {
    pub episode: u32,
    pub replay_suffix: String,
    pub config_hash: String,
    pub steps: u64,
    /// Stopped by the step cap before the engine finished the episode
    pub truncated: bool,
    pub duration_ms: u64,
    /// Longest single observe/act round trip
    pub slowest_step_ms: u64,
    pub throughput: f64,
    pub avg_step_rate: f64,
}

impl EpisodeReport {
    pub fn new(
        episode: u32,
        replay_suffix: String,
        config_hash: String,
        stats: &StepStats,
        truncated: bool,
    ) -> Self {
        Self {
            episode,
            replay_suffix,
            config_hash,
            steps: stats.steps,
            truncated,
            duration_ms: stats.total.as_millis() as u64,
            slowest_step_ms: stats.slowest.as_millis() as u64,
            throughput: stats.throughput(),
            avg_step_rate: stats.avg_step_rate,
        }
    }
}

/// Outcome of a whole invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub episodes: Vec<EpisodeReport>,
    /// Stopped by a shutdown signal before all episodes were played
    pub interrupted: bool,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            episodes: Vec::new(),
            interrupted: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn total_steps(&self) -> u64 {
        self.episodes.iter().map(|e| e.steps).sum()
    }
}
