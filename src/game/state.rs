//! Per-agent observations reported by the engine

use serde::{Deserialize, Serialize};

/// Agent identifier; agent 0 always exists
pub type AgentId = u32;

/// A point in world space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<[f64; 3]> for Position {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Supply crate visible to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyState {
    pub position: Position,
    pub quantity: u32,
}

/// Enemy visible to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyState {
    pub position: Position,
    pub health: f32,
}

/// Depth image rendered from the agent's camera, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl DepthMap {
    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn is_consistent(&self) -> bool {
        self.width
            .checked_mul(self.height)
            .is_some_and(|n| n == self.data.len())
    }
}

/// Observation for one agent at one time step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Engine-defined game state code
    pub game_state: i32,
    pub time_step: u64,
    pub position: Position,
    #[serde(default)]
    pub supply_states: Vec<SupplyState>,
    #[serde(default)]
    pub enemy_states: Vec<EnemyState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_map: Option<DepthMap>,
    #[serde(default)]
    pub health: f32,
    /// Supplies collected so far this episode
    #[serde(default)]
    pub num_supply: u32,
}

impl AgentState {
    pub fn position(&self) -> Position {
        self.position
    }
}
