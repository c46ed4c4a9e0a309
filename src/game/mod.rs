//! Game-side model: configuration, observations, actions, policies and the episode loop

pub mod action;
pub mod config;
pub mod episode;
pub mod policy;
pub mod state;

pub use action::{Action, ActionSpace, ActionValue, ActionVariable};
pub use config::{GameConfig, GameMode};
pub use episode::{EpisodeRunner, RunError, RunOptions};
pub use policy::{Policy, RandomPolicy, SupplyGatherPolicy};
pub use state::{AgentId, AgentState, Position};
