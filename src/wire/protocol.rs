//! Engine protocol message definitions
//! These are the wire types exchanged with the engine, one JSON object per line
//!
//! Per-agent data travels as lists of `{agent_id, ...}` records rather than
//! maps keyed by agent id: integer map keys do not survive internally tagged
//! enum decoding in serde.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::action::Action;
use crate::game::config::GameConfig;
use crate::game::state::{AgentId, AgentState, Position};

/// One agent's action inside a step request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub agent_id: AgentId,
    pub action: Action,
}

/// One agent's observation inside a states reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentObservation {
    pub agent_id: AgentId,
    pub state: AgentState,
}

/// Pack per-agent actions in agent order
pub fn encode_actions(actions: &BTreeMap<AgentId, Action>) -> Vec<AgentAction> {
    actions
        .iter()
        .map(|(&agent_id, action)| AgentAction {
            agent_id,
            action: action.clone(),
        })
        .collect()
}

/// Requests sent from the driver to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Open a session with the initial configuration
    Init {
        session_id: Uuid,
        config: GameConfig,
    },

    /// Reset the world and start an episode with the given configuration
    NewEpisode { config: GameConfig },

    /// Fetch observations for every active agent
    GetStateAll,

    /// Submit one action per agent for the current step
    MakeAction { actions: Vec<AgentAction> },

    /// Ask the engine for a valid random spawn point
    RandomStartLocation { agent_id: AgentId },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// End the session
    Close,
}

impl ClientMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::NewEpisode { .. } => "new_episode",
            Self::GetStateAll => "get_state_all",
            Self::MakeAction { .. } => "make_action",
            Self::RandomStartLocation { .. } => "random_start_location",
            Self::Ping { .. } => "ping",
            Self::Close => "close",
        }
    }
}

/// Replies sent from the engine to the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Session accepted
    Ready {
        server_time: u64,
        #[serde(default)]
        engine_version: String,
    },

    /// Episode reset done
    EpisodeStarted { episode: u64 },

    /// Observations for every active agent
    States {
        states: Vec<AgentObservation>,
        /// Episode already over
        finished: bool,
    },

    /// Actions applied
    Stepped { time_step: u64, finished: bool },

    /// Spawn point chosen by the engine
    StartLocation {
        agent_id: AgentId,
        location: Position,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },

    /// Session closed
    Closed,

    /// Error message
    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::EpisodeStarted { .. } => "episode_started",
            Self::States { .. } => "states",
            Self::Stepped { .. } => "stepped",
            Self::StartLocation { .. } => "start_location",
            Self::Pong { .. } => "pong",
            Self::Closed => "closed",
            Self::Error { .. } => "error",
        }
    }
}
