//! Session handles: the driver's view of one engine run

pub mod remote;

#[cfg(test)]
pub(crate) mod scripted;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::time::Duration;

use crate::game::action::{Action, ActionError};
use crate::game::config::GameConfig;
use crate::game::state::{AgentId, AgentState, Position};

pub use remote::RemoteSession;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected, not yet initialized
    Created,
    /// Initialized, no episode running
    Ready,
    /// Episode running
    InEpisode,
    /// Engine reported the episode over
    Finished,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::InEpisode => "in_episode",
            Self::Finished => "finished",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A remote simulation run, exclusively owned by the driver
///
/// Every async operation is one blocking round trip to the engine. The
/// configuration can only be changed between episodes.
#[allow(async_fn_in_trait)]
pub trait Session {
    fn config(&self) -> &GameConfig;

    /// Mutable configuration; fails while an episode is running
    fn config_mut(&mut self) -> Result<&mut GameConfig, SessionError>;

    fn phase(&self) -> SessionPhase;

    fn is_episode_finished(&self) -> bool {
        self.phase() != SessionPhase::InEpisode
    }

    /// Hand the configuration to the engine
    async fn init(&mut self) -> Result<(), SessionError>;

    async fn new_episode(&mut self) -> Result<(), SessionError>;

    /// Observations for every active agent
    async fn get_state_all(&mut self) -> Result<BTreeMap<AgentId, AgentState>, SessionError>;

    /// Submit one action per active agent for the current step
    async fn make_action(&mut self, actions: &BTreeMap<AgentId, Action>)
        -> Result<(), SessionError>;

    /// Stop stepping a running episode without waiting for the engine to end it
    ///
    /// Local only: the engine resets the world on the next `new_episode`.
    fn abandon_episode(&mut self);

    /// Let the engine choose a spawn point for an agent; stored in the config
    async fn random_start_location(&mut self, agent_id: AgentId)
        -> Result<Position, SessionError>;

    /// Release the session; closing twice is a no-op
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Fail unless the session is in one of the allowed phases
pub fn expect_phase(
    op: &'static str,
    phase: SessionPhase,
    allowed: &[SessionPhase],
) -> Result<(), SessionError> {
    if allowed.contains(&phase) {
        Ok(())
    } else {
        Err(SessionError::InvalidState { op, phase })
    }
}

/// Check a step submission only names configured agents and every action fits the action space
///
/// Agents the engine no longer reports (e.g. eliminated ones) may be left out.
pub fn validate_actions(
    config: &GameConfig,
    actions: &BTreeMap<AgentId, Action>,
) -> Result<(), SessionError> {
    if actions.is_empty() {
        return Err(SessionError::NoActions);
    }

    for (&agent_id, action) in actions {
        if agent_id as usize >= config.num_agents() {
            return Err(SessionError::UnknownAgent(agent_id));
        }
        config
            .available_actions
            .check(action)
            .map_err(|source| SessionError::InvalidAction { agent_id, source })?;
    }

    Ok(())
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Could not connect to engine at {addr} within {waited:?}: {source}")]
    Connect {
        addr: String,
        waited: Duration,
        #[source]
        source: io::Error,
    },

    #[error("Engine I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed engine message: {0}")]
    Protocol(String),

    #[error("Expected {expected} reply, engine sent {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Engine error {code}: {message}")]
    Engine { code: String, message: String },

    #[error("Engine did not answer {op} within {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Engine closed the connection")]
    Disconnected,

    #[error("Cannot {op} while session is {phase}")]
    InvalidState {
        op: &'static str,
        phase: SessionPhase,
    },

    #[error("Step submitted without any actions")]
    NoActions,

    #[error("Action for unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("Invalid action for agent {agent_id}: {source}")]
    InvalidAction {
        agent_id: AgentId,
        #[source]
        source: ActionError,
    },
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
