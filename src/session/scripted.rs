//! In-process session double that finishes episodes after a fixed number of steps

use std::collections::BTreeMap;

use crate::game::action::Action;
use crate::game::config::GameConfig;
use crate::game::state::{AgentId, AgentState, Position};

use super::{expect_phase, validate_actions, Session, SessionError, SessionPhase};

/// Calls observed by the double, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Init,
    NewEpisode { replay_suffix: String },
    GetStateAll,
    MakeAction(BTreeMap<AgentId, Action>),
    RandomStartLocation(AgentId),
    Close,
}

pub struct ScriptedSession {
    config: GameConfig,
    phase: SessionPhase,
    /// Steps per episode before the finished flag is raised
    episode_len: u64,
    time_step: u64,
    pub calls: Vec<Call>,
    /// Fail the get_state_all call with this index (0-based across the run)
    pub fail_state_at: Option<usize>,
    /// Report the episode finished in the reply of this get_state_all call
    pub finish_on_state_at: Option<usize>,
    state_calls: usize,
}

impl ScriptedSession {
    pub fn new(config: GameConfig, episode_len: u64) -> Self {
        Self {
            config,
            phase: SessionPhase::Created,
            episode_len,
            time_step: 0,
            calls: Vec::new(),
            fail_state_at: None,
            finish_on_state_at: None,
            state_calls: 0,
        }
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn state_for(&self, agent_id: AgentId) -> AgentState {
        AgentState {
            game_state: 1,
            time_step: self.time_step,
            position: Position::new(agent_id as f64, 0.0, self.time_step as f64),
            supply_states: vec![],
            enemy_states: vec![],
            depth_map: None,
            health: 100.0,
            num_supply: 0,
        }
    }
}

impl Session for ScriptedSession {
    fn config(&self) -> &GameConfig {
        &self.config
    }

    fn config_mut(&mut self) -> Result<&mut GameConfig, SessionError> {
        expect_phase(
            "configure",
            self.phase,
            &[SessionPhase::Created, SessionPhase::Ready, SessionPhase::Finished],
        )?;
        Ok(&mut self.config)
    }

    fn phase(&self) -> SessionPhase {
        self.phase
    }

    async fn init(&mut self) -> Result<(), SessionError> {
        expect_phase("init", self.phase, &[SessionPhase::Created])?;
        self.calls.push(Call::Init);
        self.phase = SessionPhase::Ready;
        Ok(())
    }

    async fn new_episode(&mut self) -> Result<(), SessionError> {
        expect_phase(
            "new_episode",
            self.phase,
            &[SessionPhase::Ready, SessionPhase::Finished],
        )?;
        self.calls.push(Call::NewEpisode {
            replay_suffix: self.config.replay_suffix.clone(),
        });
        self.time_step = 0;
        self.phase = if self.episode_len == 0 {
            SessionPhase::Finished
        } else {
            SessionPhase::InEpisode
        };
        Ok(())
    }

    async fn get_state_all(&mut self) -> Result<BTreeMap<AgentId, AgentState>, SessionError> {
        expect_phase(
            "get_state_all",
            self.phase,
            &[SessionPhase::InEpisode, SessionPhase::Finished],
        )?;
        self.calls.push(Call::GetStateAll);
        let index = self.state_calls;
        self.state_calls += 1;
        if self.fail_state_at == Some(index) {
            return Err(SessionError::Disconnected);
        }
        if self.finish_on_state_at == Some(index) {
            self.phase = SessionPhase::Finished;
        }
        Ok(self
            .config
            .agent_ids()
            .map(|id| (id, self.state_for(id)))
            .collect())
    }

    async fn make_action(
        &mut self,
        actions: &BTreeMap<AgentId, Action>,
    ) -> Result<(), SessionError> {
        expect_phase("make_action", self.phase, &[SessionPhase::InEpisode])?;
        validate_actions(&self.config, actions)?;
        self.calls.push(Call::MakeAction(actions.clone()));
        self.time_step += 1;
        if self.time_step >= self.episode_len {
            self.phase = SessionPhase::Finished;
        }
        Ok(())
    }

    fn abandon_episode(&mut self) {
        if self.phase == SessionPhase::InEpisode {
            self.phase = SessionPhase::Finished;
        }
    }

    async fn random_start_location(
        &mut self,
        agent_id: AgentId,
    ) -> Result<Position, SessionError> {
        expect_phase(
            "random_start_location",
            self.phase,
            &[SessionPhase::Ready, SessionPhase::Finished],
        )?;
        self.calls.push(Call::RandomStartLocation(agent_id));
        let location = Position::new(10.0 * agent_id as f64, 0.0, -10.0);
        self.config
            .set_agent_start_location(agent_id, location)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(location)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Closed {
            self.calls.push(Call::Close);
            self.phase = SessionPhase::Closed;
        }
        Ok(())
    }
}
