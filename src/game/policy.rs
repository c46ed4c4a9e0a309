//! Policies mapping an observation to an action

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::action::{Action, ActionSpace, ActionValue, ActionVariable};
use super::state::AgentState;

/// Jump cadence of the supply-gather policy, in time steps
pub const JUMP_INTERVAL: u64 = 60;

/// Maps one agent's observation to an action over the enabled channels
pub trait Policy {
    fn act(&mut self, state: &AgentState, space: &ActionSpace) -> Action;
}

impl<F> Policy for F
where
    F: FnMut(&AgentState, &ActionSpace) -> Action,
{
    fn act(&mut self, state: &AgentState, space: &ActionSpace) -> Action {
        self(state, space)
    }
}

/// Uniformly random controls
pub struct RandomPolicy {
    rng: ChaCha8Rng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn sample(&mut self, channel: ActionVariable) -> ActionValue {
        match channel {
            ActionVariable::WalkDir => ActionValue::Int(self.rng.gen_range(0..=360)),
            ActionVariable::WalkSpeed => ActionValue::Int(self.rng.gen_range(1..=10)),
            ActionVariable::TurnLrDelta | ActionVariable::LookUdDelta => {
                ActionValue::Int(self.rng.gen_range(-1..=1))
            }
            ActionVariable::Jump | ActionVariable::Pickup | ActionVariable::Attack => {
                ActionValue::Bool(self.rng.gen_bool(0.5))
            }
            ActionVariable::Reload => ActionValue::Bool(false),
        }
    }
}

impl Policy for RandomPolicy {
    fn act(&mut self, _state: &AgentState, space: &ActionSpace) -> Action {
        space.channels().iter().map(|&c| self.sample(c)).collect()
    }
}

/// Wander at a fixed speed, turning steadily and collecting everything in reach
pub struct SupplyGatherPolicy {
    rng: ChaCha8Rng,
    walk_speed: f64,
}

impl SupplyGatherPolicy {
    pub fn new(seed: u64, walk_speed: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            walk_speed,
        }
    }
}

impl Policy for SupplyGatherPolicy {
    fn act(&mut self, state: &AgentState, space: &ActionSpace) -> Action {
        let jump = state.time_step % JUMP_INTERVAL == 0;

        space
            .channels()
            .iter()
            .map(|channel| match channel {
                ActionVariable::WalkDir => ActionValue::Int(self.rng.gen_range(0..=360)),
                ActionVariable::WalkSpeed => ActionValue::Float(self.walk_speed),
                ActionVariable::Jump => ActionValue::Bool(jump),
                ActionVariable::TurnLrDelta => ActionValue::Int(1),
                ActionVariable::LookUdDelta => ActionValue::Int(0),
                ActionVariable::Pickup => ActionValue::Bool(true),
                ActionVariable::Attack | ActionVariable::Reload => ActionValue::Bool(false),
            })
            .collect()
    }
}
