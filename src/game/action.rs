//! Action channels, action spaces and per-step actions

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Control channels the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionVariable {
    /// Walking direction in degrees relative to the view
    WalkDir,
    /// Walking speed
    WalkSpeed,
    /// Horizontal view rotation delta
    TurnLrDelta,
    /// Vertical view rotation delta
    LookUdDelta,
    Jump,
    /// Collect supplies in reach
    Pickup,
    Attack,
    Reload,
}

/// Kind of value a channel accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Numeric,
    Toggle,
}

impl ActionVariable {
    pub const ALL: [ActionVariable; 8] = [
        ActionVariable::WalkDir,
        ActionVariable::WalkSpeed,
        ActionVariable::TurnLrDelta,
        ActionVariable::LookUdDelta,
        ActionVariable::Jump,
        ActionVariable::Pickup,
        ActionVariable::Attack,
        ActionVariable::Reload,
    ];

    pub fn kind(self) -> ChannelKind {
        match self {
            Self::WalkDir | Self::WalkSpeed | Self::TurnLrDelta | Self::LookUdDelta => {
                ChannelKind::Numeric
            }
            Self::Jump | Self::Pickup | Self::Attack | Self::Reload => ChannelKind::Toggle,
        }
    }

    /// Accepted range for numeric channels, if bounded
    pub fn range(self) -> Option<RangeInclusive<f64>> {
        match self {
            Self::WalkDir => Some(0.0..=360.0),
            Self::WalkSpeed => Some(0.0..=MAX_WALK_SPEED),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::WalkDir => "walk_dir",
            Self::WalkSpeed => "walk_speed",
            Self::TurnLrDelta => "turn_lr_delta",
            Self::LookUdDelta => "look_ud_delta",
            Self::Jump => "jump",
            Self::Pickup => "pickup",
            Self::Attack => "attack",
            Self::Reload => "reload",
        }
    }
}

impl fmt::Display for ActionVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fastest walk speed the engine accepts
pub const MAX_WALK_SPEED: f64 = 10.0;

/// A single control value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ActionValue {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(v as f64),
            Self::Float(v) => Some(v),
            Self::Bool(_) => None,
        }
    }

    fn fits(self, kind: ChannelKind) -> bool {
        matches!(
            (self, kind),
            (Self::Bool(_), ChannelKind::Toggle)
                | (Self::Int(_) | Self::Float(_), ChannelKind::Numeric)
        )
    }
}

impl fmt::Display for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ActionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ActionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ActionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// One agent's action for one step, ordered like the session's action space
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action {
    values: Vec<ActionValue>,
}

impl Action {
    pub fn new(values: Vec<ActionValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[ActionValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<ActionValue> for Action {
    fn from_iter<I: IntoIterator<Item = ActionValue>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Ordered set of channels enabled for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ActionVariable>", into = "Vec<ActionVariable>")]
pub struct ActionSpace {
    channels: Vec<ActionVariable>,
}

impl ActionSpace {
    pub fn new(channels: Vec<ActionVariable>) -> Result<Self, ActionError> {
        if channels.is_empty() {
            return Err(ActionError::EmptySpace);
        }
        for (i, channel) in channels.iter().enumerate() {
            if channels[..i].contains(channel) {
                return Err(ActionError::DuplicateChannel(*channel));
            }
        }
        Ok(Self { channels })
    }

    /// Movement, jump, view and pickup channels used for supply gathering
    pub fn supply_gather() -> Self {
        // Order matters: policies fill values channel by channel
        Self {
            channels: vec![
                ActionVariable::WalkDir,
                ActionVariable::WalkSpeed,
                ActionVariable::Jump,
                ActionVariable::TurnLrDelta,
                ActionVariable::LookUdDelta,
                ActionVariable::Pickup,
            ],
        }
    }

    pub fn channels(&self) -> &[ActionVariable] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn contains(&self, channel: ActionVariable) -> bool {
        self.channels.contains(&channel)
    }

    /// Verify an action matches this space position by position
    pub fn check(&self, action: &Action) -> Result<(), ActionError> {
        if action.len() != self.channels.len() {
            return Err(ActionError::WrongLength {
                expected: self.channels.len(),
                got: action.len(),
            });
        }

        for (&channel, &value) in self.channels.iter().zip(action.values()) {
            if !value.fits(channel.kind()) {
                return Err(ActionError::WrongKind { channel, value });
            }
            if let (Some(range), Some(v)) = (channel.range(), value.as_f64()) {
                if !range.contains(&v) {
                    return Err(ActionError::OutOfRange { channel, value });
                }
            }
        }

        Ok(())
    }

    /// Pair channel names with the values of an action
    pub fn label(&self, action: &Action) -> Vec<(ActionVariable, ActionValue)> {
        self.channels
            .iter()
            .copied()
            .zip(action.values().iter().copied())
            .collect()
    }
}

impl Default for ActionSpace {
    /// Movement and view channels plus jump
    fn default() -> Self {
        Self {
            channels: vec![
                ActionVariable::WalkDir,
                ActionVariable::WalkSpeed,
                ActionVariable::TurnLrDelta,
                ActionVariable::LookUdDelta,
                ActionVariable::Jump,
            ],
        }
    }
}

impl TryFrom<Vec<ActionVariable>> for ActionSpace {
    type Error = ActionError;

    fn try_from(channels: Vec<ActionVariable>) -> Result<Self, Self::Error> {
        Self::new(channels)
    }
}

impl From<ActionSpace> for Vec<ActionVariable> {
    fn from(space: ActionSpace) -> Self {
        space.channels
    }
}

/// Action validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("Action space must enable at least one channel")]
    EmptySpace,

    #[error("Channel {0} enabled more than once")]
    DuplicateChannel(ActionVariable),

    #[error("Action has {got} values but {expected} channels are enabled")]
    WrongLength { expected: usize, got: usize },

    #[error("Value {value} does not fit channel {channel}")]
    WrongKind {
        channel: ActionVariable,
        value: ActionValue,
    },

    #[error("Value {value} out of range for channel {channel}")]
    OutOfRange {
        channel: ActionVariable,
        value: ActionValue,
    },
}
