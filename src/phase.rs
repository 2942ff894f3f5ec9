use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One stage of the reflection flow. Declaration order is the flow order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Intro,
    Snapshot,
    EnergyMap,
    DeepStories,
    Patterns,
    Statement,
    Action,
    Completed,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Intro,
        Phase::Snapshot,
        Phase::EnergyMap,
        Phase::DeepStories,
        Phase::Patterns,
        Phase::Statement,
        Phase::Action,
        Phase::Completed,
    ];

    /// Number of phases a user actively works through (everything but `Completed`).
    pub const ACTIVE_COUNT: usize = 7;

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Intro => "intro",
            Phase::Snapshot => "snapshot",
            Phase::EnergyMap => "energy_map",
            Phase::DeepStories => "deep_stories",
            Phase::Patterns => "patterns",
            Phase::Statement => "statement",
            Phase::Action => "action",
            Phase::Completed => "completed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Intro => "Welcome",
            Phase::Snapshot => "Quick Snapshot",
            Phase::EnergyMap => "Energy Mapping",
            Phase::DeepStories => "Deep Stories",
            Phase::Patterns => "Patterns",
            Phase::Statement => "Your Why",
            Phase::Action => "Action Plan",
            Phase::Completed => "Complete",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// The phase that follows this one, `None` once the flow is complete.
    pub fn next(self) -> Option<Phase> {
        Phase::ALL.get(self.index() + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Completed
    }

    /// Position for a phase indicator: `(current index, number of active phases)`.
    pub fn progress(self) -> (usize, usize) {
        (self.index().min(Self::ACTIVE_COUNT), Self::ACTIVE_COUNT)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown phase '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}
