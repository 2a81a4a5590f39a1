use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StandinError {
    #[error("unknown liveness state: {0}")]
    UnknownState(String),
}

// ─── Liveness State ───────────────────────────────────────────────

/// Who currently occupies the tracked service.
///
/// `Transitioning` is the only unsettled value: a debounced request is armed
/// and has not yet committed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessState {
    #[default]
    NoClient,
    RealActive,
    GhostActive,
    Transitioning,
}

impl LivenessState {
    pub const ALL: [Self; 4] = [
        Self::NoClient,
        Self::RealActive,
        Self::GhostActive,
        Self::Transitioning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoClient => "NO_CLIENT",
            Self::RealActive => "REAL_ACTIVE",
            Self::GhostActive => "GHOST_ACTIVE",
            Self::Transitioning => "TRANSITIONING",
        }
    }

    /// Settled states are the ones a transition may commit to.
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Transitioning)
    }
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LivenessState {
    type Err = StandinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "NO_CLIENT" => Ok(Self::NoClient),
            "REAL_ACTIVE" => Ok(Self::RealActive),
            "GHOST_ACTIVE" => Ok(Self::GhostActive),
            "TRANSITIONING" => Ok(Self::Transitioning),
            _ => Err(StandinError::UnknownState(s.to_string())),
        }
    }
}

// ─── Signal Origin ────────────────────────────────────────────────

/// Where a presence signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    /// A real client (browser tab, native beacon).
    Genuine,
    /// The stand-in agent itself. Never counts as presence.
    SelfOrigin,
}

impl SignalOrigin {
    pub fn is_self(self) -> bool {
        matches!(self, Self::SelfOrigin)
    }
}
