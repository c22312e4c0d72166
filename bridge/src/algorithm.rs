use crate::constants::UNKNOWN_ALGORITHM_DIFFICULTY;
use crate::errors::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proof-of-work algorithms a session can be locked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Progpow,
    Sha256d,
    Randomx,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Progpow, Algorithm::Sha256d, Algorithm::Randomx];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Progpow => "progpow",
            Algorithm::Sha256d => "sha256d",
            Algorithm::Randomx => "randomx",
        }
    }

    /// Static share difficulty handed to every session on this algorithm
    pub fn difficulty(&self) -> f64 {
        difficulty_for_name(self.name())
    }

    /// Whether submissions carry a mix hash between header and nonce
    pub fn uses_mix_hash(&self) -> bool {
        matches!(self, Algorithm::Progpow)
    }

    /// Resolve the first `mining.subscribe` parameter.
    ///
    /// Miners send either a bare algorithm name or a user agent that starts with
    /// one (`progpow-veil`, `RandomX/1.0`), so only the leading token is matched.
    pub fn from_subscribe_param(param: &str) -> Result<Self, BridgeError> {
        let lowered = param.trim().to_ascii_lowercase();
        let token = lowered.split(['-', '/', '_', ' ']).next().unwrap_or_default();
        token.parse()
    }
}

impl FromStr for Algorithm {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "progpow" => Ok(Algorithm::Progpow),
            "sha256d" => Ok(Algorithm::Sha256d),
            "randomx" => Ok(Algorithm::Randomx),
            other => Err(BridgeError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Difficulty lookup by raw name; unknown names fall back to 0.01
pub fn difficulty_for_name(name: &str) -> f64 {
    match name.trim().to_ascii_lowercase().as_str() {
        "progpow" => 0.002,
        "sha256d" => 0.01,
        "randomx" => 0.005,
        _ => UNKNOWN_ALGORITHM_DIFFICULTY,
    }
}
