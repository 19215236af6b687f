//! Processor configuration, optionally read from the environment.
//!
//! Nothing here is global: the caller reads a [`Config`] once and passes it to
//! [`Processor::with_config`](crate::Processor::with_config).

use thiserror::Error;

use crate::features::Features;

/// Comma separated list of [`Features`] to enable.
pub const FEATURES_VAR: &str = "LC3SIM_FEATURES";
/// Upper bound on cycles for [`Processor::run`](crate::Processor::run).
pub const MAX_CYCLES_VAR: &str = "LC3SIM_MAX_CYCLES";

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("invalid LC3SIM_FEATURES: {0}")]
    Features(String),
    #[error("invalid LC3SIM_MAX_CYCLES '{0}', expected a non-negative integer")]
    MaxCycles(String),
    #[error("{0} is not valid unicode")]
    NotUnicode(&'static str),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub features: Features,
    /// Stop [`Processor::run`](crate::Processor::run) after this many instructions. Unbounded
    /// when `None`.
    pub max_cycles: Option<u64>,
}

impl Config {
    /// Defaults overridden by `LC3SIM_FEATURES` and `LC3SIM_MAX_CYCLES` when they are set.
    pub fn from_env() -> Result<Config, EnvError> {
        Config::from_vars(var(FEATURES_VAR)?, var(MAX_CYCLES_VAR)?)
    }

    fn from_vars(features: Option<String>, max_cycles: Option<String>) -> Result<Config, EnvError> {
        let features = match features {
            Some(list) => list.parse().map_err(EnvError::Features)?,
            None => Features::default(),
        };
        let max_cycles = match max_cycles {
            Some(limit) => Some(
                limit
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| EnvError::MaxCycles(limit))?,
            ),
            None => None,
        };
        Ok(Config {
            features,
            max_cycles,
        })
    }
}

fn var(name: &'static str) -> Result<Option<String>, EnvError> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(EnvError::NotUnicode(name)),
    }
}
