use thiserror::Error;

use super::config::ConfigError;
use crate::core::models::system::ModelError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Failed to allocate {what} for {count} elements")]
    Allocation { what: &'static str, count: usize },

    #[error("Free-energy dispatch was not set up for the current pairlists")]
    SetupMissing,

    #[error("Unsupported kernel combination: {0}")]
    UnsupportedKernel(String),

    #[error(
        "There are {count} perturbed excluded pair interactions beyond the pairlist cut-off; \
         this usually means the system is unstable"
    )]
    PerturbedExclusionBeyondCutoff { count: usize },

    #[error("Invalid particle data: {source}")]
    Model {
        #[from]
        source: ModelError,
    },

    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
}

impl EngineError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}

/// Fails with [`EngineError::Precondition`] unless `found == expected`.
pub(crate) fn check_length(what: &str, expected: usize, found: usize) -> Result<(), EngineError> {
    if expected == found {
        Ok(())
    } else {
        Err(EngineError::precondition(format!(
            "{what} has length {found}, expected {expected}"
        )))
    }
}
