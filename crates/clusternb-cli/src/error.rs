use clusternb::core::forcefield::params::ParamLoadError;
use clusternb::core::systems::WaterBoxError;
use clusternb::engine::error::EngineError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ParamLoadError),

    #[error("Failed to build the water box: {0}")]
    System(#[from] WaterBoxError),

    #[error("Failed to write forces to '{path}': {source}", path = path.display())]
    ForcesOutput {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
