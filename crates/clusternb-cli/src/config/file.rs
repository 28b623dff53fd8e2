use crate::error::Result;
use clusternb::workflows::evaluate::RunConfig;
use std::path::Path;
use tracing::debug;

/// The file layer on top of the built-in defaults.
pub fn load_run_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => {
            debug!("Loading run configuration from {:?}", path);
            Ok(RunConfig::load(path)?)
        }
        None => {
            debug!("No configuration file given; starting from defaults.");
            Ok(RunConfig::default())
        }
    }
}
