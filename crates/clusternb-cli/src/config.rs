//! Run configuration of the `evaluate` command, layered as
//! defaults → config file → command-line flags → `-S key=value`.

mod builder;
mod file;

pub use builder::build_config;
