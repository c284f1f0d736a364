//! Configuration: command line arguments and the optional TOML file.

pub mod cli_args;
pub mod plugin_config;
