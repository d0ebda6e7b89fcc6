pub mod cli;
pub mod load_config;
pub mod package;

pub use cli::{run, Cli, Commands};
