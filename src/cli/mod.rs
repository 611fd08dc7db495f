//! Command line entry points

pub mod commands;
pub mod display;
pub mod docs;
pub mod pipeline;

pub use commands::{CliArgs, Commands, GlobalArgs};
