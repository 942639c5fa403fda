//! Command Line Interface for fling
// (c) 2025 Ross Younger
mod args;
mod cli_main;
pub use cli_main::cli;
