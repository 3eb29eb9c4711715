//! Command line interface module
//!
//! This module provides the entry point for parsing command-line arguments and running the main workflow.
//! It includes argument parsing, validation, and the runner logic for analyzing Docker images.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
