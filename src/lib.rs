//! Docker Image Analyzer Library
//!
//! This file serves as the library root for the docker-image-analyzer crate,
//! organizing and exposing the various modules that make up the application.

pub mod analyzer;
pub mod cli;
pub mod digest;
pub mod error;
pub mod export;
pub mod fetch;
pub mod image;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod squash;
pub mod staging;

pub use error::{PipelineError, Result};
pub use export::ImageReport;
pub use output::OutputManager;
pub use pipeline::{AnalyzePipeline, PipelineConfig};
