//! Error types for the image analysis pipeline
//!
//! Each pipeline component owns its own error enum with preserved causes.
//! The pipeline controller wraps component failures with the stage that
//! raised them and, when staging teardown also fails afterwards, carries
//! the teardown error as secondary context without losing the primary one.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-level result used by the pipeline and CLI surface.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Staging area lifecycle failures.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staging root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("failed to create staging directory {path}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove staging directory {path}")]
    Destroy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Image fetch failures: blob download or post-download layout.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to launch {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("image pull failed for {pull_string} (exit {exit_code:?}): {stderr}")]
    Download {
        pull_string: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("blob {path} does not match its digest: expected {expected}, computed {computed}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        computed: String,
    },

    #[error("failed to arrange fetched blobs under {dir}")]
    BlobLayout {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Manifest parsing and history resolution failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON")]
    Json(#[source] serde_json::Error),

    #[error("manifest carries no schemaVersion field")]
    MissingSchemaVersion,

    #[error("unsupported manifest schema version {0}")]
    UnknownSchemaVersion(u64),

    #[error("schema v{schema} manifest does not match its expected shape")]
    Decode {
        schema: u32,
        #[source]
        source: serde_json::Error,
    },

    #[error("embedded v1Compatibility record {index} is not valid JSON")]
    V1Compatibility {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("layer digest {0} carries no algorithm prefix")]
    InvalidLayerDigest(String),

    #[error("failed to read image config blob {path}")]
    MissingConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image config blob {path} does not match its expected shape")]
    ConfigDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config history references {non_empty} filesystem layers but the manifest lists {layers}")]
    HistoryLayerMismatch { non_empty: usize, layers: usize },

    #[error("dockerfile content in the image record is not valid base64")]
    DockerfileEncoding(#[from] base64::DecodeError),

    #[error("dockerfile content in the image record is not valid UTF-8")]
    DockerfileUtf8(#[from] std::string::FromUtf8Error),

    #[error("failed to write docker history to {path}")]
    HistoryFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Layer squash failures, from archive assembly through rootfs extraction.
#[derive(Debug, Error)]
pub enum SquashError {
    #[error("failed to prepare rootfs directory {path}")]
    Rootfs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open layer archive {path}")]
    LayerOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read entries from layer archive {path}")]
    LayerRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to assemble squashed archive {path}")]
    Assemble {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch the extraction command")]
    ExtractSpawn(#[source] io::Error),

    #[error("squashed archive extraction failed (exit {exit_code:?}): {stderr}")]
    Extract {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// Report assembly failures. Missing inputs are programming errors in the
/// caller, not runtime conditions.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("report builder is missing required input: {0}")]
    MissingInput(&'static str),
}

/// Union of the component errors a pipeline stage can raise.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Squash(#[from] SquashError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Top-level pipeline outcome errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("image analysis failed during {stage}")]
    Stage {
        stage: &'static str,
        #[source]
        source: StageError,
    },

    #[error("image analysis failed during {stage}; staging cleanup also failed: {cleanup}")]
    StageWithCleanup {
        stage: &'static str,
        #[source]
        source: StageError,
        cleanup: StagingError,
    },

    #[error("staging cleanup failed after analysis completed")]
    Cleanup(#[source] StagingError),

    #[error("analysis produced no image report")]
    NoReport,
}

impl PipelineError {
    /// Name of the stage that raised the primary failure, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            PipelineError::Stage { stage, .. } => Some(stage),
            PipelineError::StageWithCleanup { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
