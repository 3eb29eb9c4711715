//! Docker image identity and manifest handling
//!
//! This module owns everything the pipeline knows about the image being
//! analyzed before its layers are touched: the caller-supplied identity
//! record, the typed manifest wire formats with their single parse
//! boundary, and the history adapters that normalize per-layer build
//! history across manifest schema versions.

pub mod history;
pub mod manifest;

pub use history::{DockerfileMode, HistoryEntry, ImageMetadata, resolve_history};
pub use manifest::{Manifest, ManifestV1, ManifestV2};

use serde::{Deserialize, Serialize};

/// Caller-supplied identity of the image to analyze.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_digest: String,
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub image_id: String,
    /// Literal Dockerfile content, base64-encoded, when the caller has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_mode: Option<DockerfileMode>,
}

impl ImageRecord {
    /// Content-addressed pull reference: `registry/repo@digest`.
    pub fn pull_string(&self) -> String {
        format!(
            "{}/{}@{}",
            self.registry, self.repository, self.image_digest
        )
    }

    /// Human-readable tag reference: `registry/repo:tag`.
    pub fn full_tag(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}
