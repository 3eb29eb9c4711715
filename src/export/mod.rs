//! Final report assembly
//!
//! Pure data transform at the end of the pipeline: identity fields, the
//! normalized history, the squashed size, and analyzer findings fold into
//! one serializable `ImageReport`. Missing required inputs are caller bugs
//! surfaced as `ExportError`, not runtime conditions; there is no I/O here.

use crate::analyzer::AnalyzerFindings;
use crate::error::ExportError;
use crate::image::ImageRecord;
use crate::image::history::{DockerfileMode, HistoryEntry, ImageMetadata};
use serde::{Deserialize, Serialize};

const SHORT_ID_LEN: usize = 12;

/// The terminal artifact of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReport {
    pub image_id: String,
    pub image_digest: String,
    /// First 12 characters of the image id.
    pub short_id: String,
    /// Size of the squashed filesystem archive in bytes.
    pub size_bytes: u64,
    pub full_tag: String,
    /// Content-addressed pull reference the layers came from.
    pub repo_digest: String,
    pub architecture: String,
    pub dockerfile_mode: DockerfileMode,
    pub dockerfile_contents: String,
    pub docker_history: Vec<HistoryEntry>,
    /// Layer digests bottom→top, as squashed.
    pub layers: Vec<String>,
    /// Mirrors `layers` until ancestry tracking extends it.
    pub familytree: Vec<String>,
    pub analysis_report: AnalyzerFindings,
}

/// Assembles an `ImageReport` from the pipeline's stage outputs.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    record: Option<ImageRecord>,
    metadata: Option<ImageMetadata>,
    size_bytes: Option<u64>,
    findings: Option<AnalyzerFindings>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, record: ImageRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    /// Findings are optional; a run with no analyzer output reports an
    /// empty map.
    pub fn with_findings(mut self, findings: AnalyzerFindings) -> Self {
        self.findings = Some(findings);
        self
    }

    pub fn build(self) -> Result<ImageReport, ExportError> {
        let record = self.record.ok_or(ExportError::MissingInput("image record"))?;
        let metadata = self
            .metadata
            .ok_or(ExportError::MissingInput("image metadata"))?;
        let size_bytes = self
            .size_bytes
            .ok_or(ExportError::MissingInput("image size"))?;

        Ok(ImageReport {
            short_id: record.image_id.chars().take(SHORT_ID_LEN).collect(),
            full_tag: record.full_tag(),
            repo_digest: record.pull_string(),
            image_id: record.image_id,
            image_digest: record.image_digest,
            size_bytes,
            architecture: metadata.architecture,
            dockerfile_mode: metadata.dockerfile_mode,
            dockerfile_contents: metadata.dockerfile_contents,
            docker_history: metadata.history,
            familytree: metadata.layers.clone(),
            layers: metadata.layers,
            analysis_report: self.findings.unwrap_or_default(),
        })
    }
}
