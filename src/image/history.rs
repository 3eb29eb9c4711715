//! Per-layer build history, normalized across manifest schemas
//!
//! Schema v1 embeds history as positional `v1Compatibility` JSON strings
//! listed newest-first; schema v2 keeps history in the config blob listed
//! oldest-first, with `empty_layer` markers for steps that produced no
//! filesystem layer. Both adapters emit layers and history bottom→top so
//! every later stage sees a single convention, and both persist the
//! normalized history into the staging area.

use crate::error::ManifestError;
use crate::image::ImageRecord;
use crate::image::manifest::{ImageConfigBlob, Manifest, ManifestV1, ManifestV2, V1Compatibility};
use crate::staging::StagingArea;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fs;

/// File the normalized history is persisted to inside the unpack dir.
pub const HISTORY_FILE: &str = "docker_history.json";

/// Prefix docker puts in front of non-RUN instructions it records.
const NOP_MARKER: &str = "/bin/sh -c #(nop) ";

/// One normalized build step, serialized with docker's history field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "Created")]
    pub created: String,
    #[serde(rename = "CreatedBy")]
    pub created_by: String,
    #[serde(rename = "Comment")]
    pub comment: String,
    /// Digest of the filesystem layer this step produced; `None` for steps
    /// that changed only image metadata.
    #[serde(rename = "Id")]
    pub layer_id: Option<String>,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
}

/// Where the Dockerfile text in a report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DockerfileMode {
    /// Synthesized from image history.
    Guessed,
    /// Supplied literally by the caller.
    Actual,
}

/// Adapter output: everything later stages need from manifest plus record.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    /// Build history, oldest step first.
    pub history: Vec<HistoryEntry>,
    /// Layer digests, bottom (oldest) to top.
    pub layers: Vec<String>,
    pub dockerfile_contents: String,
    pub dockerfile_mode: DockerfileMode,
    pub architecture: String,
}

/// Resolve history, layers, architecture, and Dockerfile for the manifest's
/// schema, then persist the normalized history into the staging area.
pub fn resolve_history(
    area: &StagingArea,
    manifest: &Manifest,
    record: &ImageRecord,
) -> Result<ImageMetadata, ManifestError> {
    let metadata = match manifest {
        Manifest::V1(m) => from_schema_v1(m, record)?,
        Manifest::V2(m) => from_schema_v2(area, m, record)?,
    };

    write_history_file(area, &metadata.history)?;
    Ok(metadata)
}

fn from_schema_v1(
    manifest: &ManifestV1,
    record: &ImageRecord,
) -> Result<ImageMetadata, ManifestError> {
    if manifest.history.len() != manifest.fs_layers.len() {
        return Err(ManifestError::HistoryLayerMismatch {
            non_empty: manifest.history.len(),
            layers: manifest.fs_layers.len(),
        });
    }

    let mut history = Vec::with_capacity(manifest.history.len());
    for (index, entry) in manifest.history.iter().enumerate() {
        let compat: V1Compatibility = serde_json::from_str(&entry.v1_compatibility)
            .map_err(|source| ManifestError::V1Compatibility { index, source })?;

        let created_by = match &compat.container_config.cmd {
            Some(cmd) => cmd.join(" "),
            None => String::new(),
        };

        history.push(HistoryEntry {
            created: compat.created,
            created_by,
            comment: compat.comment,
            layer_id: Some(manifest.fs_layers[index].blob_sum.clone()),
            size: compat.size,
            tags: Vec::new(),
        });
    }

    let mut layers: Vec<String> = manifest
        .fs_layers
        .iter()
        .map(|l| l.blob_sum.clone())
        .collect();

    // wire order is newest-first; flip both lists in lock-step to bottom→top
    layers.reverse();
    history.reverse();

    let (dockerfile_contents, dockerfile_mode) = resolve_dockerfile(record, &history)?;

    Ok(ImageMetadata {
        history,
        layers,
        dockerfile_contents,
        dockerfile_mode,
        architecture: manifest.architecture.clone(),
    })
}

fn from_schema_v2(
    area: &StagingArea,
    manifest: &ManifestV2,
    record: &ImageRecord,
) -> Result<ImageMetadata, ManifestError> {
    let config_path = area.raw_dir().join(format!("{}.tar", record.image_id));
    let config = ImageConfigBlob::read_from(&config_path)?;

    let non_empty = config.history.iter().filter(|h| !h.empty_layer).count();
    let mut layer_cursor = manifest.layers.iter();
    let mut history = Vec::with_capacity(config.history.len());

    for step in &config.history {
        let (layer_id, size) = if step.empty_layer {
            (None, 0)
        } else {
            match layer_cursor.next() {
                Some(descriptor) => (Some(descriptor.digest.clone()), descriptor.size),
                None => {
                    return Err(ManifestError::HistoryLayerMismatch {
                        non_empty,
                        layers: manifest.layers.len(),
                    });
                }
            }
        };

        history.push(HistoryEntry {
            created: step.created.clone(),
            created_by: step.created_by.clone(),
            comment: step.comment.clone(),
            layer_id,
            size,
            tags: Vec::new(),
        });
    }

    if layer_cursor.next().is_some() {
        return Err(ManifestError::HistoryLayerMismatch {
            non_empty,
            layers: manifest.layers.len(),
        });
    }

    let layers: Vec<String> = manifest.layers.iter().map(|l| l.digest.clone()).collect();
    let (dockerfile_contents, dockerfile_mode) = resolve_dockerfile(record, &history)?;

    Ok(ImageMetadata {
        history,
        layers,
        dockerfile_contents,
        dockerfile_mode,
        architecture: config.architecture,
    })
}

/// Dockerfile text and provenance: literal content from the record wins,
/// otherwise one is synthesized from history.
fn resolve_dockerfile(
    record: &ImageRecord,
    history: &[HistoryEntry],
) -> Result<(String, DockerfileMode), ManifestError> {
    match &record.dockerfile {
        Some(encoded) => {
            let bytes = BASE64.decode(encoded)?;
            let contents = String::from_utf8(bytes)?;
            let mode = record.dockerfile_mode.unwrap_or(DockerfileMode::Actual);
            Ok((contents, mode))
        }
        None => Ok((synthesize_dockerfile(history), DockerfileMode::Guessed)),
    }
}

/// Reconstruct an approximate Dockerfile from history, oldest step first.
/// Steps docker recorded through its no-op marker carry the original
/// instruction verbatim; everything else becomes a RUN line.
pub fn synthesize_dockerfile(history: &[HistoryEntry]) -> String {
    let mut dockerfile = String::from("FROM scratch\n");

    for entry in history {
        match entry.created_by.strip_prefix(NOP_MARKER) {
            Some(instruction) => {
                dockerfile.push_str(instruction.trim_start());
                dockerfile.push('\n');
            }
            None => {
                dockerfile.push_str("RUN ");
                dockerfile.push_str(&entry.created_by);
                dockerfile.push('\n');
            }
        }
    }

    dockerfile
}

fn write_history_file(
    area: &StagingArea,
    history: &[HistoryEntry],
) -> Result<(), ManifestError> {
    let path = area.unpack_dir().join(HISTORY_FILE);
    let json = serde_json::to_vec_pretty(history).map_err(|source| ManifestError::HistoryFile {
        path: path.clone(),
        source: source.into(),
    })?;

    fs::write(&path, json).map_err(|source| ManifestError::HistoryFile { path, source })
}
