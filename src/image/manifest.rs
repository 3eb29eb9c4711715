//! Typed manifest wire formats and the parse boundary
//!
//! Registry manifests arrive as raw JSON. `Manifest::parse` probes the
//! schema version once, deserializes the matching typed shape, and checks
//! layer digests, so downstream stages never touch untyped JSON or decide
//! schema questions again.

use crate::error::ManifestError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SchemaProbe {
    #[serde(rename = "schemaVersion")]
    schema_version: Option<u64>,
}

/// A parsed and validated registry manifest.
#[derive(Debug, Clone)]
pub enum Manifest {
    V1(ManifestV1),
    V2(ManifestV2),
}

impl Manifest {
    /// Parse raw manifest JSON, branching on `schemaVersion`.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let probe: SchemaProbe = serde_json::from_str(raw).map_err(ManifestError::Json)?;

        let manifest = match probe.schema_version {
            None => return Err(ManifestError::MissingSchemaVersion),
            Some(1) => Manifest::V1(
                serde_json::from_str(raw)
                    .map_err(|source| ManifestError::Decode { schema: 1, source })?,
            ),
            Some(2) => Manifest::V2(
                serde_json::from_str(raw)
                    .map_err(|source| ManifestError::Decode { schema: 2, source })?,
            ),
            Some(other) => return Err(ManifestError::UnknownSchemaVersion(other)),
        };

        for digest in manifest.raw_layer_digests() {
            if !digest.contains(':') {
                return Err(ManifestError::InvalidLayerDigest(digest.to_string()));
            }
        }

        Ok(manifest)
    }

    pub fn schema_version(&self) -> u32 {
        match self {
            Manifest::V1(_) => 1,
            Manifest::V2(_) => 2,
        }
    }

    fn raw_layer_digests(&self) -> Vec<&str> {
        match self {
            Manifest::V1(m) => m.fs_layers.iter().map(|l| l.blob_sum.as_str()).collect(),
            Manifest::V2(m) => m.layers.iter().map(|l| l.digest.as_str()).collect(),
        }
    }
}

/// Schema 1 manifest. `fsLayers` and `history` are listed newest-first and
/// positionally paired.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV1 {
    pub schema_version: u64,
    #[serde(default)]
    pub architecture: String,
    pub fs_layers: Vec<FsLayer>,
    pub history: Vec<V1History>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1History {
    /// An embedded JSON document, parsed separately per entry.
    pub v1_compatibility: String,
}

/// The JSON document embedded in each `v1Compatibility` string. Field names
/// follow the legacy image JSON, `Size` included.
#[derive(Debug, Clone, Deserialize)]
pub struct V1Compatibility {
    pub created: String,
    pub container_config: ContainerConfig,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
}

/// Schema 2 manifest. `layers` are listed oldest-first; architecture and
/// build history live in the separate config blob.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV2 {
    pub schema_version: u64,
    #[serde(default)]
    pub media_type: String,
    pub config: LayerDescriptor,
    pub layers: Vec<LayerDescriptor>,
}

/// Content descriptor shared by the config reference and layer references.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: String,
}

/// The image config blob referenced by a schema 2 manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfigBlob {
    pub architecture: String,
    pub history: Vec<ConfigHistory>,
}

/// One build step recorded in the config blob.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigHistory {
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub empty_layer: bool,
}

impl ImageConfigBlob {
    /// Read the config blob the fetcher deposited. The file is named
    /// `<image_id>.tar` but holds a JSON document.
    pub fn read_from(path: &Path) -> Result<Self, ManifestError> {
        let raw = fs::read_to_string(path).map_err(|source| ManifestError::MissingConfig {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| ManifestError::ConfigDecode {
            path: path.to_path_buf(),
            source,
        })
    }
}
