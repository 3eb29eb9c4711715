//! Per-run staging areas on disk
//!
//! Every pipeline run works inside a uuid-named directory created under a
//! caller-supplied root. The area holds the raw blob downloads, the
//! flattened rootfs, and analyzer output, and is destroyed exactly once at
//! the end of the run regardless of outcome.

use crate::error::StagingError;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RAW_DIR: &str = "raw";
const ROOTFS_DIR: &str = "rootfs";
const OUTPUT_DIR: &str = "output";

/// A process-unique workspace for one analysis run.
#[derive(Debug, Clone)]
pub struct StagingArea {
    unpack_dir: PathBuf,
    raw_dir: PathBuf,
    rootfs_dir: PathBuf,
    output_dir: PathBuf,
}

impl StagingArea {
    /// Create a fresh staging area under `root`.
    ///
    /// `root` must already exist. The area's own directory name is a v4
    /// uuid, so concurrent runs sharing one root never collide. If
    /// directory creation fails partway the partial tree is left behind;
    /// holders of an area are expected to call `destroy` in that case too.
    pub fn create(root: &Path) -> Result<Self, StagingError> {
        if !root.is_dir() {
            return Err(StagingError::MissingRoot(root.to_path_buf()));
        }

        let unpack_dir = root.join(Uuid::new_v4().to_string());
        let area = Self {
            raw_dir: unpack_dir.join(RAW_DIR),
            rootfs_dir: unpack_dir.join(ROOTFS_DIR),
            output_dir: unpack_dir.join(OUTPUT_DIR),
            unpack_dir,
        };

        for dir in [
            &area.unpack_dir,
            &area.raw_dir,
            &area.rootfs_dir,
            &area.output_dir,
        ] {
            fs::create_dir_all(dir).map_err(|source| StagingError::Create {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(area)
    }

    /// Remove the entire staging tree. An already-absent tree is not an
    /// error, so teardown can run on every exit path.
    pub fn destroy(&self) -> Result<(), StagingError> {
        if !self.unpack_dir.exists() {
            return Ok(());
        }

        fs::remove_dir_all(&self.unpack_dir).map_err(|source| StagingError::Destroy {
            path: self.unpack_dir.clone(),
            source,
        })
    }

    /// The area's own root directory.
    pub fn unpack_dir(&self) -> &Path {
        &self.unpack_dir
    }

    /// Raw layer and config blob downloads land here.
    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Target directory for the flattened filesystem.
    pub fn rootfs_dir(&self) -> &Path {
        &self.rootfs_dir
    }

    /// Analyzer plugins write their output below this directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
