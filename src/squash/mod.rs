//! Layer squashing: flattening an ordered layer stack into one tree
//!
//! Layers are processed top to bottom with two monotonically growing path
//! sets: `resolved` (paths already won by a higher layer) and `excluded`
//! (whiteout targets and opaque subtrees). Entries that survive are written
//! to a single squashed archive, which is then extracted onto the staging
//! rootfs by the external tar command through the process runner.

use crate::error::SquashError;
use crate::output::OutputManager;
use crate::process::ProcessRunner;
use crate::staging::StagingArea;
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType};

/// Prefix marking a whiteout entry in a layer archive.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Base name marking an opaque directory whiteout.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// Name of the squashed archive inside the unpack dir.
pub const SQUASHED_ARCHIVE: &str = "squashed.tar";

const SQUASHED_TMP: &str = "squashed_tmp.tar";

/// One layer to squash: its content digest and raw archive location.
#[derive(Debug, Clone)]
pub struct Layer {
    pub digest: String,
    pub archive_path: PathBuf,
}

impl Layer {
    /// Locate a layer's raw archive inside `raw_dir` by its digest. The
    /// fetcher deposits blobs named by the digest hex with a `.tar` suffix.
    pub fn from_digest(digest: &str, raw_dir: &Path) -> Self {
        let hex = match digest.split_once(':') {
            Some((_, hex)) => hex,
            None => digest,
        };

        Self {
            digest: digest.to_string(),
            archive_path: raw_dir.join(format!("{hex}.tar")),
        }
    }
}

/// How a layer entry participates in squashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryClass {
    /// Deletes one sibling path from strictly lower layers.
    Whiteout { target: String },
    /// Hides everything lower layers put under the directory.
    OpaqueDir { dir: String },
    Normal,
}

/// Strip the path spellings tar producers disagree on (`./` prefixes,
/// leading and trailing slashes) so bookkeeping sees one name per path.
pub fn normalize_entry_path(path: &str) -> String {
    let mut p = path.trim_start_matches("./");
    if p == "." {
        p = "";
    }
    p.trim_start_matches('/').trim_end_matches('/').to_string()
}

/// Classify a normalized entry path. Pure; no archive access.
pub fn classify_entry(path: &str) -> EntryClass {
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", path),
    };

    // the opaque marker also starts with the whiteout prefix
    if name == WHITEOUT_OPAQUE {
        return EntryClass::OpaqueDir {
            dir: dir.to_string(),
        };
    }

    if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
        let target = if target.is_empty() {
            // marker without a target name deletes nothing, but is still
            // a marker and never reaches the output
            String::new()
        } else if dir.is_empty() {
            target.to_string()
        } else {
            format!("{dir}/{target}")
        };
        return EntryClass::Whiteout { target };
    }

    EntryClass::Normal
}

#[derive(Default)]
struct SquashState {
    resolved: HashSet<String>,
    excluded: HashSet<String>,
}

impl SquashState {
    /// A path is excluded when it, or any ancestor directory, was whited
    /// out by a layer processed earlier.
    fn is_excluded(&self, path: &str) -> bool {
        if self.excluded.contains(path) || self.excluded.contains("") {
            return true;
        }

        for (idx, _) in path.match_indices('/') {
            if self.excluded.contains(&path[..idx]) {
                return true;
            }
        }

        false
    }
}

/// Flattens ordered layer stacks into a single squashed archive.
pub struct LayerSquasher {
    output: OutputManager,
}

impl LayerSquasher {
    pub fn new(output: OutputManager) -> Self {
        Self { output }
    }

    /// Squash `layers` (bottom→top order) into `squashed.tar` inside the
    /// area, extract it onto the rootfs, and return the archive byte size.
    ///
    /// When a squashed archive already exists the previous result is
    /// returned unchanged: no re-assembly, no second extraction.
    pub async fn squash(
        &self,
        area: &StagingArea,
        layers: &[Layer],
        runner: &dyn ProcessRunner,
    ) -> Result<u64, SquashError> {
        let squashed = area.unpack_dir().join(SQUASHED_ARCHIVE);
        if squashed.exists() {
            let size = archive_size(&squashed)?;
            self.output.detail(&format!(
                "squashed archive already present ({size} bytes), skipping"
            ));
            return Ok(size);
        }

        fs::create_dir_all(area.rootfs_dir()).map_err(|source| SquashError::Rootfs {
            path: area.rootfs_dir().to_path_buf(),
            source,
        })?;

        // assemble into a temp name so the idempotence check above never
        // observes a half-written archive
        let tmp = area.unpack_dir().join(SQUASHED_TMP);
        let task_output = self.output.clone();
        let task_tmp = tmp.clone();
        let task_layers = layers.to_vec();
        tokio::task::spawn_blocking(move || {
            assemble_squashed_archive(&task_output, &task_tmp, &task_layers)
        })
        .await
        .map_err(|source| SquashError::Assemble {
            path: tmp.clone(),
            source: io::Error::other(source),
        })??;

        fs::rename(&tmp, &squashed).map_err(|source| SquashError::Assemble {
            path: squashed.clone(),
            source,
        })?;

        self.extract_rootfs(area, &squashed, runner).await?;

        let size = archive_size(&squashed)?;
        self.output.debug(&format!(
            "squashed {} layers into {} bytes",
            layers.len(),
            size
        ));
        Ok(size)
    }

    /// Full permission-preserving extraction through the external tar
    /// command; failures carry the captured diagnostics.
    async fn extract_rootfs(
        &self,
        area: &StagingArea,
        squashed: &Path,
        runner: &dyn ProcessRunner,
    ) -> Result<(), SquashError> {
        let args = vec![
            "-C".to_string(),
            area.rootfs_dir().display().to_string(),
            "-x".to_string(),
            "-p".to_string(),
            "-f".to_string(),
            squashed.display().to_string(),
        ];

        self.output.step(&format!(
            "extracting squashed archive into {}",
            area.rootfs_dir().display()
        ));

        let result = runner
            .run(Path::new("tar"), &args, None)
            .await
            .map_err(SquashError::ExtractSpawn)?;

        if !result.success() {
            return Err(SquashError::Extract {
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        Ok(())
    }
}

fn archive_size(path: &Path) -> Result<u64, SquashError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|source| SquashError::Assemble {
            path: path.to_path_buf(),
            source,
        })
}

fn assemble_squashed_archive(
    output: &OutputManager,
    destination: &Path,
    layers: &[Layer],
) -> Result<(), SquashError> {
    let file = File::create(destination).map_err(|source| SquashError::Assemble {
        path: destination.to_path_buf(),
        source,
    })?;
    let mut builder = Builder::new(file);
    let mut state = SquashState::default();

    // top layer first; the first layer to touch a path wins
    for layer in layers.iter().rev() {
        apply_layer(output, &mut builder, destination, layer, &mut state)?;
    }

    builder
        .into_inner()
        .map_err(|source| SquashError::Assemble {
            path: destination.to_path_buf(),
            source,
        })?;

    Ok(())
}

fn apply_layer(
    output: &OutputManager,
    builder: &mut Builder<File>,
    destination: &Path,
    layer: &Layer,
    state: &mut SquashState,
) -> Result<(), SquashError> {
    output.detail(&format!("merging layer {}", layer.archive_path.display()));

    let layer_open = |source| SquashError::LayerOpen {
        path: layer.archive_path.clone(),
        source,
    };
    let gzipped = is_gzip(&layer.archive_path).map_err(layer_open)?;
    let file = File::open(&layer.archive_path).map_err(layer_open)?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut archive = Archive::new(reader);
    archive.set_ignore_zeros(true);

    let entries = archive.entries().map_err(|source| SquashError::LayerRead {
        path: layer.archive_path.clone(),
        source,
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|source| SquashError::LayerRead {
            path: layer.archive_path.clone(),
            source,
        })?;

        let path = {
            let raw = entry.path().map_err(|source| SquashError::LayerRead {
                path: layer.archive_path.clone(),
                source,
            })?;
            normalize_entry_path(&raw.to_string_lossy())
        };

        match classify_entry(&path) {
            EntryClass::Whiteout { target } => {
                // deletes from lower layers only; a higher layer's copy of
                // the target stays resolved
                if !target.is_empty() && !state.resolved.contains(&target) {
                    state.excluded.insert(target);
                }
            }
            EntryClass::OpaqueDir { dir } => {
                state.excluded.insert(dir);
            }
            EntryClass::Normal => {
                if path.is_empty() || state.resolved.contains(&path) || state.is_excluded(&path) {
                    continue;
                }

                append_entry(builder, &mut entry).map_err(|source| SquashError::Assemble {
                    path: destination.to_path_buf(),
                    source,
                })?;
                state.resolved.insert(path);
            }
        }
    }

    Ok(())
}

/// Copy one entry into the squashed archive, keeping its header metadata.
/// Link entries are re-encoded so long targets survive; everything else is
/// written with whatever content stream the entry supplies, which is empty
/// for non-regular entries.
fn append_entry<R: Read>(builder: &mut Builder<File>, entry: &mut tar::Entry<R>) -> io::Result<()> {
    let mut header = entry.header().clone();
    let path = entry.path()?.into_owned();

    match header.entry_type() {
        EntryType::Link | EntryType::Symlink => {
            let target = entry.link_name()?.ok_or_else(|| {
                io::Error::other(format!("link entry {} has no target", path.display()))
            })?;
            builder.append_link(&mut header, &path, &target)
        }
        _ => builder.append_data(&mut header, &path, entry),
    }
}

/// Layer blobs may be stored gzip-compressed; sniff the magic bytes.
fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];

    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == [0x1f, 0x8b]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
