//! Image fetching through skopeo
//!
//! The pipeline never speaks the registry protocol itself. A fetcher
//! collaborator downloads every manifest-referenced blob into the staging
//! raw dir; the production implementation delegates to the skopeo binary
//! through the process runner, then verifies each downloaded blob against
//! the digest in its file name before the squash engine touches it.

use crate::digest::DigestUtils;
use crate::error::FetchError;
use crate::output::OutputManager;
use crate::process::ProcessRunner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Login for one registry. `verify_tls` travels with the credential so a
/// private registry behind a self-signed certificate can opt out without
/// loosening every other registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCredential {
    pub registry: String,
    pub username: String,
    pub password: String,
    pub verify_tls: bool,
}

/// First credential whose registry matches exactly; `None` means the pull
/// proceeds anonymously.
pub fn credential_for<'a>(
    registry: &str,
    credentials: &'a [RegistryCredential],
) -> Option<&'a RegistryCredential> {
    credentials.iter().find(|c| c.registry == registry)
}

/// Downloads image blobs into a destination directory.
///
/// Contract: after a successful fetch the destination holds every layer
/// blob the manifest references as `<hex>.tar`, and for schema 2 images
/// also the config blob as `<image_id>.tar`.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(
        &self,
        pull_string: &str,
        dest_dir: &Path,
        credential: Option<&RegistryCredential>,
    ) -> Result<(), FetchError>;
}

/// Production fetcher shelling out to `skopeo copy` with the `dir:`
/// transport.
pub struct SkopeoFetcher {
    skopeo_path: PathBuf,
    /// TLS verification for anonymous pulls; authenticated pulls use the
    /// credential's own setting.
    verify_tls_default: bool,
    runner: Arc<dyn ProcessRunner>,
    output: OutputManager,
}

impl SkopeoFetcher {
    pub fn new(
        skopeo_path: PathBuf,
        verify_tls_default: bool,
        runner: Arc<dyn ProcessRunner>,
        output: OutputManager,
    ) -> Self {
        Self {
            skopeo_path,
            verify_tls_default,
            runner,
            output,
        }
    }
}

#[async_trait]
impl ImageFetcher for SkopeoFetcher {
    async fn fetch(
        &self,
        pull_string: &str,
        dest_dir: &Path,
        credential: Option<&RegistryCredential>,
    ) -> Result<(), FetchError> {
        let verify_tls = credential.map_or(self.verify_tls_default, |c| c.verify_tls);

        let mut args = vec!["copy".to_string(), format!("--src-tls-verify={verify_tls}")];
        match credential {
            Some(cred) => {
                self.output
                    .step(&format!("pulling {} as {}", pull_string, cred.username));
                args.push(format!("--src-creds={}:{}", cred.username, cred.password));
            }
            None => {
                self.output.step(&format!("pulling {pull_string} anonymously"));
            }
        }
        args.push(format!("docker://{pull_string}"));
        args.push(format!("dir:{}", dest_dir.display()));

        let result = self
            .runner
            .run(&self.skopeo_path, &args, None)
            .await
            .map_err(|source| FetchError::Spawn {
                command: self.skopeo_path.display().to_string(),
                source,
            })?;

        if !result.success() {
            return Err(FetchError::Download {
                pull_string: pull_string.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        // digest verification streams whole blobs, keep it off the runtime
        let dir = dest_dir.to_path_buf();
        let verified = tokio::task::spawn_blocking(move || arrange_blobs(&dir))
            .await
            .map_err(|source| FetchError::BlobLayout {
                dir: dest_dir.to_path_buf(),
                source: io::Error::other(source),
            })??;

        self.output.detail(&format!(
            "verified {verified} blobs under {}",
            dest_dir.display()
        ));
        Ok(())
    }
}

/// Skopeo's dir transport leaves each blob as a bare `<hex>` file next to
/// its own `manifest.json` and `version` bookkeeping. Verify every blob
/// against the digest in its name, then rename it into the `<hex>.tar`
/// layout the squash engine and history adapters read. Returns the number
/// of blobs handled.
fn arrange_blobs(dir: &Path) -> Result<usize, FetchError> {
    let layout = |source: io::Error| FetchError::BlobLayout {
        dir: dir.to_path_buf(),
        source,
    };

    let mut verified = 0;
    for entry in fs::read_dir(dir).map_err(layout)? {
        let entry = entry.map_err(layout)?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        // bookkeeping files keep their names; blobs are digest-named
        if !path.is_file() || !DigestUtils::is_valid_sha256_hex(&name) {
            continue;
        }

        let computed = DigestUtils::compute_sha256_file(&path).map_err(layout)?;
        if computed != name {
            return Err(FetchError::DigestMismatch {
                path,
                expected: name,
                computed,
            });
        }

        fs::rename(&path, dir.join(format!("{name}.tar"))).map_err(layout)?;
        verified += 1;
    }

    Ok(verified)
}
