//! External process execution seam
//!
//! The pipeline shells out in three places: squashed-archive extraction,
//! analyzer plugins, and the skopeo-backed fetcher. All of them go through
//! the `ProcessRunner` trait so tests can script process behavior instead
//! of spawning real binaries.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs an external command to completion with captured output.
///
/// Spawn failures surface as `io::Error`. A non-zero exit is data in the
/// returned `ProcessOutput`; each call site decides whether it is fatal.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        command: &Path,
        args: &[String],
        workdir: Option<&Path>,
    ) -> io::Result<ProcessOutput>;
}

/// Production runner backed by tokio's process support. Stdin is never
/// inherited; both output streams are captured.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &Path,
        args: &[String],
        workdir: Option<&Path>,
    ) -> io::Result<ProcessOutput> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
