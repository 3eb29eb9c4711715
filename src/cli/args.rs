//! Command-line argument parsing

use clap::Parser;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "docker-image-analyzer")]
#[command(about = "Squash and analyze container images fetched from registries")]
#[command(version)]
pub struct Args {
    /// Raw registry manifest for the image
    #[arg(
        long = "manifest-file",
        short = 'm',
        help = "Path to the raw manifest JSON document (schema 1 or 2)"
    )]
    pub manifest_file: String,

    /// Registry host
    #[arg(long = "registry", help = "Registry the image lives on")]
    pub registry: String,

    /// Repository within the registry
    #[arg(long = "repository", help = "Repository within the registry")]
    pub repository: String,

    /// Image tag
    #[arg(
        long = "tag",
        default_value = "latest",
        help = "Tag used for the human-readable image name"
    )]
    pub tag: String,

    /// Image digest
    #[arg(
        long = "digest",
        short = 'd',
        help = "Image digest (algo:hex) naming the exact content to pull"
    )]
    pub digest: String,

    /// Image id
    #[arg(
        long = "image-id",
        short = 'i',
        help = "Image id; also names the config blob for schema 2 manifests"
    )]
    pub image_id: String,

    /// Literal Dockerfile, when the caller has it
    #[arg(
        long = "dockerfile",
        help = "Path to the image's literal Dockerfile, when available"
    )]
    pub dockerfile: Option<String>,

    /// Staging root directory
    #[arg(
        long = "work-dir",
        short = 'w',
        help = "Root for per-run staging areas (defaults to the system temp dir)"
    )]
    pub work_dir: Option<String>,

    /// Analyzer plugin directory
    #[arg(
        long = "plugin-dir",
        default_value = "/usr/lib/docker-image-analyzer/analyzers",
        help = "Directory holding analyzer plugin executables"
    )]
    pub plugin_dir: String,

    /// Registry username
    #[arg(
        long = "username",
        short = 'u',
        help = "Username for registry authentication"
    )]
    pub username: Option<String>,

    /// Registry password
    #[arg(
        long = "password",
        short = 'p',
        help = "Password for registry authentication"
    )]
    pub password: Option<String>,

    /// Skip TLS verification
    #[arg(
        long = "skip-tls-verify",
        short = 'k',
        default_value = "false",
        help = "Skip TLS certificate verification when pulling"
    )]
    pub skip_tls_verify: bool,

    /// skopeo binary location
    #[arg(
        long = "skopeo-path",
        default_value = "skopeo",
        help = "skopeo binary used to pull image blobs"
    )]
    pub skopeo_path: String,

    /// Report destination
    #[arg(
        long = "output",
        short = 'o',
        help = "Write the report JSON to this file instead of stdout"
    )]
    pub output: Option<String>,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet output
    #[arg(
        long = "quiet",
        short = 'q',
        help = "Suppress everything except warnings and errors"
    )]
    pub quiet: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if !Path::new(&self.manifest_file).exists() {
            return Err(format!(
                "Manifest file does not exist: {}",
                self.manifest_file
            ));
        }

        if !self.digest.contains(':') {
            return Err("Image digest must carry an algorithm prefix (algo:hex)".to_string());
        }

        if let Some(work_dir) = &self.work_dir {
            if !Path::new(work_dir).is_dir() {
                return Err(format!("Work directory does not exist: {work_dir}"));
            }
        }

        if let Some(dockerfile) = &self.dockerfile {
            if !Path::new(dockerfile).exists() {
                return Err(format!("Dockerfile does not exist: {dockerfile}"));
            }
        }

        Ok(())
    }

    /// Load credentials from environment variables when flags are absent
    pub fn from_env(mut self) -> Self {
        if self.username.is_none() {
            self.username = std::env::var("ANALYZER_USERNAME").ok();
        }

        if self.password.is_none() {
            self.password = std::env::var("ANALYZER_PASSWORD").ok();
        }

        self
    }
}
