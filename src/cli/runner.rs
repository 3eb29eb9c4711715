//! CLI runner wiring the production pipeline

use crate::cli::args::Args;
use crate::export::ImageReport;
use crate::fetch::{RegistryCredential, SkopeoFetcher};
use crate::image::ImageRecord;
use crate::output::OutputManager;
use crate::pipeline::{AnalyzePipeline, PipelineConfig};
use crate::process::TokioProcessRunner;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::error::Error;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

type RunResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub struct Runner {
    args: Args,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        // Create output manager based on args
        let output = if args.quiet {
            OutputManager::new_quiet()
        } else {
            OutputManager::new(args.verbose)
        };

        Self { args, output }
    }

    pub async fn run(&self) -> RunResult<()> {
        let start_time = Instant::now();

        self.output.section("Docker Image Analyzer");

        let record = self.build_record()?;
        let raw_manifest = fs::read_to_string(&self.args.manifest_file).map_err(|e| {
            io::Error::other(format!(
                "cannot read manifest file {}: {e}",
                self.args.manifest_file
            ))
        })?;

        self.output.info(&format!("Image: {}", record.pull_string()));
        self.output
            .info(&format!("Manifest: {}", self.args.manifest_file));

        let runner = Arc::new(TokioProcessRunner);
        let fetcher = SkopeoFetcher::new(
            PathBuf::from(&self.args.skopeo_path),
            !self.args.skip_tls_verify,
            runner.clone(),
            self.output.clone(),
        );
        let pipeline = AnalyzePipeline::new(
            PipelineConfig {
                staging_root: self.staging_root(),
                plugin_dir: PathBuf::from(&self.args.plugin_dir),
                credentials: self.credentials(),
            },
            Arc::new(fetcher),
            runner,
            self.output.clone(),
        );

        let report = pipeline.analyze(&raw_manifest, &record).await?;

        self.write_report(&report)?;

        self.output.summary(
            "Analysis summary",
            &[
                ("image", report.full_tag.clone()),
                ("size", self.output.format_size(report.size_bytes)),
                ("layers", report.layers.len().to_string()),
                ("analyzer modules", report.analysis_report.len().to_string()),
            ],
        );
        self.output.success(&format!(
            "Analysis completed in {}",
            self.output.format_duration(start_time.elapsed())
        ));

        Ok(())
    }

    /// The identity record handed to the pipeline. A literal Dockerfile,
    /// when supplied, travels base64-encoded inside the record.
    fn build_record(&self) -> RunResult<ImageRecord> {
        let dockerfile = match &self.args.dockerfile {
            Some(path) => {
                let contents = fs::read(path)
                    .map_err(|e| io::Error::other(format!("cannot read dockerfile {path}: {e}")))?;
                Some(BASE64.encode(contents))
            }
            None => None,
        };

        Ok(ImageRecord {
            image_digest: self.args.digest.clone(),
            registry: self.args.registry.clone(),
            repository: self.args.repository.clone(),
            tag: self.args.tag.clone(),
            image_id: self.args.image_id.clone(),
            dockerfile,
            dockerfile_mode: None,
        })
    }

    fn staging_root(&self) -> PathBuf {
        self.args
            .work_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    fn credentials(&self) -> Vec<RegistryCredential> {
        match (&self.args.username, &self.args.password) {
            (Some(username), Some(password)) => vec![RegistryCredential {
                registry: self.args.registry.clone(),
                username: username.clone(),
                password: password.clone(),
                verify_tls: !self.args.skip_tls_verify,
            }],
            _ => Vec::new(),
        }
    }

    fn write_report(&self, report: &ImageReport) -> RunResult<()> {
        let json = serde_json::to_string_pretty(report)?;

        match &self.args.output {
            Some(path) => {
                fs::write(path, &json).map_err(|e| {
                    io::Error::other(format!("cannot write report to {path}: {e}"))
                })?;
                self.output.info(&format!("Report written to {path}"));
            }
            None => println!("{json}"),
        }

        Ok(())
    }
}
