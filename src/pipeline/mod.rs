//! Pipeline controller
//!
//! Sequences one analysis run: stage, fetch, resolve history, squash,
//! analyze, export. The staging area is torn down exactly once on every
//! exit path; a teardown failure never displaces a primary stage failure,
//! it rides along as secondary context instead.

use crate::analyzer::AnalyzerOrchestrator;
use crate::error::{PipelineError, Result, StageError, StagingError};
use crate::export::{ImageReport, ReportBuilder};
use crate::fetch::{ImageFetcher, RegistryCredential, credential_for};
use crate::image::{ImageRecord, Manifest, resolve_history};
use crate::output::OutputManager;
use crate::process::ProcessRunner;
use crate::squash::{Layer, LayerSquasher};
use crate::staging::StagingArea;
use std::path::PathBuf;
use std::sync::Arc;

const STAGE_STAGING: &str = "staging";
const STAGE_FETCH: &str = "image fetch";
const STAGE_HISTORY: &str = "history resolution";
const STAGE_SQUASH: &str = "layer squash";
const STAGE_EXPORT: &str = "report export";

/// Per-instance pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Staging areas are created under this root; it must already exist.
    pub staging_root: PathBuf,
    /// Analyzer plugin executables are discovered here.
    pub plugin_dir: PathBuf,
    /// Registry credentials, matched by exact registry name.
    pub credentials: Vec<RegistryCredential>,
}

/// One-image analysis pipeline. Independent instances may run concurrently
/// against the same staging root; uuid-named areas keep them disjoint.
pub struct AnalyzePipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn ImageFetcher>,
    runner: Arc<dyn ProcessRunner>,
    output: OutputManager,
}

/// A stage failure paired with the name of the stage that raised it.
type StageResult<T> = std::result::Result<T, (&'static str, StageError)>;

impl AnalyzePipeline {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn ImageFetcher>,
        runner: Arc<dyn ProcessRunner>,
        output: OutputManager,
    ) -> Self {
        Self {
            config,
            fetcher,
            runner,
            output,
        }
    }

    /// Analyze one image described by its raw manifest and identity record.
    ///
    /// Every stage failure is fatal to the run; analyzer plugin failures
    /// are the only tolerated exception and merely thin out the findings.
    pub async fn analyze(&self, raw_manifest: &str, record: &ImageRecord) -> Result<ImageReport> {
        self.output
            .section(&format!("Analyzing {}", record.pull_string()));

        let area =
            StagingArea::create(&self.config.staging_root).map_err(|source| PipelineError::Stage {
                stage: STAGE_STAGING,
                source: source.into(),
            })?;
        self.output
            .detail(&format!("staging area {}", area.unpack_dir().display()));

        let mut report = None;
        let run = self
            .run_stages(&area, raw_manifest, record, &mut report)
            .await;
        let cleanup = area.destroy();

        finish_run(run, cleanup, report)
    }

    async fn run_stages(
        &self,
        area: &StagingArea,
        raw_manifest: &str,
        record: &ImageRecord,
        report: &mut Option<ImageReport>,
    ) -> StageResult<()> {
        self.output.subsection("Fetching image");
        let pull_string = record.pull_string();
        let credential = credential_for(&record.registry, &self.config.credentials);
        self.fetcher
            .fetch(&pull_string, area.raw_dir(), credential)
            .await
            .map_err(|e| (STAGE_FETCH, e.into()))?;

        self.output.subsection("Resolving manifest history");
        let manifest = Manifest::parse(raw_manifest).map_err(|e| (STAGE_HISTORY, e.into()))?;
        self.output.detail(&format!(
            "manifest schema version {}",
            manifest.schema_version()
        ));
        let metadata =
            resolve_history(area, &manifest, record).map_err(|e| (STAGE_HISTORY, e.into()))?;

        self.output.subsection("Squashing layers");
        let layers: Vec<Layer> = metadata
            .layers
            .iter()
            .map(|digest| Layer::from_digest(digest, area.raw_dir()))
            .collect();
        let size = LayerSquasher::new(self.output.clone())
            .squash(area, &layers, self.runner.as_ref())
            .await
            .map_err(|e| (STAGE_SQUASH, e.into()))?;
        self.output.info(&format!(
            "flattened {} layers into {}",
            layers.len(),
            self.output.format_size(size)
        ));

        self.output.subsection("Running analyzers");
        let findings =
            AnalyzerOrchestrator::new(self.config.plugin_dir.clone(), self.output.clone())
                .run(&record.image_id, area, self.runner.as_ref())
                .await;

        let built = ReportBuilder::new()
            .with_record(record.clone())
            .with_metadata(metadata)
            .with_size(size)
            .with_findings(findings)
            .build()
            .map_err(|e| (STAGE_EXPORT, e.into()))?;
        *report = Some(built);

        Ok(())
    }
}

/// Combine the stage outcome with the teardown outcome. A stage failure is
/// always primary; teardown failure after success fails the run on its
/// own; a clean run that somehow produced no report is an error too.
fn finish_run(
    run: StageResult<()>,
    cleanup: std::result::Result<(), StagingError>,
    report: Option<ImageReport>,
) -> Result<ImageReport> {
    match (run, cleanup) {
        (Ok(()), Ok(())) => report.ok_or(PipelineError::NoReport),
        (Ok(()), Err(cleanup)) => Err(PipelineError::Cleanup(cleanup)),
        (Err((stage, source)), Ok(())) => Err(PipelineError::Stage { stage, source }),
        (Err((stage, source)), Err(cleanup)) => Err(PipelineError::StageWithCleanup {
            stage,
            source,
            cleanup,
        }),
    }
}
