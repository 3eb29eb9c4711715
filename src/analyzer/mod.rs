//! Analyzer plugin orchestration
//!
//! Analyzer plugins are standalone executables dropped into a plugin
//! directory. Each one is handed the unpacked image and an output
//! directory; whatever key/value files they leave under
//! `analyzer_output/<module>/<key>` are aggregated into the findings map.
//! Analysis is best-effort by contract: a plugin that fails, or output
//! that cannot be read back, is logged and skipped, never fatal.

use crate::output::OutputManager;
use crate::process::ProcessRunner;
use crate::staging::StagingArea;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Directory plugins write their results under, inside the staging output
/// dir.
pub const ANALYZER_OUTPUT_DIR: &str = "analyzer_output";

/// Aggregated plugin output: module name → output key → key/value data.
/// Ordered maps keep report serialization deterministic.
pub type AnalyzerFindings = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// Runs analyzer plugins against an unpacked image and collects their
/// findings.
pub struct AnalyzerOrchestrator {
    plugin_dir: PathBuf,
    output: OutputManager,
}

impl AnalyzerOrchestrator {
    pub fn new(plugin_dir: PathBuf, output: OutputManager) -> Self {
        Self { plugin_dir, output }
    }

    /// Invoke every discovered plugin, then aggregate whatever output
    /// appeared. Plugin exit codes are logged; none of them abort the run.
    pub async fn run(
        &self,
        image_id: &str,
        area: &StagingArea,
        runner: &dyn ProcessRunner,
    ) -> AnalyzerFindings {
        let plugins = discover_plugins(&self.plugin_dir);
        if plugins.is_empty() {
            self.output.warning(&format!(
                "no analyzer plugins found under {}",
                self.plugin_dir.display()
            ));
        }

        let args = vec![
            image_id.to_string(),
            area.unpack_dir().display().to_string(),
            area.output_dir().display().to_string(),
            // legacy plugin interface takes the unpack dir twice
            area.unpack_dir().display().to_string(),
        ];

        for plugin in &plugins {
            self.output
                .step(&format!("running analyzer {}", plugin.display()));

            match runner.run(plugin, &args, Some(area.unpack_dir())).await {
                Ok(result) if result.success() => {
                    self.output
                        .detail(&format!("analyzer {} completed", plugin.display()));
                }
                Ok(result) => {
                    self.output.warning(&format!(
                        "analyzer {} failed (exit {:?}): {}",
                        plugin.display(),
                        result.exit_code,
                        result.stderr.trim()
                    ));
                }
                Err(err) => {
                    self.output.warning(&format!(
                        "analyzer {} could not be launched: {err}",
                        plugin.display()
                    ));
                }
            }
        }

        self.aggregate(area.output_dir())
    }

    /// Collect `analyzer_output/<module>/<key>` files into the findings
    /// map. Modules and keys that produced no data are pruned; unreadable
    /// output is logged and skipped.
    fn aggregate(&self, output_dir: &Path) -> AnalyzerFindings {
        let mut findings = AnalyzerFindings::new();

        let root = output_dir.join(ANALYZER_OUTPUT_DIR);
        let modules = match fs::read_dir(&root) {
            Ok(modules) => modules,
            // no plugin wrote anything
            Err(_) => return findings,
        };

        for module in modules.flatten() {
            let module_path = module.path();
            if !module_path.is_dir() {
                continue;
            }
            let module_name = module.file_name().to_string_lossy().to_string();

            let keys = match fs::read_dir(&module_path) {
                Ok(keys) => keys,
                Err(err) => {
                    self.output.warning(&format!(
                        "cannot read analyzer output for {module_name}: {err}"
                    ));
                    continue;
                }
            };

            let mut module_findings = BTreeMap::new();
            for key in keys.flatten() {
                let key_path = key.path();
                if !key_path.is_file() {
                    continue;
                }

                let contents = match fs::read_to_string(&key_path) {
                    Ok(contents) => contents,
                    Err(err) => {
                        self.output.warning(&format!(
                            "cannot read analyzer output file {}: {err}",
                            key_path.display()
                        ));
                        continue;
                    }
                };

                let data = parse_kv_lines(&contents);
                if !data.is_empty() {
                    module_findings.insert(key.file_name().to_string_lossy().to_string(), data);
                }
            }

            if !module_findings.is_empty() {
                findings.insert(module_name, module_findings);
            }
        }

        findings
    }
}

/// Executable regular files in the plugin directory, in lexical path order
/// so orchestration is deterministic. A missing directory is treated as an
/// empty one.
pub fn discover_plugins(dir: &Path) -> Vec<PathBuf> {
    let mut plugins = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let executable = entry
                .metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false);
            if executable {
                plugins.push(entry.path());
            }
        }
    }

    plugins.sort();
    plugins
}

/// Parse a flat key/value file: the first whitespace-separated token on a
/// line is the key, the remainder the value. Blank lines are skipped.
pub fn parse_kv_lines(contents: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(char::is_whitespace) {
            Some((key, value)) => entries.insert(key.to_string(), value.trim_start().to_string()),
            None => entries.insert(line.to_string(), String::new()),
        };
    }

    entries
}
