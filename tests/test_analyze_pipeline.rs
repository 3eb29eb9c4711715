//! End-to-end pipeline tests over scripted collaborators
//!
//! These drive `AnalyzePipeline::analyze` the way the CLI does, with the
//! registry download and external commands replaced by test doubles: the
//! fetcher deposits prebuilt blob files, the runner acknowledges tar
//! extraction and stands in for analyzer plugins by writing their output.

use async_trait::async_trait;
use docker_image_analyzer::error::FetchError;
use docker_image_analyzer::fetch::{ImageFetcher, RegistryCredential};
use docker_image_analyzer::image::{DockerfileMode, ImageRecord};
use docker_image_analyzer::output::OutputManager;
use docker_image_analyzer::pipeline::{AnalyzePipeline, PipelineConfig};
use docker_image_analyzer::process::{ProcessOutput, ProcessRunner};
use serde_json::json;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const IMAGE_ID: &str = "cafebabe00112233";

/// Deposits prebuilt blob files instead of talking to a registry.
struct ScriptedFetcher {
    files: Vec<(String, Vec<u8>)>,
    fail: bool,
    pulls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedFetcher {
    fn with_files(files: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            files,
            fail: false,
            pulls: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            files: Vec::new(),
            fail: true,
            pulls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        pull_string: &str,
        dest_dir: &Path,
        credential: Option<&RegistryCredential>,
    ) -> Result<(), FetchError> {
        self.pulls.lock().unwrap().push((
            pull_string.to_string(),
            credential.map(|c| c.username.clone()),
        ));

        if self.fail {
            return Err(FetchError::Download {
                pull_string: pull_string.to_string(),
                exit_code: Some(1),
                stderr: "manifest unknown".to_string(),
            });
        }

        for (name, bytes) in &self.files {
            fs::write(dest_dir.join(name), bytes).map_err(|source| FetchError::BlobLayout {
                dir: dest_dir.to_path_buf(),
                source,
            })?;
        }

        Ok(())
    }
}

/// Acknowledges every command. Invocations that are not the tar
/// extraction are analyzer plugins; those deposit the scripted output
/// files under the plugin contract's output directory argument.
struct ScriptedRunner {
    plugin_output: Vec<(String, String, String)>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedRunner {
    fn ok() -> Self {
        Self {
            plugin_output: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_plugin_output(entries: &[(&str, &str, &str)]) -> Self {
        Self {
            plugin_output: entries
                .iter()
                .map(|(m, k, c)| (m.to_string(), k.to_string(), c.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn tar_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == PathBuf::from("tar"))
            .count()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &Path,
        args: &[String],
        _workdir: Option<&Path>,
    ) -> io::Result<ProcessOutput> {
        self.calls.lock().unwrap().push(command.to_path_buf());

        if command != Path::new("tar") {
            // plugin contract: the output directory is the third argument
            let output_dir = Path::new(&args[2]);
            for (module, key, contents) in &self.plugin_output {
                let dir = output_dir.join("analyzer_output").join(module);
                fs::create_dir_all(&dir)?;
                fs::write(dir.join(key), contents)?;
            }
        }

        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn layer_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    builder.into_inner().unwrap()
}

fn record(registry: &str) -> ImageRecord {
    ImageRecord {
        image_digest: "sha256:beefbeef".to_string(),
        registry: registry.to_string(),
        repository: "team/app".to_string(),
        tag: "1.0".to_string(),
        image_id: IMAGE_ID.to_string(),
        dockerfile: None,
        dockerfile_mode: None,
    }
}

fn v2_manifest() -> String {
    json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 2048,
            "digest": "sha256:cfg"
        },
        "layers": [
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 11, "digest": "sha256:aaa"},
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 22, "digest": "sha256:bbb"}
        ]
    })
    .to_string()
}

fn v2_config_blob() -> Vec<u8> {
    json!({
        "architecture": "amd64",
        "history": [
            {"created": "2024-01-01T00:00:00Z", "created_by": "/bin/sh -c #(nop) ADD file:abc in /"},
            {"created": "2024-01-02T00:00:00Z", "created_by": "/bin/sh -c #(nop)  ENV PATH=/usr/bin", "empty_layer": true},
            {"created": "2024-01-03T00:00:00Z", "created_by": "/bin/sh -c sed -i s/hello/patched/ /etc/motd"}
        ]
    })
    .to_string()
    .into_bytes()
}

fn v1_compat(created: &str, cmd: &str, size: u64) -> String {
    json!({
        "created": created,
        "container_config": {"Cmd": ["/bin/sh", "-c", cmd]},
        "Size": size
    })
    .to_string()
}

fn v1_manifest() -> String {
    // wire order is newest-first
    json!({
        "schemaVersion": 1,
        "architecture": "arm64",
        "fsLayers": [
            {"blobSum": "sha256:ccc"},
            {"blobSum": "sha256:bbb"},
            {"blobSum": "sha256:aaa"}
        ],
        "history": [
            {"v1Compatibility": v1_compat("2024-01-03T00:00:00Z", "echo top", 3)},
            {"v1Compatibility": v1_compat("2024-01-02T00:00:00Z", "echo mid", 2)},
            {"v1Compatibility": v1_compat("2024-01-01T00:00:00Z", "echo base", 1)}
        ]
    })
    .to_string()
}

fn build_pipeline(
    root: &Path,
    plugin_dir: &Path,
    fetcher: Arc<ScriptedFetcher>,
    runner: Arc<ScriptedRunner>,
    credentials: Vec<RegistryCredential>,
) -> AnalyzePipeline {
    AnalyzePipeline::new(
        PipelineConfig {
            staging_root: root.to_path_buf(),
            plugin_dir: plugin_dir.to_path_buf(),
            credentials,
        },
        fetcher,
        runner,
        OutputManager::new_quiet(),
    )
}

fn add_plugin(dir: &Path, name: &str) {
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn staging_root_is_empty(root: &Path) -> bool {
    fs::read_dir(root).unwrap().next().is_none()
}

#[tokio::test]
async fn test_analyze_schema_v2_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();
    add_plugin(plugin_dir.path(), "10_file_list");

    let files = vec![
        (
            "aaa.tar".to_string(),
            layer_tar(&[("bin/busybox", b"ELF" as &[u8]), ("etc/motd", b"hello")]),
        ),
        ("bbb.tar".to_string(), layer_tar(&[("etc/motd", b"patched")])),
        (format!("{IMAGE_ID}.tar"), v2_config_blob()),
    ];
    let fetcher = Arc::new(ScriptedFetcher::with_files(files));
    let runner = Arc::new(ScriptedRunner::with_plugin_output(&[(
        "file_list",
        "files.all",
        "/etc/motd mode=0644\n/bin/busybox mode=0755\n",
    )]));

    let pipeline = build_pipeline(
        root.path(),
        plugin_dir.path(),
        fetcher,
        runner.clone(),
        Vec::new(),
    );
    let report = pipeline
        .analyze(&v2_manifest(), &record("registry.example.com"))
        .await
        .unwrap();

    assert_eq!(report.image_id, IMAGE_ID);
    assert_eq!(report.short_id, "cafebabe0011");
    assert_eq!(report.full_tag, "registry.example.com/team/app:1.0");
    assert_eq!(report.repo_digest, "registry.example.com/team/app@sha256:beefbeef");
    assert_eq!(report.layers, vec!["sha256:aaa", "sha256:bbb"]);
    assert_eq!(report.familytree, report.layers);
    assert_eq!(report.architecture, "amd64");
    assert!(report.size_bytes > 0);

    // the metadata-only ENV step carries no layer
    assert_eq!(report.docker_history.len(), 3);
    assert_eq!(report.docker_history[0].layer_id.as_deref(), Some("sha256:aaa"));
    assert_eq!(report.docker_history[1].layer_id, None);
    assert_eq!(report.docker_history[2].layer_id.as_deref(), Some("sha256:bbb"));
    assert_eq!(report.docker_history[2].size, 22);

    assert_eq!(report.dockerfile_mode, DockerfileMode::Guessed);
    assert!(report.dockerfile_contents.starts_with("FROM scratch\n"));
    assert!(report.dockerfile_contents.contains("ADD file:abc in /\n"));
    assert!(report.dockerfile_contents.contains("ENV PATH=/usr/bin\n"));

    assert_eq!(
        report.analysis_report["file_list"]["files.all"]["/etc/motd"],
        "mode=0644"
    );

    // one extraction, one plugin invocation
    assert_eq!(runner.tar_calls(), 1);
    let plugin_calls = runner
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.ends_with("10_file_list"))
        .count();
    assert_eq!(plugin_calls, 1);

    assert!(staging_root_is_empty(root.path()));
}

#[tokio::test]
async fn test_analyze_schema_v1_normalizes_to_bottom_up_order() {
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();

    let files = vec![
        ("aaa.tar".to_string(), layer_tar(&[("base", b"1" as &[u8])])),
        ("bbb.tar".to_string(), layer_tar(&[("mid", b"2" as &[u8])])),
        ("ccc.tar".to_string(), layer_tar(&[("top", b"3" as &[u8])])),
    ];
    let fetcher = Arc::new(ScriptedFetcher::with_files(files));
    let runner = Arc::new(ScriptedRunner::ok());

    let pipeline = build_pipeline(root.path(), plugin_dir.path(), fetcher, runner, Vec::new());
    let report = pipeline
        .analyze(&v1_manifest(), &record("registry.example.com"))
        .await
        .unwrap();

    assert_eq!(report.layers, vec!["sha256:aaa", "sha256:bbb", "sha256:ccc"]);
    assert_eq!(report.architecture, "arm64");
    assert_eq!(report.docker_history.len(), 3);
    assert_eq!(report.docker_history[0].created, "2024-01-01T00:00:00Z");
    assert_eq!(report.docker_history[0].size, 1);
    assert_eq!(report.docker_history[2].created, "2024-01-03T00:00:00Z");
    assert_eq!(
        report.dockerfile_contents,
        "FROM scratch\nRUN /bin/sh -c echo base\nRUN /bin/sh -c echo mid\nRUN /bin/sh -c echo top\n"
    );

    // empty plugin dir means empty findings, not a failure
    assert!(report.analysis_report.is_empty());
    assert!(staging_root_is_empty(root.path()));
}

#[tokio::test]
async fn test_fetch_failure_reports_stage_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::failing());
    let runner = Arc::new(ScriptedRunner::ok());

    let pipeline = build_pipeline(
        root.path(),
        plugin_dir.path(),
        fetcher,
        runner.clone(),
        Vec::new(),
    );
    let err = pipeline
        .analyze(&v2_manifest(), &record("registry.example.com"))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some("image fetch"));
    // nothing past the fetch ran
    assert!(runner.calls.lock().unwrap().is_empty());
    // the staging area was still torn down
    assert!(staging_root_is_empty(root.path()));
}

#[tokio::test]
async fn test_undecodable_manifest_fails_history_resolution() {
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with_files(Vec::new()));
    let runner = Arc::new(ScriptedRunner::ok());

    let pipeline = build_pipeline(root.path(), plugin_dir.path(), fetcher, runner, Vec::new());
    let err = pipeline
        .analyze("{not json", &record("registry.example.com"))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some("history resolution"));
    assert!(staging_root_is_empty(root.path()));
}

#[tokio::test]
async fn test_unsupported_schema_version_fails_history_resolution() {
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::with_files(Vec::new()));
    let runner = Arc::new(ScriptedRunner::ok());

    let raw = json!({"schemaVersion": 4}).to_string();
    let pipeline = build_pipeline(root.path(), plugin_dir.path(), fetcher, runner, Vec::new());
    let err = pipeline
        .analyze(&raw, &record("registry.example.com"))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some("history resolution"));
    assert!(staging_root_is_empty(root.path()));
}

#[tokio::test]
async fn test_missing_layer_blob_fails_the_squash_stage() {
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();

    // the config blob arrives but the layer blobs never do
    let files = vec![(format!("{IMAGE_ID}.tar"), v2_config_blob())];
    let fetcher = Arc::new(ScriptedFetcher::with_files(files));
    let runner = Arc::new(ScriptedRunner::ok());

    let pipeline = build_pipeline(root.path(), plugin_dir.path(), fetcher, runner, Vec::new());
    let err = pipeline
        .analyze(&v2_manifest(), &record("registry.example.com"))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some("layer squash"));
    assert!(staging_root_is_empty(root.path()));
}

#[tokio::test]
async fn test_credentials_are_routed_by_registry() {
    let credentials = vec![
        RegistryCredential {
            registry: "private.example.com".to_string(),
            username: "bob".to_string(),
            password: "hunter2".to_string(),
            verify_tls: true,
        },
        RegistryCredential {
            registry: "other.example.com".to_string(),
            username: "eve".to_string(),
            password: "x".to_string(),
            verify_tls: false,
        },
    ];

    // matching registry pulls with its credential
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::failing());
    let runner = Arc::new(ScriptedRunner::ok());
    let pipeline = build_pipeline(
        root.path(),
        plugin_dir.path(),
        fetcher.clone(),
        runner,
        credentials.clone(),
    );
    let _ = pipeline
        .analyze(&v2_manifest(), &record("private.example.com"))
        .await;

    {
        let pulls = fetcher.pulls.lock().unwrap();
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0].0, "private.example.com/team/app@sha256:beefbeef");
        assert_eq!(pulls[0].1.as_deref(), Some("bob"));
    }

    // a registry without a credential pulls anonymously
    let root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::failing());
    let runner = Arc::new(ScriptedRunner::ok());
    let pipeline = build_pipeline(
        root.path(),
        plugin_dir.path(),
        fetcher.clone(),
        runner,
        credentials,
    );
    let _ = pipeline
        .analyze(&v2_manifest(), &record("unknown.example.com"))
        .await;

    let pulls = fetcher.pulls.lock().unwrap();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].1, None);
}
