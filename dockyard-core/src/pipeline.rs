//! Top-level orchestration for a single webhook-originated event: clone
//! source at a ref, invoke the sandboxed builder, capture the build log,
//! compose the publication mutation, and classify the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{DeployError, DockyardError};
use crate::publication::PublicationTransaction;
use crate::registry::Registry;
use crate::subprocess::{RunOptions, SubprocessRunner};

/// Identifies a target location on the static-hosting branch. Uniqueness
/// of this pair is what the Registry enforces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentKey {
    pub publication_repo_url: String,
    pub publication_path: String,
}

impl DeploymentKey {
    pub fn new(publication_repo_url: impl Into<String>, publication_path: impl Into<String>) -> Self {
        DeploymentKey {
            publication_repo_url: publication_repo_url.into(),
            publication_path: publication_path.into(),
        }
    }
}

/// The code-forge context a Status Reporter needs to post feedback.
#[derive(Debug, Clone)]
pub struct ReportingContext {
    pub repo_slug: String,
    pub commit_sha: Option<String>,
    pub pull_request_number: Option<u64>,
    pub success_url: String,
    pub log_url: String,
}

/// Immutable descriptor of a single pipeline invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source_repo_url: String,
    pub source_ref: String,
    pub publication_path: String,
    pub publication_repo_url: String,
    pub commit_message: String,
    pub reporting: ReportingContext,
}

impl BuildRequest {
    pub fn deployment_key(&self) -> DeploymentKey {
        DeploymentKey::new(self.publication_repo_url.clone(), self.publication_path.clone())
    }
}

/// Produced by the Build Pipeline, consumed by the Status Reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    Warning,
    Failure,
}

/// Orchestrates clone -> build -> stage -> publish for one Build Request,
/// and the symmetric un-deploy operation.
#[derive(Clone)]
pub struct BuildPipeline {
    registry: Arc<Registry>,
    runner: SubprocessRunner,
    transaction: PublicationTransaction,
    /// Absolute path to the sandboxed builder binary, e.g. `/usr/bin/dockyard-build`.
    builder_binary: String,
    /// Short name used for the source parent directory and the build log
    /// file name (`<app_name>.log`).
    app_name: String,
}

impl BuildPipeline {
    pub fn new(registry: Arc<Registry>, builder_binary: impl Into<String>, app_name: impl Into<String>) -> Self {
        BuildPipeline {
            registry,
            runner: SubprocessRunner::new(),
            transaction: PublicationTransaction::new(),
            builder_binary: builder_binary.into(),
            app_name: app_name.into(),
        }
    }

    pub async fn build_and_deploy(&self, request: BuildRequest) -> Result<BuildOutcome, DockyardError> {
        let handle = self.registry.claim(request.deployment_key()).await;
        let cancel = handle.cancel_requested.clone();
        let result = self.run_build(&request, &cancel).await;
        handle.mark_finished();
        result
    }

    pub async fn undeploy(&self, key: DeploymentKey) -> Result<(), DockyardError> {
        let handle = self.registry.claim(key.clone()).await;
        let cancel = handle.cancel_requested.clone();
        let result = self.run_undeploy(&key, &cancel).await;
        handle.mark_finished();
        result
    }

    async fn run_build(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, DockyardError> {
        let source_parent = std::env::temp_dir().join(&self.app_name);
        tokio::fs::create_dir_all(&source_parent)
            .await
            .map_err(|e| DockyardError::Internal(format!("creating source parent dir: {}", e)))?;

        let workspace = tempfile::Builder::new()
            .prefix("src-")
            .tempdir_in(&source_parent)
            .map_err(|e| DockyardError::Internal(format!("creating source workspace: {}", e)))?;
        restrict_to_owner(workspace.path());

        let ws = workspace
            .path()
            .to_str()
            .ok_or_else(|| DockyardError::Internal("source workspace path is not utf-8".into()))?;

        self.runner
            .run(
                "git",
                &["clone", "--depth", "1", "--branch", &request.source_ref, &request.source_repo_url, ws],
                RunOptions::capture(),
                &format!(
                    "cloning {} at ref {}",
                    request.source_repo_url, request.source_ref
                ),
                cancel,
            )
            .await?;

        let builder_path = format!("/usr/bin/{}", self.builder_binary);
        let builder_result = self
            .runner
            .run(
                "sudo",
                &[&builder_path, ws],
                RunOptions::discard().error_ok(),
                "sandboxed builder",
                cancel,
            )
            .await?;
        let builder_failed = !builder_result.success();

        let log_path = workspace.path().join(format!("{}.log", self.app_name));
        let log_contents = self.read_log(&log_path, cancel).await?;
        let has_warning = log_contents.to_lowercase().contains("warning");

        let artifact_path = workspace.path().join("target");
        let artifact_exists = tokio::fs::try_exists(&artifact_path).await.unwrap_or(false);

        let runner = self.runner.clone();
        let publication_path = request.publication_path.clone();
        let log_path_for_mutation = log_path.clone();
        let app_name = self.app_name.clone();
        let mutation_cancel = cancel.clone();

        self.transaction
            .transact(
                &request.publication_repo_url,
                &request.commit_message,
                cancel,
                move |publication_workspace: PathBuf| {
                    let runner = runner.clone();
                    let cancel = mutation_cancel.clone();
                    let publication_path = publication_path.clone();
                    let log_path = log_path_for_mutation.clone();
                    let app_name = app_name.clone();
                    let artifact_path = artifact_path.clone();
                    async move {
                        stage_build(
                            &runner,
                            &cancel,
                            &publication_workspace,
                            &publication_path,
                            &log_path,
                            &app_name,
                            artifact_exists.then_some(artifact_path.as_path()),
                        )
                        .await
                    }
                },
            )
            .await?;

        Ok(if builder_failed {
            BuildOutcome::Failure
        } else if has_warning {
            BuildOutcome::Warning
        } else {
            BuildOutcome::Success
        })
    }

    async fn run_undeploy(&self, key: &DeploymentKey, cancel: &CancellationToken) -> Result<(), DockyardError> {
        let runner = self.runner.clone();
        let publication_path = key.publication_path.clone();
        let mutation_cancel = cancel.clone();

        self.transaction
            .transact(
                &key.publication_repo_url,
                "Undeploy",
                cancel,
                move |publication_workspace: PathBuf| {
                    let runner = runner.clone();
                    let cancel = mutation_cancel.clone();
                    let publication_path = publication_path.clone();
                    async move {
                        let target_dir = publication_workspace.join(&publication_path);
                        let target_str = target_dir
                            .to_str()
                            .ok_or_else(|| DeployError::new("publication path is not utf-8"))?;
                        runner
                            .run(
                                "rm",
                                &["-rf", target_str],
                                RunOptions::discard(),
                                "removing publication path",
                                &cancel,
                            )
                            .await
                            .map_err(|e| DeployError::new(e.message))?;
                        Ok(())
                    }
                },
            )
            .await
            .map_err(DockyardError::from)
    }

    async fn read_log(&self, log_path: &Path, cancel: &CancellationToken) -> Result<String, DockyardError> {
        let path_str = log_path
            .to_str()
            .ok_or_else(|| DockyardError::Internal("build log path is not utf-8".into()))?;
        let result = self
            .runner
            .run("cat", &[path_str], RunOptions::capture().error_ok(), "reading build log", cancel)
            .await?;
        Ok(result.output.unwrap_or_default())
    }
}

#[allow(clippy::too_many_arguments)]
async fn stage_build(
    runner: &SubprocessRunner,
    cancel: &CancellationToken,
    publication_workspace: &Path,
    publication_path: &str,
    log_path: &Path,
    app_name: &str,
    artifact_path: Option<&Path>,
) -> Result<(), DeployError> {
    let target_dir = publication_workspace.join(publication_path);
    let target_str = target_dir
        .to_str()
        .ok_or_else(|| DeployError::new("publication path is not utf-8"))?;

    runner
        .run("rm", &["-rf", target_str], RunOptions::discard(), "clearing publication path", cancel)
        .await
        .map_err(|e| DeployError::new(e.message))?;

    tokio::fs::create_dir_all(&target_dir)
        .await
        .map_err(|e| DeployError::new(format!("creating publication path: {}", e)))?;

    let log_str = log_path.to_str().ok_or_else(|| DeployError::new("log path is not utf-8"))?;
    let log_dest = target_dir.join(format!("{}.log", app_name));
    let log_dest_str = log_dest.to_str().ok_or_else(|| DeployError::new("log destination is not utf-8"))?;
    runner
        .run("cp", &[log_str, log_dest_str], RunOptions::discard(), "copying build log", cancel)
        .await
        .map_err(|e| DeployError::new(e.message))?;

    if let Some(artifact_path) = artifact_path {
        let artifact_str = artifact_path
            .to_str()
            .ok_or_else(|| DeployError::new("artifact path is not utf-8"))?;
        // -T treats `target_str` as the copy's destination root rather than
        // a directory to copy *into*, so the artifact tree's own contents
        // (its `index.html`, etc.) land directly under the publication path
        // instead of nested under an extra `target/` segment.
        runner
            .run("cp", &["-rT", artifact_str, target_str], RunOptions::discard(), "copying build artifacts", cancel)
            .await
            .map_err(|e| DeployError::new(e.message))?;
    }

    synthesize_indexes(&target_dir)
        .await
        .map_err(|e| DeployError::new(format!("synthesizing directory indexes: {}", e)))?;

    Ok(())
}

/// Depth-first walk of `root`, synthesizing an `index.html` for every
/// directory that lacks one. Pre-existing index files are never
/// overwritten; listings are sorted lexicographically.
async fn synthesize_indexes(root: &Path) -> std::io::Result<()> {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                pending.push(entry.path());
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let index_path = dir.join("index.html");
        if !index_path.exists() {
            tokio::fs::write(&index_path, render_index(&names)).await?;
        }
    }
    Ok(())
}

fn render_index(names: &[String]) -> String {
    let mut body = String::from("<html><body><ul>\n");
    for name in names {
        body.push_str(&format!("<li><a href=\"{0}\">{0}</a></li>\n", name));
    }
    body.push_str("</ul></body></html>\n");
    body
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o700);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_key_identifies_repo_and_path() {
        let request = BuildRequest {
            source_repo_url: "https://example.com/src.git".into(),
            source_ref: "master".into(),
            publication_path: "dev/master".into(),
            publication_repo_url: "https://example.com/pub.git".into(),
            commit_message: "deploy".into(),
            reporting: ReportingContext {
                repo_slug: "o/r".into(),
                commit_sha: Some("abcd".into()),
                pull_request_number: None,
                success_url: "https://o.github.io/r/dev/master".into(),
                log_url: "https://o.github.io/r/dev/master/app.log".into(),
            },
        };
        let key = request.deployment_key();
        assert_eq!(key.publication_repo_url, "https://example.com/pub.git");
        assert_eq!(key.publication_path, "dev/master");
    }

    #[tokio::test]
    async fn synthesizes_index_only_where_absent() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("has-index")).await.unwrap();
        tokio::fs::write(tmp.path().join("has-index/index.html"), "custom").await.unwrap();
        tokio::fs::create_dir_all(tmp.path().join("bare")).await.unwrap();
        tokio::fs::write(tmp.path().join("bare/b.txt"), "b").await.unwrap();
        tokio::fs::write(tmp.path().join("bare/a.txt"), "a").await.unwrap();

        synthesize_indexes(tmp.path()).await.unwrap();

        let preserved = tokio::fs::read_to_string(tmp.path().join("has-index/index.html")).await.unwrap();
        assert_eq!(preserved, "custom");

        let synthesized = tokio::fs::read_to_string(tmp.path().join("bare/index.html")).await.unwrap();
        let a_pos = synthesized.find("a.txt").unwrap();
        let b_pos = synthesized.find("b.txt").unwrap();
        assert!(a_pos < b_pos);

        let root_index = tokio::fs::read_to_string(tmp.path().join("index.html")).await.unwrap();
        assert!(root_index.contains("bare"));
        assert!(root_index.contains("has-index"));
    }
}
