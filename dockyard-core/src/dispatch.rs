//! Maps an authenticated inbound webhook to a Build Pipeline invocation
//! (wrapped in a Status Reporter) or an un-deploy invocation, and
//! launches it as a background task whose completion is logged but does
//! not block the webhook response.

use std::sync::Arc;

use log::{error, info};

use crate::config::Config;
use crate::correlation::CorrelationId;
use crate::error::DockyardError;
use crate::pipeline::{BuildPipeline, BuildRequest, DeploymentKey, ReportingContext};
use crate::status::StatusReporter;

/// The events this service cares about, independent of wire format.
/// Only a GitHub `WebhookInterpreter` ships, but keeping this enum in
/// the core crate means the dispatcher and the routing table below carry
/// no forge-specific JSON shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsEvent {
    Ping,
    Push { repo: String, repo_slug: String, branch: String, sha: String },
    TagPush { repo: String, repo_slug: String, tag: String },
    PullRequestOpened { repo: String, repo_slug: String, number: u64, sha: String, source_branch: String },
    PullRequestClosed { repo: String, number: u64, merged: bool },
}

/// Parses a raw, pre-authenticated webhook body into zero or more
/// `VcsEvent`s.
pub trait WebhookInterpreter: Send + Sync {
    fn interpret(&self, event_type: &str, body: &[u8]) -> Result<Vec<VcsEvent>, DockyardError>;
}

enum Plan {
    NoOp,
    Deploy { request: BuildRequest, reporter: Arc<dyn StatusReporter> },
    Undeploy { key: DeploymentKey },
}

/// Routes `VcsEvent`s to the Build Pipeline and spawns each invocation
/// as a background task.
pub struct EventDispatcher {
    config: Arc<Config>,
    pipeline: Arc<BuildPipeline>,
    commit_reporter: Arc<dyn StatusReporter>,
    pr_reporter: Arc<dyn StatusReporter>,
}

impl EventDispatcher {
    pub fn new(
        config: Arc<Config>,
        pipeline: Arc<BuildPipeline>,
        commit_reporter: Arc<dyn StatusReporter>,
        pr_reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        EventDispatcher { config, pipeline, commit_reporter, pr_reporter }
    }

    /// Routes `event` and, unless it is a no-op, launches the
    /// corresponding pipeline invocation as a background task. Returns
    /// as soon as the task is spawned; an `other` event (one this table
    /// has no row for) surfaces as an internal error rather than being
    /// silently dropped.
    pub fn dispatch(&self, event: VcsEvent, correlation: CorrelationId) -> Result<(), DockyardError> {
        match self.plan(event)? {
            Plan::NoOp => Ok(()),
            Plan::Deploy { request, reporter } => {
                self.spawn_deploy(request, reporter, correlation);
                Ok(())
            }
            Plan::Undeploy { key } => {
                self.spawn_undeploy(key, correlation);
                Ok(())
            }
        }
    }

    fn plan(&self, event: VcsEvent) -> Result<Plan, DockyardError> {
        match event {
            VcsEvent::Ping => Ok(Plan::NoOp),

            VcsEvent::Push { repo, repo_slug, branch, sha } => {
                if !self.config.allowed_branches.iter().any(|allowed| allowed == &branch) {
                    return Ok(Plan::NoOp);
                }
                let path = format!("dev/{}", branch);
                let request =
                    self.build_request(&repo, &repo_slug, &branch, &path, &self.config.pages_stub, Some(sha), None);
                Ok(Plan::Deploy { request, reporter: self.commit_reporter.clone() })
            }

            VcsEvent::TagPush { repo, repo_slug, tag } => {
                let request =
                    self.build_request(&repo, &repo_slug, &tag, &tag, &self.config.pages_stub, None, None);
                Ok(Plan::Deploy { request, reporter: self.commit_reporter.clone() })
            }

            VcsEvent::PullRequestOpened { repo, repo_slug, number, sha, source_branch } => {
                let path = format!("PR/{}", number);
                let request = self.build_request(
                    &repo,
                    &repo_slug,
                    &source_branch,
                    &path,
                    &self.config.pages_pr_stub,
                    Some(sha),
                    Some(number),
                );
                Ok(Plan::Deploy { request, reporter: self.pr_reporter.clone() })
            }

            VcsEvent::PullRequestClosed { number, .. } => {
                let path = format!("PR/{}", number);
                let key = DeploymentKey::new(self.config.publication_repo_url(&self.config.pages_pr_stub), path);
                Ok(Plan::Undeploy { key })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_request(
        &self,
        source_repo_url: &str,
        source_repo_slug: &str,
        source_ref: &str,
        publication_path: &str,
        pages_stub: &str,
        commit_sha: Option<String>,
        pull_request_number: Option<u64>,
    ) -> BuildRequest {
        let success_url = Config::pages_url(pages_stub, publication_path);
        let log_url = format!("{}/{}.log", success_url.trim_end_matches('/'), self.config.app_name);
        BuildRequest {
            source_repo_url: source_repo_url.to_owned(),
            source_ref: source_ref.to_owned(),
            publication_path: publication_path.to_owned(),
            publication_repo_url: self.config.publication_repo_url(pages_stub),
            commit_message: format!("Deploy {}", publication_path),
            reporting: ReportingContext {
                // The status/comment is posted against the source repo that
                // owns the commit SHA or PR number, not the publication repo.
                repo_slug: source_repo_slug.to_owned(),
                commit_sha,
                pull_request_number,
                success_url,
                log_url,
            },
        }
    }

    fn spawn_deploy(&self, request: BuildRequest, reporter: Arc<dyn StatusReporter>, correlation: CorrelationId) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let context = request.reporting.clone();
            reporter.enter(&context).await;
            let result = pipeline.build_and_deploy(request).await;
            reporter.exit(&context, &result).await;
            match &result {
                Ok(outcome) => info!("[{}] deploy finished: {:?}", correlation, outcome),
                Err(e) => error!("[{}] deploy failed: {} ({})", correlation, e, e.trace_tag(&correlation)),
            }
        });
    }

    fn spawn_undeploy(&self, key: DeploymentKey, correlation: CorrelationId) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let result = pipeline.undeploy(key).await;
            match &result {
                Ok(()) => info!("[{}] undeploy finished", correlation),
                Err(e) => error!("[{}] undeploy failed: {} ({})", correlation, e, e.trace_tag(&correlation)),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            github_token: "tok".into(),
            github_hmac_token: "secret".into(),
            pages_stub: "o/r".into(),
            pages_pr_stub: "o/r-pr".into(),
            allowed_branches: vec!["master".into()],
            app_name: "dockyard-build".into(),
        }
    }

    #[test]
    fn push_to_disallowed_branch_is_a_no_op() {
        let status_stub: Arc<dyn StatusReporter> = Arc::new(NullReporter);
        let registry = Arc::new(crate::registry::Registry::new());
        let pipeline = Arc::new(BuildPipeline::new(registry, "dockyard-build", "dockyard-build"));
        let dispatcher = EventDispatcher::new(Arc::new(config()), pipeline, status_stub.clone(), status_stub);

        let plan = dispatcher
            .plan(VcsEvent::Push {
                repo: "https://github.com/o/r.git".into(),
                repo_slug: "o/r".into(),
                branch: "feature".into(),
                sha: "abc".into(),
            })
            .unwrap();
        assert!(matches!(plan, Plan::NoOp));
    }

    #[test]
    fn push_to_allowed_branch_deploys_under_dev() {
        let status_stub: Arc<dyn StatusReporter> = Arc::new(NullReporter);
        let registry = Arc::new(crate::registry::Registry::new());
        let pipeline = Arc::new(BuildPipeline::new(registry, "dockyard-build", "dockyard-build"));
        let dispatcher = EventDispatcher::new(Arc::new(config()), pipeline, status_stub.clone(), status_stub);

        let plan = dispatcher
            .plan(VcsEvent::Push {
                repo: "https://github.com/other/source.git".into(),
                repo_slug: "other/source".into(),
                branch: "master".into(),
                sha: "abcd1234".into(),
            })
            .unwrap();
        match plan {
            Plan::Deploy { request, .. } => {
                assert_eq!(request.publication_path, "dev/master");
                assert_eq!(request.reporting.success_url, "https://o.github.io/r/dev/master");
                // The status is posted against the source repo, not the
                // (differently-named) publication repo.
                assert_eq!(request.reporting.repo_slug, "other/source");
            }
            _ => panic!("expected a deploy plan"),
        }
    }

    #[test]
    fn pull_request_closed_undeploys_its_path() {
        let status_stub: Arc<dyn StatusReporter> = Arc::new(NullReporter);
        let registry = Arc::new(crate::registry::Registry::new());
        let pipeline = Arc::new(BuildPipeline::new(registry, "dockyard-build", "dockyard-build"));
        let dispatcher = EventDispatcher::new(Arc::new(config()), pipeline, status_stub.clone(), status_stub);

        let plan = dispatcher
            .plan(VcsEvent::PullRequestClosed { repo: "r".into(), number: 42, merged: true })
            .unwrap();
        match plan {
            Plan::Undeploy { key } => assert_eq!(key.publication_path, "PR/42"),
            _ => panic!("expected an undeploy plan"),
        }
    }

    struct NullReporter;

    #[async_trait::async_trait]
    impl StatusReporter for NullReporter {
        async fn exit(&self, _context: &ReportingContext, _result: &Result<crate::pipeline::BuildOutcome, DockyardError>) {}
    }
}
