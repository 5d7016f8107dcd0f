//! `StatusReporter` implementations that post build feedback to the
//! GitHub REST API: commit statuses for pushes/tags, a single issue
//! comment for pull requests.

use async_trait::async_trait;
use dockyard_core::error::DockyardError;
use dockyard_core::pipeline::{BuildOutcome, ReportingContext};
use dockyard_core::status::{classify, ReportedState, StatusReporter};
use log::warn;
use serde::Serialize;

const USER_AGENT: &str = "dockyard-build";

/// Posts a `pending` commit status on entry and a terminal status
/// (`success`/`failure`/`error`) on exit, against
/// `POST /repos/{owner}/{repo}/statuses/{sha}`. Used for `push` and
/// `create` (tag) events, which have no pull request to comment on.
#[derive(Debug, Clone)]
pub struct CommitStatusReporter {
    client: reqwest::Client,
    token: String,
}

impl CommitStatusReporter {
    pub fn new(token: impl Into<String>) -> Self {
        CommitStatusReporter { client: reqwest::Client::new(), token: token.into() }
    }

    async fn post_status(&self, context: &ReportingContext, state: &str, description: &str, target_url: Option<&str>) {
        let Some(sha) = &context.commit_sha else {
            // Tag pushes carry no commit to annotate; nothing to do.
            return;
        };
        let url = format!("https://api.github.com/repos/{}/statuses/{}", context.repo_slug, sha);
        let body = CommitStatusBody { state, description, target_url, context: "dockyard" };

        if let Err(e) = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
        {
            // Status reporting is best-effort: a network failure here must
            // never shadow the pipeline's real outcome.
            warn!("failed to post commit status to {}: {}", url, e);
        }
    }
}

#[derive(Debug, Serialize)]
struct CommitStatusBody<'a> {
    state: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
    context: &'a str,
}

#[async_trait]
impl StatusReporter for CommitStatusReporter {
    async fn enter(&self, context: &ReportingContext) {
        self.post_status(context, "pending", "build in progress", None).await;
    }

    async fn exit(&self, context: &ReportingContext, result: &Result<BuildOutcome, DockyardError>) {
        match classify(context, result) {
            ReportedState::Success { url } => {
                self.post_status(context, "success", "build succeeded", Some(&url)).await;
            }
            ReportedState::SuccessWithWarning { success_url, .. } => {
                self.post_status(context, "success", "build succeeded with warnings", Some(&success_url)).await;
            }
            ReportedState::Failure { description, url } => {
                self.post_status(context, "failure", &description, url.as_deref()).await;
            }
            ReportedState::Error { description } => {
                self.post_status(context, "error", &description, None).await;
            }
        }
    }
}

/// Posts a single issue comment at exit time, phrased to match the
/// outcome and linking to the success and log URLs. Used for pull
/// requests, which have no natural "pending" surface in the UI the way
/// a commit status check does.
#[derive(Debug, Clone)]
pub struct PrCommentReporter {
    client: reqwest::Client,
    token: String,
}

impl PrCommentReporter {
    pub fn new(token: impl Into<String>) -> Self {
        PrCommentReporter { client: reqwest::Client::new(), token: token.into() }
    }

    async fn post_comment(&self, context: &ReportingContext, body: String) {
        let Some(number) = context.pull_request_number else { return };
        let url = format!("https://api.github.com/repos/{}/issues/{}/comments", context.repo_slug, number);

        if let Err(e) = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .json(&IssueCommentBody { body: &body })
            .send()
            .await
        {
            warn!("failed to post pull request comment to {}: {}", url, e);
        }
    }
}

#[derive(Debug, Serialize)]
struct IssueCommentBody<'a> {
    body: &'a str,
}

#[async_trait]
impl StatusReporter for PrCommentReporter {
    // No pending comment: the contract only calls for one comment, at exit.

    async fn exit(&self, context: &ReportingContext, result: &Result<BuildOutcome, DockyardError>) {
        let comment = match classify(context, result) {
            ReportedState::Success { url } => {
                format!(":white_check_mark: Preview build succeeded: {}", url)
            }
            ReportedState::SuccessWithWarning { success_url, log_url } => format!(
                ":warning: Preview build succeeded with warnings: {} ([build log]({}))",
                success_url, log_url
            ),
            ReportedState::Failure { description, url } => match url {
                Some(url) => format!(":x: Preview build failed: {} ([build log]({}))", description, url),
                None => format!(":x: Preview build failed: {}", description),
            },
            ReportedState::Error { description } => {
                format!(":boom: Preview build errored internally ({})", description)
            }
        };
        self.post_comment(context, comment).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pr: Option<u64>) -> ReportingContext {
        ReportingContext {
            repo_slug: "o/r".into(),
            commit_sha: Some("abcd".into()),
            pull_request_number: pr,
            success_url: "https://o.github.io/r/PR/2".into(),
            log_url: "https://o.github.io/r/PR/2/dockyard-build.log".into(),
        }
    }

    #[tokio::test]
    async fn pr_reporter_without_a_pr_number_sends_nothing() {
        // Nothing to assert on the network side without a mock server;
        // this just exercises the early-return path for coverage.
        let reporter = PrCommentReporter::new("token");
        reporter.exit(&context(None), &Ok(BuildOutcome::Success)).await;
    }
}
