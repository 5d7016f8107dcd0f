//! GitHub-specific webhook interpretation and status reporting.
//!
//! Due to the `WebhookInterpreter` interface, this implementation must
//! handle all of its own error cases: an unparsable body or an
//! uninteresting action yields an empty vector of events rather than
//! propagating, except for event types this table has no row for at all,
//! which are surfaced as internal errors by the caller's routing table.
#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod status;

use dockyard_core::dispatch::{VcsEvent, WebhookInterpreter};
use dockyard_core::error::DockyardError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    clone_url: String,
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    ref_type: String,
    #[serde(rename = "ref")]
    git_ref: String,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    sha: String,
    #[serde(rename = "ref")]
    git_ref: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestData {
    number: u64,
    merged: bool,
    head: BranchRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequestData,
    repository: RepositoryPayload,
}

/// Interprets GitHub webhook deliveries: signature verification against
/// the shared secret, and parsing of `ping`/`push`/`create`/`pull_request`
/// payloads into forge-agnostic `VcsEvent`s.
#[derive(Debug)]
pub struct GithubInterpreter {
    hmac_token: String,
}

impl GithubInterpreter {
    pub fn new(hmac_token: impl Into<String>) -> Self {
        GithubInterpreter { hmac_token: hmac_token.into() }
    }

    /// Verifies the `X-Hub-Signature` header against `raw_body` using
    /// constant-time comparison. GitHub's legacy signature scheme:
    /// `sha1=<hex-hmac-sha1(secret, raw_body)>`.
    pub fn verify_signature(&self, signature_header: Option<&str>, raw_body: &[u8]) -> bool {
        let Some(header) = signature_header else { return false };
        let Some(hex_digest) = header.strip_prefix("sha1=") else { return false };
        let Ok(expected) = hex::decode(hex_digest) else { return false };

        let Ok(mut mac) = HmacSha1::new_from_slice(self.hmac_token.as_bytes()) else { return false };
        mac.update(raw_body);
        mac.verify_slice(&expected).is_ok()
    }
}

impl WebhookInterpreter for GithubInterpreter {
    fn interpret(&self, event_type: &str, body: &[u8]) -> Result<Vec<VcsEvent>, DockyardError> {
        match event_type {
            "ping" => Ok(vec![VcsEvent::Ping]),

            "push" => {
                let payload: PushPayload = parse(body)?;
                match payload.git_ref.strip_prefix(BRANCH_REF_PREFIX) {
                    Some(branch) => Ok(vec![VcsEvent::Push {
                        repo: payload.repository.clone_url,
                        repo_slug: payload.repository.full_name,
                        branch: branch.to_owned(),
                        sha: payload.after,
                    }]),
                    // A tag push (or other ref kind) arrives as `create`, not `push`.
                    None => Ok(vec![]),
                }
            }

            "create" => {
                let payload: CreatePayload = parse(body)?;
                if payload.ref_type == "tag" {
                    Ok(vec![VcsEvent::TagPush {
                        repo: payload.repository.clone_url,
                        repo_slug: payload.repository.full_name,
                        tag: payload.git_ref,
                    }])
                } else {
                    Ok(vec![])
                }
            }

            "pull_request" => {
                let payload: PullRequestPayload = parse(body)?;
                match payload.action.as_str() {
                    "opened" | "reopened" | "synchronize" => Ok(vec![VcsEvent::PullRequestOpened {
                        repo: payload.repository.clone_url,
                        repo_slug: payload.repository.full_name,
                        number: payload.pull_request.number,
                        sha: payload.pull_request.head.sha,
                        source_branch: payload.pull_request.head.git_ref,
                    }]),
                    "closed" => Ok(vec![VcsEvent::PullRequestClosed {
                        repo: payload.repository.clone_url,
                        number: payload.pull_request.number,
                        merged: payload.pull_request.merged,
                    }]),
                    _ => Ok(vec![]),
                }
            }

            other => Err(DockyardError::Internal(format!("unsupported webhook event type: {}", other))),
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, DockyardError> {
    serde_json::from_slice(body).map_err(|e| DockyardError::ClientInput(format!("expected json: {}", e)))
}
