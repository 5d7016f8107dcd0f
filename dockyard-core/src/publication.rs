//! Fetch/mutate/commit/push cycle against the static-hosting branch, with
//! optimistic-concurrency retry.
//!
//! Steps 1-3 of the protocol are redone on every retry because the local
//! state must reflect the remote tip; a full re-init is simpler than
//! trying to reuse the previous attempt's clone and is explicitly
//! acceptable per the retry contract.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::error::DeployError;
use crate::subprocess::{RunOptions, SubprocessRunner};

const STATIC_BRANCH: &str = "gh-pages";
const MAX_ATTEMPTS: u32 = 6;

enum AttemptResult {
    Done,
    Retry,
}

/// Clones the publication repository shallowly, applies a caller-supplied
/// mutation to the working tree, then commits and pushes.
#[derive(Debug, Clone, Default)]
pub struct PublicationTransaction {
    runner: SubprocessRunner,
}

impl PublicationTransaction {
    pub fn new() -> Self {
        PublicationTransaction { runner: SubprocessRunner::new() }
    }

    /// Runs the transaction to completion (commit, or commit and push) or
    /// raises a `DeployError` once the push retry budget is exhausted.
    ///
    /// `mutation` receives the workspace path on every attempt; it must
    /// confine its changes to the caller's publication path subtree.
    pub async fn transact<F, Fut>(
        &self,
        publication_url: &str,
        commit_message: &str,
        cancel: &CancellationToken,
        mut mutation: F,
    ) -> Result<(), DeployError>
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), DeployError>>,
    {
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff_secs = 2 * (2u64.pow(attempt) - 1);
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let workspace = tempfile::tempdir()
                .map_err(|e| DeployError::new(format!("workspace creation failed: {}", e)))?;

            match self
                .attempt(publication_url, commit_message, cancel, &mut mutation, workspace.path())
                .await?
            {
                AttemptResult::Done => return Ok(()),
                AttemptResult::Retry => continue,
            }
        }

        Err(DeployError::new(format!(
            "exhausted {} push attempts against {}",
            MAX_ATTEMPTS, publication_url
        )))
    }

    async fn attempt<F, Fut>(
        &self,
        publication_url: &str,
        commit_message: &str,
        cancel: &CancellationToken,
        mutation: &mut F,
        workspace: &Path,
    ) -> Result<AttemptResult, DeployError>
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), DeployError>>,
    {
        let ws = workspace
            .to_str()
            .ok_or_else(|| DeployError::new("workspace path is not utf-8"))?;

        self.git(&["init"], ws, "git init", cancel).await?;
        self.git(&["remote", "add", "origin", publication_url], ws, "git remote add", cancel).await?;
        self.git(&["fetch", "--depth", "1", "origin", STATIC_BRANCH], ws, "git fetch", cancel).await?;
        self.git(&["reset", "--hard", "FETCH_HEAD"], ws, "git reset", cancel).await?;

        let branch_name = now_unix_seconds().to_string();
        self.git(&["checkout", "-b", &branch_name], ws, "git checkout -b", cancel).await?;

        mutation(workspace.to_path_buf()).await?;

        self.git(&["add", "-A"], ws, "git add", cancel).await?;

        let commit = self
            .runner
            .run(
                "git",
                &["-C", ws, "commit", "-m", commit_message],
                RunOptions::capture().error_ok(),
                "git commit",
                cancel,
            )
            .await
            .map_err(|e| DeployError::new(e.message))?;

        if !commit.success() {
            let output = commit.output.unwrap_or_default();
            if output.to_lowercase().contains("nothing to commit") {
                return Ok(AttemptResult::Done);
            }
            return Err(DeployError::new(format!("git commit failed: {}", output)));
        }

        let push = self
            .runner
            .run(
                "git",
                &["-C", ws, "push", "origin", &format!("{}:{}", branch_name, STATIC_BRANCH)],
                RunOptions::capture().error_ok(),
                "git push",
                cancel,
            )
            .await
            .map_err(|e| DeployError::new(e.message))?;

        Ok(if push.success() { AttemptResult::Done } else { AttemptResult::Retry })
    }

    async fn git(
        &self,
        args: &[&str],
        ws: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let mut full_args = vec!["-C", ws];
        full_args.extend_from_slice(args);
        self.runner
            .run("git", &full_args, RunOptions::capture(), message, cancel)
            .await
            .map_err(|e| DeployError::new(e.message))?;
        Ok(())
    }
}

fn now_unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_the_documented_sequence() {
        let expected = [2u64, 6, 14, 30, 62];
        for (attempt, expected_secs) in (1..=5u32).zip(expected.iter()) {
            let backoff = 2 * (2u64.pow(attempt) - 1);
            assert_eq!(backoff, *expected_secs);
        }
    }
}
