//! Scoped status reporting. A reporter posts a `pending` status on entry
//! (where the target has an entry concept at all) and a terminal status
//! on exit, derived from the pipeline's outcome and any propagated error.
//!
//! Rust has no reliable async `Drop`, so the "scoped construct" from the
//! original design is not a guard value with a destructor: callers invoke
//! `enter()` then, in a `match`/`?`-wrapped block around the pipeline
//! call, `exit()` with whatever result they got. This is a deliberate
//! redesign, not an oversight.

use async_trait::async_trait;

use crate::error::DockyardError;
use crate::pipeline::{BuildOutcome, ReportingContext};

/// The terminal state a reporter implementation should post, already
/// classified from the pipeline's result. Shared across every forge's
/// reporter so the classification rule lives in one place.
#[derive(Debug, Clone)]
pub enum ReportedState {
    Success { url: String },
    SuccessWithWarning { success_url: String, log_url: String },
    Failure { description: String, url: Option<String> },
    Error { description: String },
}

/// Maps a pipeline result to the state a reporter should post, per the
/// Status Reporter contract: a `SubprocessError` is reported as a
/// failure carrying its description; any other error is reported as
/// `error` carrying the error's class name; otherwise the state follows
/// the Build Outcome directly (a `Failure` outcome links to the build
/// log, since the log itself is the artifact on a failed build).
pub fn classify(context: &ReportingContext, result: &Result<BuildOutcome, DockyardError>) -> ReportedState {
    match result {
        Ok(BuildOutcome::Success) => ReportedState::Success { url: context.success_url.clone() },
        Ok(BuildOutcome::Warning) => ReportedState::SuccessWithWarning {
            success_url: context.success_url.clone(),
            log_url: context.log_url.clone(),
        },
        Ok(BuildOutcome::Failure) => {
            ReportedState::Failure { description: "build failed".to_owned(), url: Some(context.log_url.clone()) }
        }
        Err(DockyardError::Subprocess(e)) => {
            ReportedState::Failure { description: e.message.clone(), url: None }
        }
        Err(other) => ReportedState::Error { description: other.class_name().to_string() },
    }
}

/// Posts build-status feedback to a code-forge. Network failures when
/// posting are logged by the implementation but must not re-raise:
/// status reporting is best-effort and must never shadow the pipeline's
/// real outcome.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Called once, before the pipeline runs. The default does nothing,
    /// which is correct for reporters with no "pending" concept (a PR
    /// comment reporter posts only at exit).
    async fn enter(&self, _context: &ReportingContext) {}

    /// Called once, after the pipeline has produced a result (or been
    /// cancelled, represented as an `Internal` error by the caller).
    async fn exit(&self, context: &ReportingContext, result: &Result<BuildOutcome, DockyardError>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubprocessError;

    fn context() -> ReportingContext {
        ReportingContext {
            repo_slug: "o/r".into(),
            commit_sha: Some("abcd".into()),
            pull_request_number: None,
            success_url: "https://o.github.io/r/dev/master".into(),
            log_url: "https://o.github.io/r/dev/master/app.log".into(),
        }
    }

    #[test]
    fn success_links_to_success_url() {
        let state = classify(&context(), &Ok(BuildOutcome::Success));
        matches!(state, ReportedState::Success { .. });
    }

    #[test]
    fn warning_links_to_both_urls() {
        match classify(&context(), &Ok(BuildOutcome::Warning)) {
            ReportedState::SuccessWithWarning { success_url, log_url } => {
                assert_eq!(success_url, "https://o.github.io/r/dev/master");
                assert_eq!(log_url, "https://o.github.io/r/dev/master/app.log");
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn subprocess_error_is_a_failure_not_an_error_state() {
        let err = DockyardError::Subprocess(SubprocessError::new("git clone failed", Some(128)));
        match classify(&context(), &Err(err)) {
            ReportedState::Failure { description, url } => {
                assert!(description.contains("git clone failed"));
                assert!(url.is_none());
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn failure_outcome_links_to_the_build_log() {
        match classify(&context(), &Ok(BuildOutcome::Failure)) {
            ReportedState::Failure { url, .. } => {
                assert_eq!(url.as_deref(), Some("https://o.github.io/r/dev/master/app.log"))
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn other_errors_surface_as_error_state() {
        let err = DockyardError::Internal("panic in mutation".into());
        match classify(&context(), &Err(err)) {
            ReportedState::Error { description } => assert_eq!(description, "InternalError"),
            other => panic!("unexpected state: {:?}", other),
        }
    }
}
