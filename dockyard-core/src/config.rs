//! Process configuration, assembled once at startup and shared
//! read-only (behind `Arc`) into every task.

use std::env;

const DEFAULT_ALLOWED_BRANCHES: &[&str] = &["master", "asciidoctor-mvn"];
const DEFAULT_APP_NAME: &str = "dockyard-build";

/// Raised when required environment configuration is missing. The CLI
/// surface treats this as a startup failure (non-zero exit).
#[derive(Debug, thiserror::Error)]
#[error("missing required environment variable: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer credential for git-push authentication (embedded in the
    /// HTTPS remote URL) and for code-forge REST calls.
    pub github_token: String,
    /// Shared secret for webhook signature verification.
    pub github_hmac_token: String,
    /// `owner/repo` for branch/tag publications.
    pub pages_stub: String,
    /// `owner/repo` for PR publications; may differ from `pages_stub`.
    pub pages_pr_stub: String,
    /// Branches a `push` event is allowed to deploy. The original
    /// service hard-codes this list; here it is still the default but
    /// may be overridden with a comma-separated `GITHUB_ALLOWED_BRANCHES`.
    pub allowed_branches: Vec<String>,
    /// Short name used for the build log file name and the source
    /// workspace parent directory.
    pub app_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let github_token = require_env("GITHUB_TOKEN")?;
        let github_hmac_token = require_env("GITHUB_HMAC_TOKEN")?;
        let pages_stub = require_env("GITHUB_PAGES_STUB")?;
        let pages_pr_stub = env::var("GITHUB_PAGES_PR_STUB").unwrap_or_else(|_| pages_stub.clone());

        let allowed_branches = env::var("GITHUB_ALLOWED_BRANCHES")
            .map(|raw| raw.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|_| DEFAULT_ALLOWED_BRANCHES.iter().map(|s| s.to_string()).collect());

        let app_name = env::var("DOCKYARD_APP_NAME").unwrap_or_else(|_| DEFAULT_APP_NAME.to_string());

        Ok(Config {
            github_token,
            github_hmac_token,
            pages_stub,
            pages_pr_stub,
            allowed_branches,
            app_name,
        })
    }

    /// An HTTPS remote URL for `stub` with the token embedded for push
    /// authentication.
    pub fn publication_repo_url(&self, stub: &str) -> String {
        format!("https://{}@github.com/{}.git", self.github_token, stub)
    }

    /// The `https://<owner>.github.io/<repo>/<path>` URL a publication
    /// path is served from.
    pub fn pages_url(stub: &str, path: &str) -> String {
        let mut parts = stub.splitn(2, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        format!("https://{}.github.io/{}/{}", owner, repo, path)
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_url_splits_owner_and_repo() {
        assert_eq!(Config::pages_url("o/r", "dev/master"), "https://o.github.io/r/dev/master");
    }
}
