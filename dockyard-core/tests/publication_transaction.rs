//! End-to-end exercises of the Publication Transaction against a real,
//! local bare git repository standing in for the publication repo. These
//! cover the testable properties from the spec: no push when the
//! mutation produces no changes, and a clean round-trip deploy.

use std::path::PathBuf;
use std::process::Command;

use dockyard_core::error::DeployError;
use dockyard_core::publication::PublicationTransaction;
use tokio_util::sync::CancellationToken;

struct BareRepo {
    dir: tempfile::TempDir,
}

impl BareRepo {
    /// A fresh bare repo with an empty initial commit already on
    /// `gh-pages` — matching how a real GitHub Pages branch is seeded
    /// before this service ever runs a transaction against it. Without
    /// this, the transaction's `fetch --depth 1 origin gh-pages` would
    /// have no ref to fetch.
    fn init() -> Self {
        let dir = tempfile::tempdir().unwrap();
        run(&["init", "--bare", "--initial-branch=gh-pages"], dir.path());

        let seed = tempfile::tempdir().unwrap();
        run(&["clone", dir.path().to_str().unwrap(), seed.path().to_str().unwrap()], seed.path().parent().unwrap());
        std::fs::write(seed.path().join(".seed"), "").unwrap();
        run(&["add", "-A"], seed.path());
        run(&["commit", "-m", "seed"], seed.path());
        run(&["push", "origin", "gh-pages"], seed.path());

        BareRepo { dir }
    }

    fn url(&self) -> String {
        self.dir.path().to_str().unwrap().to_owned()
    }

    /// Clones the bare repo into a scratch directory and lists the
    /// `publication_path` subtree's file names, for assertions.
    fn ls(&self, publication_path: &str) -> Vec<String> {
        let scratch = tempfile::tempdir().unwrap();
        run(&["clone", &self.url(), scratch.path().to_str().unwrap()], scratch.path().parent().unwrap());
        let target = scratch.path().join(publication_path);
        if !target.exists() {
            return Vec::new();
        }
        let mut names: Vec<String> =
            std::fs::read_dir(target).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        names.sort();
        names
    }
}

fn run(args: &[&str], cwd: &std::path::Path) {
    let status = Command::new("git").args(args).current_dir(cwd).status().expect("git available in test environment");
    assert!(status.success(), "git {:?} failed in {:?}", args, cwd);
}

/// The Publication Transaction shells out to `git commit` with no stdin
/// and no `-c` overrides, so a committer identity must already be
/// configured in the environment these tests run under.
fn ensure_git_identity() {
    for (key, value) in [
        ("GIT_AUTHOR_NAME", "dockyard-tests"),
        ("GIT_AUTHOR_EMAIL", "dockyard-tests@example.com"),
        ("GIT_COMMITTER_NAME", "dockyard-tests"),
        ("GIT_COMMITTER_EMAIL", "dockyard-tests@example.com"),
    ] {
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
        }
    }
}

#[tokio::test]
async fn mutation_with_no_changes_produces_no_push() {
    ensure_git_identity();
    let repo = BareRepo::init();
    let transaction = PublicationTransaction::new();
    let cancel = CancellationToken::new();

    // First deploy creates a file.
    transaction
        .transact(&repo.url(), "Deploy dev/master", &cancel, |workspace: PathBuf| async move {
            std::fs::create_dir_all(workspace.join("dev/master")).unwrap();
            std::fs::write(workspace.join("dev/master/index.html"), "hello").unwrap();
            Ok::<(), DeployError>(())
        })
        .await
        .unwrap();

    assert_eq!(repo.ls("dev/master"), vec!["index.html".to_owned()]);

    // Second deploy writes the identical content: nothing to commit, no push,
    // but the transaction must still complete successfully.
    let result = transaction
        .transact(&repo.url(), "Deploy dev/master", &cancel, |workspace: PathBuf| async move {
            std::fs::create_dir_all(workspace.join("dev/master")).unwrap();
            std::fs::write(workspace.join("dev/master/index.html"), "hello").unwrap();
            Ok::<(), DeployError>(())
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(repo.ls("dev/master"), vec!["index.html".to_owned()]);
}

#[tokio::test]
async fn undeploy_leaves_the_publication_subtree_absent() {
    ensure_git_identity();
    let repo = BareRepo::init();
    let transaction = PublicationTransaction::new();
    let cancel = CancellationToken::new();

    transaction
        .transact(&repo.url(), "Deploy PR/7", &cancel, |workspace: PathBuf| async move {
            std::fs::create_dir_all(workspace.join("PR/7")).unwrap();
            std::fs::write(workspace.join("PR/7/index.html"), "preview").unwrap();
            Ok::<(), DeployError>(())
        })
        .await
        .unwrap();
    assert_eq!(repo.ls("PR/7"), vec!["index.html".to_owned()]);

    transaction
        .transact(&repo.url(), "Undeploy", &cancel, |workspace: PathBuf| async move {
            let target = workspace.join("PR/7");
            if target.exists() {
                std::fs::remove_dir_all(target).unwrap();
            }
            Ok::<(), DeployError>(())
        })
        .await
        .unwrap();

    assert!(repo.ls("PR/7").is_empty());
}
