//! Git coupling for the workspace
//!
//! Optional capability: phase branches and squash commits give reviewers a
//! commit-per-phase history, and the read-only history tools are exposed to
//! the agent. Everything shells out to git, matching how the rest of the
//! platform treats external processes.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use tokio::process::Command;
use tracing::{debug, warn};

/// Git operations scoped to one workspace root
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    root: PathBuf,
}

impl GitWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "git");
        let output = Command::new("git").args(args).current_dir(&self.root).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Whether the root is already a git repository
    pub async fn is_repo(&self) -> bool {
        Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(&self.root)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Initialize the repo with an initial commit, if not already one
    pub async fn init(&self) -> Result<()> {
        if self.is_repo().await {
            return Ok(());
        }
        self.git(&["init", "--initial-branch", "main"]).await?;
        self.git(&["add", "-A"]).await?;
        // Identity may be unset in fresh containers
        self.git(&[
            "-c",
            "user.name=agentworker",
            "-c",
            "user.email=agentworker@localhost",
            "commit",
            "--allow-empty",
            "-m",
            "workspace init",
        ])
        .await?;
        Ok(())
    }

    /// Stage everything and commit; quietly succeeds when nothing changed
    pub async fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"]).await?;
        let status = self.git(&["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            debug!("commit_all: nothing to commit");
            return Ok(());
        }
        self.git(&[
            "-c",
            "user.name=agentworker",
            "-c",
            "user.email=agentworker@localhost",
            "commit",
            "-m",
            message,
        ])
        .await?;
        Ok(())
    }

    /// Create and switch to a phase branch off the current HEAD
    pub async fn create_branch(&self, name: &str) -> Result<()> {
        self.git(&["checkout", "-b", name]).await?;
        Ok(())
    }

    pub async fn checkout(&self, name: &str) -> Result<()> {
        self.git(&["checkout", name]).await?;
        Ok(())
    }

    /// Squash-merge a phase branch into the current branch with one commit
    pub async fn squash_merge(&self, branch: &str, message: &str) -> Result<()> {
        self.git(&["merge", "--squash", branch]).await?;
        // --squash stages but does not commit
        let status = self.git(&["status", "--porcelain"]).await?;
        if !status.trim().is_empty() {
            self.git(&[
                "-c",
                "user.name=agentworker",
                "-c",
                "user.email=agentworker@localhost",
                "commit",
                "-m",
                message,
            ])
            .await?;
        }
        Ok(())
    }

    // Read-only history, exposed to the agent as tools

    pub async fn log(&self, max_count: usize) -> Result<String> {
        self.git(&["log", "--oneline", "-n", &max_count.to_string()]).await
    }

    pub async fn diff(&self, rev: Option<&str>) -> Result<String> {
        match rev {
            Some(rev) => self.git(&["diff", rev]).await,
            None => self.git(&["diff", "HEAD"]).await,
        }
    }

    pub async fn show(&self, rev: &str) -> Result<String> {
        self.git(&["show", "--stat", rev]).await
    }

    pub async fn status(&self) -> Result<String> {
        self.git(&["status", "--porcelain"]).await
    }

    /// Best-effort phase boundary commit; failures are logged, not fatal,
    /// because git is an optional capability.
    pub async fn try_commit_phase(&self, phase_number: u32, phase_type: &str, summary: &str) {
        let message = format!("phase {} ({}): {}", phase_number, phase_type, summary);
        if let Err(e) = self.commit_all(&message).await {
            warn!(error = %e, "phase commit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_init_and_commit() {
        if !git_available().await {
            return;
        }

        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("plan.md"), "plan").unwrap();

        let git = GitWorkspace::new(temp.path());
        git.init().await.unwrap();
        assert!(git.is_repo().await);

        // Init is idempotent
        git.init().await.unwrap();

        std::fs::write(temp.path().join("new.txt"), "content").unwrap();
        git.commit_all("add new file").await.unwrap();

        let log = git.log(10).await.unwrap();
        assert!(log.contains("add new file"));
    }

    #[tokio::test]
    async fn test_commit_all_empty_is_ok() {
        if !git_available().await {
            return;
        }

        let temp = tempdir().unwrap();
        let git = GitWorkspace::new(temp.path());
        git.init().await.unwrap();

        // No changes staged
        git.commit_all("noop").await.unwrap();
        let log = git.log(10).await.unwrap();
        assert!(!log.contains("noop"));
    }

    #[tokio::test]
    async fn test_phase_branch_flow() {
        if !git_available().await {
            return;
        }

        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("seed.txt"), "seed").unwrap();

        let git = GitWorkspace::new(temp.path());
        git.init().await.unwrap();

        git.create_branch("phase-1-strategic").await.unwrap();
        std::fs::write(temp.path().join("plan.md"), "the plan").unwrap();
        git.commit_all("draft plan").await.unwrap();

        git.checkout("main").await.unwrap();
        git.squash_merge("phase-1-strategic", "phase 1 (strategic): planning complete")
            .await
            .unwrap();

        let log = git.log(10).await.unwrap();
        assert!(log.contains("phase 1 (strategic)"));
    }
}
