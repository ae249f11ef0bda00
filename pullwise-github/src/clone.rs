//! Shallow clones through the git CLI

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Clone only the tip of `branch` from `url` into `target`
///
/// `target` must not exist or be empty. The child process is killed if the
/// returned future is dropped.
pub async fn shallow_clone(url: &str, branch: &str, target: &Path) -> Result<()> {
    debug!(url, branch, target = %target.display(), "git clone --depth=1");

    let output = Command::new("git")
        .arg("clone")
        .arg("--depth=1")
        .arg("--single-branch")
        .arg("--branch")
        .arg(branch)
        .arg(url)
        .arg(target)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Git(format!("Failed to run git clone: {}", e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_clone_failure(url, branch, &stderr))
}

fn classify_clone_failure(url: &str, branch: &str, stderr: &str) -> Error {
    if stderr.contains("Authentication failed") || stderr.contains("Permission denied") {
        return Error::Auth(format!(
            "Authentication failed for {}. Check your credentials or repository access.",
            url
        ));
    }

    if stderr.contains("Remote branch") && stderr.contains("not found") {
        return Error::Git(format!("Branch {} not found in {}", branch, url));
    }

    if stderr.contains("Could not resolve host") || stderr.contains("unable to access") {
        return Error::Git(format!("Network error cloning {}: {}", url, stderr.trim()));
    }

    Error::Git(format!("git clone failed: {}", stderr.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git_available() -> bool {
        StdCommand::new("git").arg("--version").output().is_ok()
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    /// A local repository with one commit on branch `fix-1`
    fn fixture_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "--quiet"]);
        git(dir.path(), &["checkout", "--quiet", "-b", "fix-1"]);
        std::fs::write(dir.path().join("main.go"), "package main\n\nfunc main() {}\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(
            dir.path(),
            &[
                "-c",
                "user.name=Test",
                "-c",
                "user.email=test@example.com",
                "commit",
                "--quiet",
                "-m",
                "initial",
            ],
        );
        dir
    }

    #[tokio::test]
    async fn test_shallow_clone_of_branch() {
        if !git_available() {
            return;
        }
        let origin = fixture_repo();
        let target = TempDir::new().unwrap();
        let checkout = target.path().join("clone");
        let url = format!("file://{}", origin.path().display());

        shallow_clone(&url, "fix-1", &checkout).await.unwrap();
        assert!(checkout.join("main.go").exists());
    }

    #[tokio::test]
    async fn test_missing_branch_fails() {
        if !git_available() {
            return;
        }
        let origin = fixture_repo();
        let target = TempDir::new().unwrap();
        let url = format!("file://{}", origin.path().display());

        let err = shallow_clone(&url, "no-such-branch", &target.path().join("clone"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Git(_)));
    }

    #[test]
    fn test_classify_auth_failure() {
        let err = classify_clone_failure(
            "https://github.com/acme/private.git",
            "main",
            "fatal: Authentication failed for 'https://github.com/acme/private.git/'",
        );
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_classify_missing_branch() {
        let err = classify_clone_failure(
            "https://github.com/acme/widget.git",
            "fix-9",
            "warning: Could not find remote branch fix-9 to clone.\nfatal: Remote branch fix-9 not found in upstream origin",
        );
        assert!(err.to_string().contains("Branch fix-9 not found"));
    }
}
