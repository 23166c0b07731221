/// Common test utilities: a bare "remote" repository plus a workspace to sync into
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use orga_sync::RepoDescriptor;

pub const BRANCH: &str = "master";

/// Whether a git client is installed at all
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity and no prompts, returning stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_AUTHOR_NAME", "Test Instructor")
        .env("GIT_AUTHOR_EMAIL", "instructor@example.com")
        .env("GIT_COMMITTER_NAME", "Test Instructor")
        .env("GIT_COMMITTER_EMAIL", "instructor@example.com")
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote with one commit on `master`, and an empty workspace
pub struct GitFixture {
    pub temp_dir: TempDir,
    pub remote: PathBuf,
    pub seed: PathBuf,
    pub workspace: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let remote = root.join("remote.git");
        let seed = root.join("seed");
        let workspace = root.join("workspace");
        std::fs::create_dir_all(&workspace).expect("Failed to create workspace");

        git(root, &["init", "--bare", "remote.git"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/master"]);

        git(root, &["init", "seed"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);

        let fixture = Self {
            temp_dir,
            remote,
            seed,
            workspace,
        };
        fixture.commit_upstream("README.md", "# Homework 1\n");
        fixture
    }

    /// Commit a file through the seed clone and push it, returning the new head
    pub fn commit_upstream(&self, file: &str, content: &str) -> String {
        std::fs::write(self.seed.join(file), content).expect("Failed to write file");
        git(&self.seed, &["add", file]);
        git(&self.seed, &["commit", "-m", &format!("Update {}", file)]);
        git(&self.seed, &["push", "origin", BRANCH]);
        git(&self.seed, &["rev-parse", "HEAD"])
    }

    /// Current head of `branch` in the remote, if the branch exists
    pub fn remote_head(&self, branch: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)])
            .current_dir(&self.remote)
            .output()
            .expect("Failed to execute git");

        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Descriptor as discovery would produce it right now
    pub fn descriptor(&self, name: &str, branch: &str) -> RepoDescriptor {
        let repo = RepoDescriptor::new(name, self.remote.to_str().unwrap());
        match self.remote_head(branch) {
            Some(head) => repo.with_revision(branch, head),
            None => repo,
        }
    }

    pub fn working_copy(&self, name: &str) -> PathBuf {
        self.workspace.join(name)
    }
}
