// Repository Helpers
// Locating the repository and reading its current ref and revision

use crate::workflow::GitRef;

use std::path::{Path, PathBuf};
use std::process::Command;

/// Walk up from `start` to the first directory holding `.git`
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().ok()?;
    start
        .ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}

/// The repository containing the current directory, or the current directory
/// itself outside a repository
pub fn resolve_source_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_repo_root(&cwd).unwrap_or(cwd)
}

/// Commit checked out in `repo`
pub fn head_revision(repo: &Path) -> Option<String> {
    git_stdout(repo, &["rev-parse", "HEAD"])
}

/// Branch checked out in `repo`; on a detached HEAD, a tag pointing at it.
pub fn current_ref(repo: &Path) -> Option<GitRef> {
    if let Some(branch) = git_stdout(repo, &["symbolic-ref", "--quiet", "--short", "HEAD"]) {
        return Some(GitRef::Branch(branch));
    }
    git_stdout(repo, &["describe", "--tags", "--exact-match", "HEAD"]).map(GitRef::Tag)
}

fn git_stdout(repo: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    fn git(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(repo)
            .env("GIT_AUTHOR_NAME", "ci")
            .env("GIT_AUTHOR_EMAIL", "ci@example.com")
            .env("GIT_COMMITTER_NAME", "ci")
            .env("GIT_COMMITTER_EMAIL", "ci@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn test_find_repo_root_from_nested_dir() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir(root.join(".git")).unwrap();
        let sub = root.join("firmware").join("src");
        fs::create_dir_all(&sub).unwrap();

        assert_eq!(find_repo_root(&sub).unwrap(), root.canonicalize().unwrap());
        assert_eq!(find_repo_root(root).unwrap(), root.canonicalize().unwrap());
    }

    #[test]
    fn test_find_repo_root_missing_path() {
        assert!(find_repo_root(Path::new("/nonexistent/path/that/does/not/exist")).is_none());
    }

    #[test]
    fn test_resolve_source_dir_exists() {
        assert!(resolve_source_dir().exists());
    }

    #[test]
    fn test_ref_and_revision() {
        if which::which("git").is_err() {
            return;
        }
        let temp = tempfile::tempdir().unwrap();
        let repo = temp.path();

        git(repo, &["init", "--quiet"]);
        git(repo, &["checkout", "--quiet", "-b", "master"]);
        fs::write(repo.join("build.sh"), "echo ok\n").unwrap();
        git(repo, &["add", "build.sh"]);
        git(repo, &["commit", "--quiet", "-m", "init"]);

        assert_eq!(current_ref(repo), Some(GitRef::Branch("master".to_string())));
        let revision = head_revision(repo).unwrap();
        assert_eq!(revision.len(), 40);

        git(repo, &["tag", "v0.1.0"]);
        git(repo, &["checkout", "--quiet", "--detach", "HEAD"]);
        assert_eq!(current_ref(repo), Some(GitRef::Tag("v0.1.0".to_string())));
    }

    #[test]
    fn test_no_revision_outside_repo() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("plain");
        fs::create_dir_all(&dir).unwrap();
        // A temp dir may itself sit inside a repository; only assert when it does not
        if find_repo_root(&dir).is_none() {
            assert!(head_revision(&dir).is_none());
            assert!(current_ref(&dir).is_none());
        }
    }
}
