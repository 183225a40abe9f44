// Cell Workspace
// Per-cell scratch directory holding the checked-out sources

use crate::error::{ServiceError, ServiceResult};

use tempfile::TempDir;
use tokio::process::Command;

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directories skipped when copying a source tree without git
const COPY_SKIP: [&str; 2] = [".git", "target"];

enum WorkspaceRoot {
    Temporary(TempDir),
    Kept(PathBuf),
}

/// An isolated directory tree owned by one cell.
///
/// Removed on drop unless created with `keep`.
pub struct CellWorkspace {
    root: WorkspaceRoot,
    workspace: PathBuf,
    temp: PathBuf,
}

impl CellWorkspace {
    /// Create `<root>/workspace` and `<root>/temp` under the system temp dir
    pub fn create(label: &str, keep: bool) -> ServiceResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("gridci-{}-", sanitize(label)))
            .tempdir()?;

        let path = dir.path().to_path_buf();
        let workspace = path.join("workspace");
        let temp = path.join("temp");
        fs::create_dir_all(&workspace)?;
        fs::create_dir_all(&temp)?;

        let root = if keep {
            WorkspaceRoot::Kept(dir.keep())
        } else {
            WorkspaceRoot::Temporary(dir)
        };

        Ok(Self {
            root,
            workspace,
            temp,
        })
    }

    pub fn root(&self) -> &Path {
        match &self.root {
            WorkspaceRoot::Temporary(dir) => dir.path(),
            WorkspaceRoot::Kept(path) => path,
        }
    }

    /// `GITHUB_WORKSPACE`: where sources are checked out and steps run
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// `RUNNER_TEMP`: scratch space for the runner and its file commands
    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    pub fn is_kept(&self) -> bool {
        matches!(self.root, WorkspaceRoot::Kept(_))
    }

    /// Check out `source` into `subdir` of the workspace.
    ///
    /// Git repositories are cloned and moved to `revision` (HEAD when none);
    /// anything else is copied. Returns a one-line description.
    pub async fn checkout(
        &self,
        source: &Path,
        revision: Option<&str>,
        subdir: Option<&str>,
    ) -> ServiceResult<String> {
        let dest = match subdir {
            Some(sub) if !sub.is_empty() => self.workspace.join(sub),
            _ => self.workspace.clone(),
        };
        clear_dir(&dest)?;

        if source.join(".git").exists() && which::which("git").is_ok() {
            let clone: [&OsStr; 5] = [
                "clone".as_ref(),
                "--quiet".as_ref(),
                "--no-hardlinks".as_ref(),
                source.as_os_str(),
                dest.as_os_str(),
            ];
            git(&clone, None).await?;
            if let Some(revision) = revision {
                let checkout: [&OsStr; 4] = [
                    "checkout".as_ref(),
                    "--quiet".as_ref(),
                    "--detach".as_ref(),
                    revision.as_ref(),
                ];
                git(&checkout, Some(&dest)).await?;
            }
            Ok(format!(
                "Cloned {} at {} into {}",
                source.display(),
                revision.unwrap_or("HEAD"),
                dest.display()
            ))
        } else {
            let (from, to) = (source.to_path_buf(), dest.clone());
            tokio::task::spawn_blocking(move || copy_tree(&from, &to))
                .await
                .map_err(|e| ServiceError::Provisioning(format!("copy task failed: {}", e)))??;
            Ok(format!("Copied {} into {}", source.display(), dest.display()))
        }
    }
}

async fn git(args: &[&OsStr], cwd: Option<&Path>) -> ServiceResult<()> {
    let mut cmd = Command::new("git");
    cmd.args(args).kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| ServiceError::Provisioning(format!("failed to run git: {}", e)))?;
    if !output.status.success() {
        let command: Vec<_> = args.iter().map(|a| a.to_string_lossy()).collect();
        return Err(ServiceError::Provisioning(format!(
            "git {} failed: {}",
            command.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
    } else {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> ServiceResult<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if COPY_SKIP.iter().any(|skip| name == *skip) {
            continue;
        }

        let file_type = entry.file_type()?;
        let target = to.join(&name);
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}

/// Keep directory names readable: `ci (nightly, true)` -> `ci-nightly-true`
fn sanitize(label: &str) -> String {
    let mut out = String::new();
    for c in label.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').chars().take(48).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_cell_name() {
        assert_eq!(sanitize("ci (nightly, true)"), "ci-nightly-true");
        assert_eq!(sanitize("build"), "build");
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let workspace = CellWorkspace::create("ci (stable, false)", false).unwrap();
        let root = workspace.root().to_path_buf();
        assert!(workspace.workspace().is_dir());
        assert!(workspace.temp_dir().is_dir());
        assert!(!workspace.is_kept());

        drop(workspace);
        assert!(!root.exists());
    }

    #[test]
    fn test_kept_workspace_survives_drop() {
        let workspace = CellWorkspace::create("keep", true).unwrap();
        let root = workspace.root().to_path_buf();
        drop(workspace);

        assert!(root.exists());
        fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_copy_checkout_skips_git_and_target() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("build.sh"), "#!/bin/sh\n").unwrap();
        fs::create_dir_all(source.path().join("src")).unwrap();
        fs::write(source.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::create_dir_all(source.path().join("target/debug")).unwrap();

        let workspace = CellWorkspace::create("copy", false).unwrap();
        let message = workspace.checkout(source.path(), None, None).await.unwrap();

        assert!(message.starts_with("Copied"));
        assert!(workspace.workspace().join("build.sh").is_file());
        assert!(workspace.workspace().join("src/main.rs").is_file());
        assert!(!workspace.workspace().join("target").exists());
    }

    #[tokio::test]
    async fn test_cells_do_not_share_files() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("build.sh"), "echo hi\n").unwrap();

        let first = CellWorkspace::create("a", false).unwrap();
        let second = CellWorkspace::create("b", false).unwrap();
        first.checkout(source.path(), None, None).await.unwrap();
        second.checkout(source.path(), None, None).await.unwrap();

        fs::write(first.workspace().join("artifact.bin"), [0u8; 4]).unwrap();
        assert!(!second.workspace().join("artifact.bin").exists());
        assert_ne!(first.root(), second.root());
    }

    #[tokio::test]
    async fn test_git_checkout_at_revision() {
        if which::which("git").is_err() {
            return;
        }
        let source = tempfile::tempdir().unwrap();
        let repo = source.path();
        let run = |args: &[&str]| {
            let output = std::process::Command::new("git")
                .args(args)
                .current_dir(repo)
                .env("GIT_AUTHOR_NAME", "ci")
                .env("GIT_AUTHOR_EMAIL", "ci@example.com")
                .env("GIT_COMMITTER_NAME", "ci")
                .env("GIT_COMMITTER_EMAIL", "ci@example.com")
                .output()
                .unwrap();
            assert!(output.status.success(), "git {:?} failed", args);
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        };

        run(&["init", "--quiet"]);
        fs::write(repo.join("VERSION"), "1\n").unwrap();
        run(&["add", "VERSION"]);
        run(&["commit", "--quiet", "-m", "first"]);
        let first = run(&["rev-parse", "HEAD"]);
        fs::write(repo.join("VERSION"), "2\n").unwrap();
        run(&["commit", "--quiet", "-am", "second"]);

        let workspace = CellWorkspace::create("git", false).unwrap();
        workspace
            .checkout(repo, Some(&first), Some("firmware"))
            .await
            .unwrap();

        let version = fs::read_to_string(workspace.workspace().join("firmware/VERSION")).unwrap();
        assert_eq!(version, "1\n");
    }
}
