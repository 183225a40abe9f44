// Toolchain Provisioning
// Installs the toolchain a cell is pinned to

use crate::error::{ServiceError, ServiceResult};
use crate::runners::actions::ToolchainRequest;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use std::path::PathBuf;

/// Installs toolchains on the host
#[async_trait]
pub trait ToolchainInstaller: Send + Sync {
    /// Install the requested toolchain with its targets and components.
    ///
    /// Returns the installer's log on success.
    async fn install(&self, request: &ToolchainRequest) -> ServiceResult<String>;
}

/// Installs toolchains through `rustup`
pub struct RustupInstaller {
    rustup: PathBuf,
    // rustup shares one home directory across cells; installs go one at a time
    lock: Mutex<()>,
}

impl RustupInstaller {
    pub fn new(rustup: PathBuf) -> Self {
        Self {
            rustup,
            lock: Mutex::new(()),
        }
    }

    /// Find `rustup` on PATH
    pub fn locate() -> ServiceResult<Self> {
        which::which("rustup")
            .map(Self::new)
            .map_err(|e| ServiceError::NotFound(format!("rustup executable: {}", e)))
    }

    /// Arguments for `rustup toolchain install`
    pub fn install_args(request: &ToolchainRequest) -> Vec<String> {
        let mut args = vec![
            "toolchain".to_string(),
            "install".to_string(),
            request.channel.clone(),
            "--no-self-update".to_string(),
        ];
        if let Some(profile) = &request.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        for target in &request.targets {
            args.push("--target".to_string());
            args.push(target.clone());
        }
        for component in &request.components {
            args.push("--component".to_string());
            args.push(component.clone());
        }
        args
    }
}

#[async_trait]
impl ToolchainInstaller for RustupInstaller {
    async fn install(&self, request: &ToolchainRequest) -> ServiceResult<String> {
        let _guard = self.lock.lock().await;
        tracing::info!(channel = %request.channel, targets = ?request.targets, "installing toolchain");

        let output = Command::new(&self.rustup)
            .args(Self::install_args(request))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ServiceError::Provisioning(format!(
                    "failed to run {}: {}",
                    self.rustup.display(),
                    e
                ))
            })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ServiceError::Provisioning(format!(
                "rustup could not install '{}': {}",
                request.channel,
                log.trim()
            )));
        }

        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> ToolchainRequest {
        ToolchainRequest {
            channel: "nightly".to_string(),
            profile: Some("minimal".to_string()),
            targets: vec!["thumbv6m-none-eabi".to_string()],
            components: vec!["rust-src".to_string()],
            pin: true,
        }
    }

    #[test]
    fn test_install_args() {
        assert_eq!(
            RustupInstaller::install_args(&request()),
            vec![
                "toolchain",
                "install",
                "nightly",
                "--no-self-update",
                "--profile",
                "minimal",
                "--target",
                "thumbv6m-none-eabi",
                "--component",
                "rust-src",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_install_is_provisioning_error() {
        // `false` stands in for a rustup that always fails
        let Ok(fake) = which::which("false") else {
            return;
        };
        let installer = RustupInstaller::new(fake);

        let err = installer.install(&request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Provisioning(_)));
        assert!(err.to_string().contains("nightly"));
    }

    #[tokio::test]
    async fn test_successful_install_returns_log() {
        let Ok(fake) = which::which("echo") else {
            return;
        };
        let installer = RustupInstaller::new(fake);

        let log = installer.install(&request()).await.unwrap();
        assert!(log.contains("toolchain install nightly"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_install_is_killed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("installed");
        let fake = dir.path().join("rustup");
        std::fs::write(
            &fake,
            format!("#!/bin/sh\nsleep 1\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        let installer = RustupInstaller::new(fake);

        let result =
            tokio::time::timeout(Duration::from_millis(100), installer.install(&request())).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!marker.exists());
    }
}
