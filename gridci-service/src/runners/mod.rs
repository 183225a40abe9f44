// Runners Module
// Step execution: shell scripts, built-in actions, toolchains and workspaces

pub mod actions;
pub mod file_commands;
pub mod shell;
pub mod toolchain;
pub mod workspace;

// Re-export key types
pub use actions::{BuiltinAction, ToolchainRequest};
pub use file_commands::{FileCommandResults, FileCommands};
pub use shell::{Shell, ShellConfig, ShellOutput, ShellRunner};
pub use toolchain::{RustupInstaller, ToolchainInstaller};
pub use workspace::CellWorkspace;

use std::sync::Arc;

/// The runners available to a cell
#[derive(Clone)]
pub struct RunnerRegistry {
    shell: ShellRunner,
    installer: Arc<dyn ToolchainInstaller>,
}

impl RunnerRegistry {
    /// Create a registry with the default shell runner
    pub fn new(installer: Arc<dyn ToolchainInstaller>) -> Self {
        Self {
            shell: ShellRunner::new(),
            installer,
        }
    }

    /// Replace the shell runner
    pub fn with_shell(mut self, shell: ShellRunner) -> Self {
        self.shell = shell;
        self
    }

    pub fn shell(&self) -> &ShellRunner {
        &self.shell
    }

    pub fn installer(&self) -> &dyn ToolchainInstaller {
        self.installer.as_ref()
    }
}
