// Shell Runner
// Executes `run:` steps with bash, sh, pwsh or python

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// `bash --noprofile --norc -eo pipefail`
    Bash,
    /// `sh -e`
    Sh,
    /// PowerShell Core
    Pwsh,
    /// `python3`
    Python,
}

impl Shell {
    /// Parse a `shell:` value; `None` for unsupported shells
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "bash" => Some(Shell::Bash),
            "sh" => Some(Shell::Sh),
            "pwsh" | "powershell" => Some(Shell::Pwsh),
            "python" => Some(Shell::Python),
            _ => None,
        }
    }

    /// bash when installed, sh otherwise
    pub fn detect_default() -> Self {
        if which::which("bash").is_ok() {
            Shell::Bash
        } else {
            Shell::Sh
        }
    }

    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Bash => ("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            Shell::Sh => ("sh", &["-e", "-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
            Shell::Python => ("python3", &["-c"]),
        }
    }
}

/// Configuration for shell execution
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    /// Overrides the working directory passed to the runner
    pub working_dir: Option<PathBuf>,
    /// Kill the script after this long (None = no timeout)
    pub timeout: Option<Duration>,
}

/// Output collected during script execution
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when the process could not start or was killed
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn spawn_failure(message: String) -> Self {
        Self {
            stderr: message,
            ..Default::default()
        }
    }
}

/// Callback for handling output lines in real-time; the flag marks stderr
pub type OutputCallback = Box<dyn Fn(&str, bool) + Send + Sync>;

/// Shell runner for executing scripts
#[derive(Debug, Clone, Copy)]
pub struct ShellRunner {
    default_shell: Shell,
}

impl ShellRunner {
    /// Create a new shell runner with the detected default shell
    pub fn new() -> Self {
        Self {
            default_shell: Shell::detect_default(),
        }
    }

    /// Create a shell runner with a specific default shell
    pub fn with_default_shell(shell: Shell) -> Self {
        Self {
            default_shell: shell,
        }
    }

    pub fn default_shell(&self) -> Shell {
        self.default_shell
    }

    /// Execute a script using the default shell, collecting output
    pub async fn run_script(
        &self,
        script: &str,
        env: &HashMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
    ) -> ShellOutput {
        self.run_streaming(None, script, env, working_dir, config, Box::new(|_, _| {}))
            .await
    }

    /// Execute a script with real-time output streaming.
    ///
    /// `shell` falls back to the runner's default. `env` is added on top of
    /// the inherited process environment.
    pub async fn run_streaming(
        &self,
        shell: Option<Shell>,
        script: &str,
        env: &HashMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
        on_output: OutputCallback,
    ) -> ShellOutput {
        let (shell_cmd, shell_args) = shell.unwrap_or(self.default_shell).get_command();

        let work_dir = config.working_dir.as_deref().unwrap_or(working_dir);

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(script);
        cmd.current_dir(work_dir);
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ShellOutput::spawn_failure(format!(
                    "Failed to spawn shell process '{}': {}",
                    shell_cmd, e
                ))
            }
        };
        let mut group = ProcessGroup::new(child.id());

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            group.kill();
            let _ = child.kill().await;
            return ShellOutput::spawn_failure("Shell output pipes unavailable".to_string());
        };

        let on_output = Arc::new(on_output);
        let stdout_handle = stream_lines(stdout, false, on_output.clone());
        let stderr_handle = stream_lines(stderr, true, on_output);

        let wait_result = if let Some(timeout) = config.timeout {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    group.kill();
                    let _ = child.kill().await;
                    let (stdout, _) = drain(stdout_handle).await;
                    let (mut stderr, _) = drain(stderr_handle).await;
                    if !stderr.is_empty() {
                        stderr.push('\n');
                    }
                    stderr.push_str(&format!("Process timed out after {:?}", timeout));
                    return ShellOutput {
                        stdout,
                        stderr,
                        exit_code: None,
                        timed_out: true,
                    };
                }
            }
        } else {
            child.wait().await
        };

        let exit_code = wait_result.ok().and_then(|s| s.code());
        let (stdout, stdout_closed) = drain(stdout_handle).await;
        let (stderr, stderr_closed) = drain(stderr_handle).await;

        // Background processes still holding the pipes are killed with the group
        if stdout_closed && stderr_closed {
            group.disarm();
        }

        ShellOutput {
            stdout,
            stderr,
            exit_code,
            timed_out: false,
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// How long output readers may run once the script itself has exited
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// The process group a script runs in; killed on drop unless disarmed
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    /// SIGKILL every process in the group, including background children
    fn kill(&mut self) {
        let Some(pid) = self.leader.take() else {
            return;
        };
        #[cfg(unix)]
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
        #[cfg(not(unix))]
        let _ = pid;
    }

    fn disarm(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Wait for a reader to reach end of stream, giving up after `DRAIN_GRACE`.
///
/// Returns what was collected and whether the stream closed. A stream held
/// open past the grace period has its reader aborted.
async fn drain(mut reader: LineReader) -> (String, bool) {
    let closed = tokio::time::timeout(DRAIN_GRACE, &mut reader.task)
        .await
        .is_ok();
    if !closed {
        reader.task.abort();
    }
    let output = match reader.output.lock() {
        Ok(mut output) => std::mem::take(&mut *output),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    (output, closed)
}

/// A task reading one output stream line by line
struct LineReader {
    task: JoinHandle<()>,
    output: Arc<Mutex<String>>,
}

/// Forward each line to the callback and collect the whole stream
fn stream_lines<R>(reader: R, is_error: bool, on_output: Arc<OutputCallback>) -> LineReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let output = Arc::new(Mutex::new(String::new()));
    let collected = output.clone();
    let task = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            on_output(&line, is_error);
            if let Ok(mut collected) = collected.lock() {
                if !collected.is_empty() {
                    collected.push('\n');
                }
                collected.push_str(&line);
            }
        }
    });
    LineReader { task, output }
}
