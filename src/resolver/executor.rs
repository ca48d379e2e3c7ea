//! Running commands with elevated privileges.
//!
//! Handing the resolver back to the system needs root for every step.
//! [`PrivilegedExecutor`] is the seam: [`SystemExecutor`] shells out
//! through `sudo` or `pkexec`, tests substitute scripted doubles.

use std::io;
use std::process::{Command, Stdio};
use thiserror::Error;

/// How commands obtain root.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Elevation {
    /// Prefix commands with `sudo`
    #[default]
    Sudo,
    /// Prefix commands with `pkexec` (graphical prompt)
    Pkexec,
    /// Run commands as-is; the process is expected to be root already
    None,
}

impl Elevation {
    /// The program used to elevate, if any.
    #[must_use]
    pub fn program(&self) -> Option<&'static str> {
        match self {
            Self::Sudo => Some("sudo"),
            Self::Pkexec => Some("pkexec"),
            Self::None => None,
        }
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code
    pub status: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Why a privileged command did not succeed.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The elevation program itself is missing.
    #[error("elevation program `{0}` is not available")]
    ElevationUnavailable(String),

    /// Elevation was refused (wrong password, not in sudoers, dialog dismissed).
    #[error("elevation denied: {0}")]
    Denied(String),

    /// The target command does not exist.
    #[error("command `{0}` not found")]
    CommandNotFound(String),

    /// The command ran and exited unsuccessfully.
    #[error("`{program}` exited with {}: {stderr}", .status.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Failed {
        /// Program that failed
        program: String,
        /// Exit code, `None` if killed by a signal
        status: Option<i32>,
        /// Trimmed standard error
        stderr: String,
    },

    /// Spawning failed for another reason.
    #[error("failed to spawn command: {0}")]
    Io(#[from] io::Error),
}

impl ExecError {
    /// Whether the failure is about privilege rather than the command.
    #[must_use]
    pub fn is_privilege(&self) -> bool {
        matches!(self, Self::ElevationUnavailable(_) | Self::Denied(_))
    }
}

/// Runs an argv vector with elevated privileges.
pub trait PrivilegedExecutor: Send + Sync {
    /// Run `argv` and return its output. Non-zero exit is an error.
    fn run(&self, argv: &[String]) -> Result<ExecOutput, ExecError>;
}

/// Executes commands on the host through the configured [`Elevation`].
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    elevation: Elevation,
    program: Option<String>,
    non_interactive: bool,
}

impl SystemExecutor {
    /// Create an executor for the given elevation method.
    #[must_use]
    pub fn new(elevation: Elevation) -> Self {
        Self {
            elevation,
            program: elevation.program().map(str::to_string),
            non_interactive: false,
        }
    }

    /// Never prompt for a password (`sudo -n`). Needed when no terminal is
    /// available for the prompt, e.g. while the TUI owns the screen.
    #[must_use]
    pub fn non_interactive(mut self, yes: bool) -> Self {
        self.non_interactive = yes;
        self
    }

    /// Override the path of the elevation program.
    #[must_use]
    pub fn with_elevation_program(mut self, program: impl Into<String>) -> Self {
        if self.elevation != Elevation::None {
            self.program = Some(program.into());
        }
        self
    }

    /// Build the command that runs `argv`.
    #[must_use]
    pub fn command(&self, argv: &[String]) -> Command {
        let mut cmd = match &self.program {
            Some(program) => {
                let mut cmd = Command::new(program);
                if self.non_interactive && self.elevation == Elevation::Sudo {
                    cmd.arg("-n");
                }
                cmd.args(argv);
                cmd
            }
            None => {
                let mut cmd = Command::new(argv.first().map_or("", String::as_str));
                cmd.args(argv.iter().skip(1));
                cmd
            }
        };
        cmd.stdin(if self.non_interactive {
            Stdio::null()
        } else {
            Stdio::inherit()
        });
        cmd
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new(Elevation::default())
    }
}

impl PrivilegedExecutor for SystemExecutor {
    fn run(&self, argv: &[String]) -> Result<ExecOutput, ExecError> {
        let target = argv.first().cloned().unwrap_or_default();
        if target.is_empty() {
            return Err(ExecError::CommandNotFound(target));
        }

        let output = match self.command(argv).output() {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(match &self.program {
                    Some(program) => ExecError::ElevationUnavailable(program.clone()),
                    None => ExecError::CommandNotFound(target),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && self.program.is_none() => {
                return Err(ExecError::Denied(e.to_string()));
            }
            Err(e) => return Err(ExecError::Io(e)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            return Ok(ExecOutput {
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        Err(classify_failure(
            self.elevation,
            &target,
            output.status.code(),
            &stderr,
        ))
    }
}

/// Messages printed by `sudo`, `pkexec` or the target command when the
/// caller lacks privilege.
const DENIAL_MARKERS: &[&str] = &[
    "a password is required",
    "a terminal is required",
    "is not in the sudoers",
    "incorrect password",
    "sorry, try again",
    "not allowed to execute",
    "not authorized",
    "authentication failed",
    "request dismissed",
    "permission denied",
    "operation not permitted",
];

/// Decide whether a failed run was a privilege problem, a missing
/// command, or an ordinary failure.
#[must_use]
pub fn classify_failure(
    elevation: Elevation,
    program: &str,
    status: Option<i32>,
    stderr: &str,
) -> ExecError {
    let trimmed = stderr.trim();
    let lower = trimmed.to_lowercase();

    // pkexec: 126 = dialog dismissed, 127 = not authorized
    if elevation == Elevation::Pkexec && matches!(status, Some(126 | 127)) {
        return ExecError::Denied(trimmed.to_string());
    }
    if DENIAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return ExecError::Denied(trimmed.to_string());
    }
    if lower.contains("command not found") || status == Some(127) {
        return ExecError::CommandNotFound(program.to_string());
    }
    ExecError::Failed {
        program: program.to_string(),
        status,
        stderr: trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_sudo_command_line() {
        let exec = SystemExecutor::new(Elevation::Sudo).non_interactive(true);
        let cmd = exec.command(&argv(&["systemctl", "restart", "systemd-resolved"]));
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-n", "systemctl", "restart", "systemd-resolved"]);
    }

    #[test]
    fn test_unelevated_command_line() {
        let exec = SystemExecutor::new(Elevation::None);
        let cmd = exec.command(&argv(&["rm", "-f", "/etc/resolv.conf"]));
        assert_eq!(cmd.get_program(), "rm");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-f", "/etc/resolv.conf"]);
    }

    #[test]
    fn test_classify_sudo_denial() {
        let err = classify_failure(
            Elevation::Sudo,
            "rm",
            Some(1),
            "sudo: a password is required\n",
        );
        assert!(matches!(err, ExecError::Denied(_)));
        assert!(err.is_privilege());
    }

    #[test]
    fn test_classify_pkexec_dismissed() {
        let err = classify_failure(Elevation::Pkexec, "ln", Some(126), "");
        assert!(matches!(err, ExecError::Denied(_)));
    }

    #[test]
    fn test_classify_missing_command() {
        let err = classify_failure(
            Elevation::Sudo,
            "systemctl",
            Some(1),
            "sudo: systemctl: command not found",
        );
        assert!(matches!(err, ExecError::CommandNotFound(ref p) if p == "systemctl"));
        assert!(!err.is_privilege());
    }

    #[test]
    fn test_classify_plain_failure() {
        let err = classify_failure(
            Elevation::Sudo,
            "systemctl",
            Some(5),
            "Failed to restart systemd-resolved.service: Unit not found.",
        );
        match err {
            ExecError::Failed { status, ref stderr, .. } => {
                assert_eq!(status, Some(5));
                assert!(stderr.contains("Unit not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            classify_failure(Elevation::None, "x", None, "boom").to_string(),
            "`x` exited with signal: boom"
        );
    }

    #[test]
    fn test_missing_elevation_program_is_privilege_error() {
        let exec = SystemExecutor::new(Elevation::Sudo)
            .non_interactive(true)
            .with_elevation_program("/nonexistent/dnschanger-sudo");
        let err = exec.run(&argv(&["true"])).unwrap_err();
        assert!(matches!(err, ExecError::ElevationUnavailable(_)));
        assert!(err.is_privilege());
    }

    #[test]
    fn test_missing_target_without_elevation() {
        let exec = SystemExecutor::new(Elevation::None).non_interactive(true);
        let err = exec
            .run(&argv(&["dnschanger-definitely-missing-binary"]))
            .unwrap_err();
        assert!(matches!(err, ExecError::CommandNotFound(_)));
        assert!(matches!(
            exec.run(&[]).unwrap_err(),
            ExecError::CommandNotFound(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_without_elevation() {
        let exec = SystemExecutor::new(Elevation::None).non_interactive(true);
        let out = exec.run(&argv(&["sh", "-c", "echo hello"])).unwrap();
        assert_eq!(out.stdout.trim(), "hello");

        let err = exec.run(&argv(&["sh", "-c", "echo nope >&2; exit 3"])).unwrap_err();
        assert!(matches!(err, ExecError::Failed { status: Some(3), .. }));
    }
}
