//! Runs an accepted command through the user's shell.
//!
//! Nothing here sandboxes the command. Whatever protection exists comes from
//! the danger engine and the confirmation prompt that precede execution.

use anyhow::{Result, anyhow};
use std::process::{Command, Output, Stdio};
use tracing::{error, info};

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Trait for running system processes.
///
/// This abstraction enables testing without spawning real processes.
pub trait ProcessRunner: Send + Sync {
    /// Executes a program and returns its output.
    fn run(&self, program: &str, args: &[&str]) -> Result<Output>;

    /// Checks if a program exists in PATH.
    fn program_exists(&self, program: &str) -> bool;
}

/// Default process runner using std::process::Command.
///
/// Stdin is inherited so commands that read from the terminal still work.
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::inherit());
        Ok(cmd.output()?)
    }

    fn program_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

// =============================================================================
// Shell selection
// =============================================================================

/// Program and leading arguments that make a shell run one command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    pub program: String,
    pub flag: &'static str,
}

impl ShellInvocation {
    /// `<shell> -c`, `cmd /C` on Windows, `<pwsh> -Command` for PowerShell.
    pub fn for_shell(shell: &str, windows: bool) -> Self {
        let name = shell.trim();
        match name.to_ascii_lowercase().as_str() {
            "powershell" | "pwsh" => Self {
                program: name.to_string(),
                flag: "-Command",
            },
            "cmd" => Self {
                program: "cmd".to_string(),
                flag: "/C",
            },
            "" if windows => Self {
                program: "cmd".to_string(),
                flag: "/C",
            },
            "" => Self {
                program: "sh".to_string(),
                flag: "-c",
            },
            _ if windows => Self {
                program: "cmd".to_string(),
                flag: "/C",
            },
            _ => Self {
                program: name.to_string(),
                flag: "-c",
            },
        }
    }
}

// =============================================================================
// Executor Implementation
// =============================================================================

pub struct Executor {
    verbose: bool,
    invocation: ShellInvocation,
}

impl Executor {
    /// Executor for `shell` on the current platform.
    pub fn new(verbose: bool, shell: &str) -> Self {
        Self::with_invocation(verbose, ShellInvocation::for_shell(shell, cfg!(windows)))
    }

    pub fn with_invocation(verbose: bool, invocation: ShellInvocation) -> Self {
        Self { verbose, invocation }
    }

    /// Runs `command` through the shell, forwarding its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is blank, the shell cannot be
    /// started, or the command exits with a non-zero status.
    pub fn execute(&self, command: &str) -> Result<()> {
        self.execute_with_runner(command, &SystemProcessRunner, &mut std::io::stdout(), &mut std::io::stderr())
    }

    /// Runs `command` with injected dependencies (for testing).
    pub fn execute_with_runner<W1: std::io::Write, W2: std::io::Write>(
        &self,
        command: &str,
        runner: &impl ProcessRunner,
        stdout: &mut W1,
        stderr: &mut W2,
    ) -> Result<()> {
        let command = command.trim();
        if command.is_empty() {
            return Err(anyhow!("No command provided"));
        }

        let program = if runner.program_exists(&self.invocation.program) {
            self.invocation.program.as_str()
        } else {
            info!("Shell '{}' not found, falling back to sh", self.invocation.program);
            "sh"
        };

        if self.verbose {
            writeln!(stderr, "🚀 Running with {} {}: {}", program, self.invocation.flag, command)?;
        }
        info!("Executing command via {}: {}", program, command);

        let output = runner.run(program, &[self.invocation.flag, command])?;
        Self::handle_output(&output, stdout, stderr)
    }

    /// Handles command output, writing to stdout/stderr and checking status.
    fn handle_output<W1: std::io::Write, W2: std::io::Write>(
        output: &Output,
        stdout: &mut W1,
        stderr: &mut W2,
    ) -> Result<()> {
        if !output.stdout.is_empty() {
            write!(stdout, "{}", String::from_utf8_lossy(&output.stdout))?;
        }
        if !output.stderr.is_empty() {
            write!(stderr, "{}", String::from_utf8_lossy(&output.stderr))?;
        }
        if output.status.success() {
            return Ok(());
        }

        error!("Command failed with status: {}", output.status);
        match output.status.code() {
            Some(code) => Err(anyhow!("Command exited with status {}", code)),
            None => Err(anyhow!("Command was terminated by a signal")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    // =========================================================================
    // Mock implementations
    // =========================================================================

    /// Mock process runner that records what it was asked to run.
    struct MockProcessRunner {
        output: Output,
        existing: Vec<&'static str>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl MockProcessRunner {
        fn with_status(raw: i32, stdout: &str, stderr: &str) -> Self {
            Self {
                output: Output {
                    status: ExitStatus::from_raw(raw),
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: stderr.as_bytes().to_vec(),
                },
                existing: vec!["bash", "zsh", "sh"],
                calls: Mutex::new(Vec::new()),
            }
        }

        fn success(stdout: &str) -> Self {
            Self::with_status(0, stdout, "")
        }

        fn failure(stderr: &str) -> Self {
            Self::with_status(1 << 8, "", stderr) // Exit code 1
        }

        fn last_call(&self) -> (String, Vec<String>) {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl ProcessRunner for MockProcessRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.iter().map(|a| a.to_string()).collect()));
            Ok(self.output.clone())
        }

        fn program_exists(&self, program: &str) -> bool {
            self.existing.contains(&program)
        }
    }

    fn bash() -> Executor {
        Executor::with_invocation(false, ShellInvocation::for_shell("bash", false))
    }

    // =========================================================================
    // Shell selection
    // =========================================================================

    #[test]
    fn test_shell_invocation_per_platform() {
        assert_eq!(ShellInvocation::for_shell("zsh", false).program, "zsh");
        assert_eq!(ShellInvocation::for_shell("zsh", false).flag, "-c");
        assert_eq!(ShellInvocation::for_shell("", false).program, "sh");

        let windows = ShellInvocation::for_shell("bash", true);
        assert_eq!((windows.program.as_str(), windows.flag), ("cmd", "/C"));

        let pwsh = ShellInvocation::for_shell("pwsh", true);
        assert_eq!((pwsh.program.as_str(), pwsh.flag), ("pwsh", "-Command"));
    }

    // =========================================================================
    // execute_with_runner
    // =========================================================================

    #[test]
    fn test_blank_command_returns_error() {
        let runner = MockProcessRunner::success("");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let result = bash().execute_with_runner("   ", &runner, &mut stdout, &mut stderr);

        assert!(result.unwrap_err().to_string().contains("No command provided"));
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_command_is_passed_as_one_shell_argument() {
        let runner = MockProcessRunner::success("a.txt\n");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        bash()
            .execute_with_runner("ls *.txt | head -n 1", &runner, &mut stdout, &mut stderr)
            .unwrap();

        let (program, args) = runner.last_call();
        assert_eq!(program, "bash");
        assert_eq!(args, ["-c", "ls *.txt | head -n 1"]);
        assert_eq!(String::from_utf8_lossy(&stdout), "a.txt\n");
        assert!(stderr.is_empty());
    }

    #[test]
    fn test_missing_shell_falls_back_to_sh() {
        let runner = MockProcessRunner::success("");
        let executor = Executor::with_invocation(false, ShellInvocation::for_shell("nushell", false));
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        executor.execute_with_runner("ls", &runner, &mut stdout, &mut stderr).unwrap();
        assert_eq!(runner.last_call().0, "sh");
    }

    #[test]
    fn test_failure_writes_stderr_and_reports_exit_code() {
        let runner = MockProcessRunner::failure("ls: cannot access 'nope'\n");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let result = bash().execute_with_runner("ls nope", &runner, &mut stdout, &mut stderr);

        assert_eq!(result.unwrap_err().to_string(), "Command exited with status 1");
        assert!(stdout.is_empty());
        assert_eq!(String::from_utf8_lossy(&stderr), "ls: cannot access 'nope'\n");
    }

    #[test]
    fn test_verbose_announces_the_shell() {
        let runner = MockProcessRunner::success("");
        let executor = Executor::with_invocation(true, ShellInvocation::for_shell("bash", false));
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        executor.execute_with_runner("pwd", &runner, &mut stdout, &mut stderr).unwrap();
        assert!(String::from_utf8_lossy(&stderr).contains("Running with bash -c: pwd"));
    }

    // =========================================================================
    // handle_output tests
    // =========================================================================

    #[test]
    fn test_handle_output_success_with_stderr() {
        let output = Output {
            status: ExitStatus::from_raw(0),
            stdout: vec![],
            stderr: b"warning".to_vec(),
        };
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let result = Executor::handle_output(&output, &mut stdout, &mut stderr);

        assert!(result.is_ok());
        assert!(stdout.is_empty());
        assert_eq!(stderr, b"warning");
    }

    #[test]
    fn test_handle_output_failure_keeps_partial_stdout() {
        let output = Output {
            status: ExitStatus::from_raw(2 << 8),
            stdout: b"partial".to_vec(),
            stderr: b"error".to_vec(),
        };
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let result = Executor::handle_output(&output, &mut stdout, &mut stderr);

        assert!(result.unwrap_err().to_string().contains("status 2"));
        assert_eq!(stdout, b"partial");
        assert_eq!(stderr, b"error");
    }

    #[test]
    fn test_handle_output_signal() {
        let output = Output {
            status: ExitStatus::from_raw(9),
            stdout: vec![],
            stderr: vec![],
        };
        let result = Executor::handle_output(&output, &mut Vec::new(), &mut Vec::new());
        assert!(result.unwrap_err().to_string().contains("signal"));
    }
}
