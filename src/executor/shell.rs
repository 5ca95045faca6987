//! Shell execution module
//!
//! Runs step scripts with the host shell. Declared outputs are collected
//! through an env file: the script is followed by a trailer that appends
//! `NAME=value` for every declared output name, and the file is parsed
//! once the script exits successfully.

use crate::pipeline::{PipelineError, PipelineResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::traits::{ScriptRequest, ShellRunner};

static ENV_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").expect("valid env line pattern"));

/// Shell execution configuration
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Working directory
    pub cwd: PathBuf,

    /// Environment variables
    pub env: HashMap<String, String>,

    /// Shell to use (default: sh)
    pub shell: String,

    /// Echo output line by line while the command runs
    pub streaming: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_default(),
            env: HashMap::new(),
            shell: "sh".to_string(),
            streaming: true,
        }
    }
}

/// Result of shell command execution
#[derive(Debug, Clone)]
pub struct ShellResult {
    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Exit code
    pub exit_code: i32,

    /// Duration of execution
    pub duration: Duration,
}

impl ShellResult {
    /// Returns true if command succeeded (exit code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one command through the configured shell
#[derive(Debug, Clone)]
pub struct ShellCommand<'a> {
    config: &'a ShellConfig,
}

impl<'a> ShellCommand<'a> {
    /// Creates a new shell command builder
    #[must_use]
    pub fn new(config: &'a ShellConfig) -> Self {
        Self { config }
    }

    /// Runs `command` as `<shell> -c <command>`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the shell cannot be spawned and
    /// [`PipelineError::CommandFailed`] on a non-zero exit.
    pub fn execute(&self, command: &str) -> PipelineResult<ShellResult> {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c").arg(command);
        self.run(cmd)
    }

    /// Runs the script file at `path` with the configured shell
    ///
    /// # Errors
    ///
    /// Same as [`ShellCommand::execute`].
    pub fn execute_file(&self, path: &Path) -> PipelineResult<ShellResult> {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg(path);
        self.run(cmd)
    }

    fn run(&self, mut cmd: Command) -> PipelineResult<ShellResult> {
        cmd.current_dir(&self.config.cwd);
        cmd.envs(&self.config.env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let start = Instant::now();
        let (stdout, stderr, exit_code) = if self.config.streaming {
            run_streaming(cmd)?
        } else {
            run_captured(cmd)?
        };
        let duration = start.elapsed();
        tracing::debug!(exit_code, ?duration, "Shell command finished");

        if exit_code != 0 {
            return Err(PipelineError::CommandFailed {
                code: exit_code,
                stderr,
            });
        }

        Ok(ShellResult {
            stdout,
            stderr,
            exit_code,
            duration,
        })
    }
}

fn run_captured(mut cmd: Command) -> PipelineResult<(String, String, i32)> {
    let output = cmd.output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stdout.is_empty() {
        print!("{stdout}");
    }
    if !stderr.is_empty() {
        eprint!("{stderr}");
    }

    Ok((stdout, stderr, output.status.code().unwrap_or(-1)))
}

fn run_streaming(mut cmd: Command) -> PipelineResult<(String, String, i32)> {
    let mut child = cmd.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PipelineError::Io("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PipelineError::Io("stderr not captured".to_string()))?;

    let stdout_buf = Arc::new(Mutex::new(String::new()));
    let stderr_buf = Arc::new(Mutex::new(String::new()));

    let stdout_thread = {
        let buf = Arc::clone(&stdout_buf);
        std::thread::spawn(move || {
            for line in io::BufReader::new(stdout).lines().map_while(Result::ok) {
                println!("{line}");
                if let Ok(mut guard) = buf.lock() {
                    guard.push_str(&line);
                    guard.push('\n');
                }
            }
        })
    };

    let stderr_thread = {
        let buf = Arc::clone(&stderr_buf);
        std::thread::spawn(move || {
            for line in io::BufReader::new(stderr).lines().map_while(Result::ok) {
                eprintln!("{line}");
                if let Ok(mut guard) = buf.lock() {
                    guard.push_str(&line);
                    guard.push('\n');
                }
            }
        })
    };

    let status = child.wait()?;
    let _ = stdout_thread.join();
    let _ = stderr_thread.join();

    let collect = |buf: &Arc<Mutex<String>>| buf.lock().map(|g| g.clone()).unwrap_or_default();
    Ok((
        collect(&stdout_buf),
        collect(&stderr_buf),
        status.code().unwrap_or(-1),
    ))
}

/// Appends the output trailer to `script`
///
/// The trailer writes each declared output to `env_file` as `NAME=value`.
#[must_use]
pub fn with_output_trailer(script: &str, env_file: &str, output_names: &[String]) -> String {
    let mut body = String::from("set -e\n");
    body.push_str(script);
    if !body.ends_with('\n') {
        body.push('\n');
    }
    let _ = writeln!(body, ": > \"{env_file}\"");
    for name in output_names {
        let _ = writeln!(body, "printf '%s=%s\\n' '{name}' \"${{{name}}}\" >> \"{env_file}\"");
    }
    body
}

/// Parses an env file, keeping only the `wanted` names
///
/// Lines that are not `NAME=value` are ignored. Later lines win.
#[must_use]
pub fn parse_env_file(content: &str, wanted: &[String]) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| ENV_LINE.captures(line))
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let value = caps.get(2)?.as_str();
            wanted
                .iter()
                .any(|w| w == name)
                .then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// Reads and parses the env file at `path`; a missing file yields no outputs
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the file exists but cannot be read.
pub fn read_env_file(path: &Path, wanted: &[String]) -> PipelineResult<HashMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_env_file(&content, wanted)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Host shell implementation of [`ShellRunner`]
#[derive(Debug, Clone)]
pub struct LocalShellRunner {
    shell: String,
    streaming: bool,
}

impl LocalShellRunner {
    /// Creates a runner using `shell`
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            streaming: true,
        }
    }

    /// Captures output instead of echoing it line by line
    #[must_use]
    pub fn captured(mut self) -> Self {
        self.streaming = false;
        self
    }
}

impl Default for LocalShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellRunner for LocalShellRunner {
    fn run_script(&self, request: &ScriptRequest) -> PipelineResult<HashMap<String, String>> {
        let script_path = request.workdir.join(format!("{}.sh", request.script_id));
        let env_path = request.workdir.join(format!("{}.env", request.script_id));

        let body = with_output_trailer(
            &request.script,
            &env_path.to_string_lossy(),
            &request.output_names,
        );
        fs::write(&script_path, body)?;

        let config = ShellConfig {
            cwd: request.cwd.clone(),
            env: request.env.clone(),
            shell: self.shell.clone(),
            streaming: self.streaming,
        };

        tracing::info!(script = %request.script_id, "Running script");
        ShellCommand::new(&config).execute_file(&script_path)?;

        read_env_file(&env_path, &request.output_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_env_file_keeps_declared() {
        let content = "A=1\nB=two words\nnot a pair\nC=3\nA=4\n";
        let parsed = parse_env_file(content, &names(&["A", "B"]));
        assert_eq!(parsed.get("A").map(String::as_str), Some("4"));
        assert_eq!(parsed.get("B").map(String::as_str), Some("two words"));
        assert!(!parsed.contains_key("C"));
    }

    #[test]
    fn test_trailer_lists_outputs() {
        let body = with_output_trailer("echo hi", "/tmp/x.env", &names(&["VERSION"]));
        assert!(body.starts_with("set -e\necho hi\n"));
        assert!(body.contains("'VERSION' \"${VERSION}\" >> \"/tmp/x.env\""));
    }

    #[test]
    fn test_shell_command_failure() {
        let config = ShellConfig {
            streaming: false,
            ..ShellConfig::default()
        };
        let err = ShellCommand::new(&config).execute("exit 3").unwrap_err();
        assert!(matches!(err, PipelineError::CommandFailed { code: 3, .. }));
    }

    #[test]
    fn test_local_runner_collects_outputs() {
        let dir = TempDir::new().unwrap();
        let request = ScriptRequest {
            workdir: dir.path().to_path_buf(),
            cwd: dir.path().to_path_buf(),
            script_id: "stage-0".to_string(),
            script: "VERSION=\"$BASE.1\"\nEXTRA=ignored".to_string(),
            env: HashMap::from([("BASE".to_string(), "2".to_string())]),
            output_names: names(&["VERSION"]),
        };
        let outputs = LocalShellRunner::default()
            .captured()
            .run_script(&request)
            .unwrap();
        assert_eq!(outputs.get("VERSION").map(String::as_str), Some("2.1"));
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_local_runner_propagates_failure() {
        let dir = TempDir::new().unwrap();
        let request = ScriptRequest {
            workdir: dir.path().to_path_buf(),
            cwd: dir.path().to_path_buf(),
            script_id: "stage-1".to_string(),
            script: "false".to_string(),
            env: HashMap::new(),
            output_names: vec![],
        };
        let err = LocalShellRunner::default()
            .captured()
            .run_script(&request)
            .unwrap_err();
        assert!(matches!(err, PipelineError::CommandFailed { .. }));
    }
}
