//! Docker CLI adapter
//!
//! Runs container steps with `docker run --rm` and drives the daemon,
//! registry login, image build, push and digest lookup for the CI
//! orchestrator.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::executor::{
    ContainerRunConfig, ContainerRunner, contained, read_env_file, with_output_trailer,
};
use crate::orchestrator::ContainerEngine;
use crate::pipeline::{BuildType, Phase, PipelineError, PipelineResult, WorkflowRequest};

/// Where the step's process directory is mounted inside the container
pub const CONTAINER_PROCESS_DIR: &str = "/cirunner/process";

const DOCKER_SOCKET: &str = "unix:///var/run/docker.sock";

/// Docker command line client
#[derive(Debug)]
pub struct DockerCli {
    /// Executable name
    binary: String,
    /// How long to wait for a freshly spawned daemon
    start_wait: Duration,
    /// Delay between readiness probes
    poll_interval: Duration,
    /// Daemon spawned by this client, if any
    daemon: Mutex<Option<Child>>,
}

impl DockerCli {
    /// Creates a client for the `docker` executable
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            start_wait: Duration::from_secs(150),
            poll_interval: Duration::from_secs(1),
            daemon: Mutex::new(None),
        }
    }

    /// Sets the executable name
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets how long to wait for a spawned daemon
    #[must_use]
    pub fn with_start_wait(mut self, wait: Duration) -> Self {
        self.start_wait = wait;
        self
    }

    /// Arguments of the `docker run` invocation for `config`
    ///
    /// The step's process directory is mounted at
    /// [`CONTAINER_PROCESS_DIR`]; a step with a script runs it from there
    /// with `sh` unless an explicit command overrides the entrypoint.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StepExecution`] if the command string
    /// cannot be split into words.
    pub fn run_args(config: &ContainerRunConfig) -> PipelineResult<Vec<String>> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];

        let mut env: Vec<_> = config.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        for (host, container) in &config.exposed_ports {
            args.push("-p".to_string());
            args.push(format!("{host}:{container}"));
        }

        args.push("-v".to_string());
        args.push(format!(
            "{}:{CONTAINER_PROCESS_DIR}",
            config.workdir.display()
        ));

        let script_path = if let Some(mount) = &config.script_mount {
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}",
                config.workdir.join(script_file(config)).display(),
                mount.dst_path
            ));
            mount.dst_path.clone()
        } else {
            format!("{CONTAINER_PROCESS_DIR}/{}", script_file(config))
        };

        if let Some(source) = &config.source_mount {
            args.push("-v".to_string());
            args.push(format!("{}:{}", source.src_path, source.dst_path));
            args.push("-w".to_string());
            args.push(source.dst_path.clone());
        }

        for mount in &config.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", mount.src_path, mount.dst_path));
        }

        let command = match config.command.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                shell_words::split(raw).map_err(|e| PipelineError::StepExecution {
                    step: config.script_id.clone(),
                    reason: format!("invalid command '{raw}': {e}"),
                })?
            }
            _ => Vec::new(),
        };

        if let Some((entrypoint, rest)) = command.split_first() {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
            args.push(config.image.clone());
            args.extend(rest.iter().cloned());
            args.extend(config.args.iter().cloned());
        } else if config.script.trim().is_empty() {
            args.push(config.image.clone());
            args.extend(config.args.iter().cloned());
        } else {
            args.push("--entrypoint".to_string());
            args.push("sh".to_string());
            args.push(config.image.clone());
            args.push(script_path);
        }

        Ok(args)
    }

    /// Arguments of the build invocation for `request`
    #[must_use]
    pub fn build_args(request: &WorkflowRequest, source_dir: &Path, dest: &str) -> Vec<String> {
        let build = request.ci_build_config.clone().unwrap_or_default();
        let docker = &build.docker_build_config;
        let context = build_context(request, source_dir);
        let dockerfile = match build.build_type {
            BuildType::ManagedDockerfile => context.join("Dockerfile"),
            _ if docker.dockerfile_path.is_empty() => context.join("Dockerfile"),
            _ => source_dir.join(&docker.dockerfile_path),
        };

        let mut args = if docker.buildx {
            let mut args = vec!["buildx".to_string(), "build".to_string()];
            if !docker.target_platform.is_empty() {
                args.push("--platform".to_string());
                args.push(docker.target_platform.clone());
            }
            args.push("--push".to_string());
            args
        } else {
            vec![
                "build".to_string(),
                "--network".to_string(),
                "host".to_string(),
            ]
        };

        for (key, value) in &docker.args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("-f".to_string());
        args.push(dockerfile.display().to_string());
        args.push("-t".to_string());
        args.push(dest.to_string());
        args.push(context.display().to_string());
        args
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Runs a docker subcommand for an infrastructure `phase`, returning
    /// its stdout
    fn run_phase(&self, phase: Phase, args: &[String]) -> PipelineResult<String> {
        tracing::debug!(phase = %phase, args = ?args, "Running docker");
        let output = self
            .command()
            .args(args)
            .output()
            .map_err(|e| PipelineError::infrastructure(phase, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PipelineError::infrastructure(phase, stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn daemon_ready(&self) -> bool {
        self.command()
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

fn script_file(config: &ContainerRunConfig) -> String {
    format!("{}.sh", config.script_id)
}

fn build_context(request: &WorkflowRequest, source_dir: &Path) -> PathBuf {
    let relative = contained(request.checkout_root());
    if relative.as_os_str().is_empty() {
        source_dir.to_path_buf()
    } else {
        source_dir.join(relative)
    }
}

/// Extracts the digest from `docker inspect` or `imagetools` output
///
/// Accepts `repo@sha256:...`, a quoted JSON string or a bare digest.
#[must_use]
pub fn parse_digest(output: &str) -> Option<String> {
    let trimmed = output.trim().trim_matches('"');
    let digest = trimmed.rsplit_once('@').map_or(trimmed, |(_, d)| d);
    digest
        .starts_with("sha256:")
        .then(|| digest.to_string())
}

impl ContainerRunner for DockerCli {
    fn run_container(&self, config: &ContainerRunConfig) -> PipelineResult<HashMap<String, String>> {
        let env_file = format!("{CONTAINER_PROCESS_DIR}/{}.env", config.script_id);
        if !config.script.trim().is_empty() {
            let body = with_output_trailer(&config.script, &env_file, &config.output_names);
            fs::write(config.workdir.join(script_file(config)), body)?;
        }

        let args = Self::run_args(config)?;
        tracing::info!(image = %config.image, script = %config.script_id, "Running container step");

        let output = self.command().args(&args).output()?;

        if !output.stdout.is_empty() {
            print!("{}", String::from_utf8_lossy(&output.stdout));
        }

        if !output.stderr.is_empty() {
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
        }

        if !output.status.success() {
            return Err(PipelineError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        read_env_file(
            &config.workdir.join(format!("{}.env", config.script_id)),
            &config.output_names,
        )
    }
}

impl ContainerEngine for DockerCli {
    fn start_daemon(&self, request: &WorkflowRequest) -> PipelineResult {
        if self.daemon_ready() {
            tracing::info!("Docker daemon already running");
            return Ok(());
        }

        let mut cmd = Command::new("dockerd");
        cmd.arg(format!("--host={DOCKER_SOCKET}"));
        if request.docker_registry_url.starts_with("http://") {
            cmd.arg("--insecure-registry").arg(request.registry_host());
        }
        let child = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::infrastructure(Phase::DaemonStart, e))?;
        if let Ok(mut guard) = self.daemon.lock() {
            *guard = Some(child);
        }

        let deadline = Instant::now() + self.start_wait;
        while Instant::now() < deadline {
            if self.daemon_ready() {
                tracing::info!("Docker daemon started");
                return Ok(());
            }
            std::thread::sleep(self.poll_interval);
        }
        Err(PipelineError::infrastructure(
            Phase::DaemonStart,
            format!("daemon not ready after {}s", self.start_wait.as_secs()),
        ))
    }

    fn stop_daemon(&self) -> PipelineResult {
        let child = self.daemon.lock().ok().and_then(|mut guard| guard.take());
        let Some(mut child) = child else {
            return Ok(());
        };
        tracing::info!("Stopping docker daemon");
        child
            .kill()
            .and_then(|()| child.wait().map(|_| ()))
            .map_err(|e| PipelineError::infrastructure(Phase::DaemonStop, e))
    }

    fn login(&self, request: &WorkflowRequest) -> PipelineResult {
        if request.docker_username.is_empty() {
            tracing::debug!("No registry credentials, skipping login");
            return Ok(());
        }

        let mut child = self
            .command()
            .arg("login")
            .arg("-u")
            .arg(&request.docker_username)
            .arg("--password-stdin")
            .arg(request.registry_host())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::infrastructure(Phase::Login, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.docker_password.as_bytes())
                .map_err(|e| PipelineError::infrastructure(Phase::Login, e))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| PipelineError::infrastructure(Phase::Login, e))?;
        if !output.status.success() {
            return Err(PipelineError::infrastructure(
                Phase::Login,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(())
    }

    fn build_artifact(
        &self,
        request: &WorkflowRequest,
        source_dir: &Path,
    ) -> PipelineResult<String> {
        let dest = request.image_path();
        tracing::info!(dest = %dest, buildx = request.is_buildx(), "Building image");
        self.run_phase(Phase::Build, &Self::build_args(request, source_dir, &dest))?;
        Ok(dest)
    }

    fn push_artifact(&self, image: &str) -> PipelineResult {
        self.run_phase(Phase::Push, &["push".to_string(), image.to_string()])
            .map(|_| ())
    }

    fn extract_digest(&self, image: &str, buildx: bool) -> PipelineResult<String> {
        let args: Vec<&str> = if buildx {
            vec!["buildx", "imagetools", "inspect", image, "--format", "{{json .Manifest.Digest}}"]
        } else {
            vec!["inspect", "--format", "{{index .RepoDigests 0}}", image]
        };
        let args: Vec<String> = args.into_iter().map(str::to_string).collect();

        let output = self.run_phase(Phase::Digest, &args)?;
        parse_digest(&output).ok_or_else(|| {
            PipelineError::infrastructure(Phase::Digest, format!("no digest in '{}'", output.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BuildConfig, DockerBuildConfig, MountPath, ProjectDetails};
    use std::collections::BTreeMap;

    fn config() -> ContainerRunConfig {
        ContainerRunConfig {
            image: "alpine:3".to_string(),
            command: None,
            args: vec![],
            script: "echo hi".to_string(),
            script_id: "stage-2".to_string(),
            script_mount: None,
            env: HashMap::from([("B".to_string(), "2".to_string()), ("A".to_string(), "1".to_string())]),
            exposed_ports: BTreeMap::from([(8080, 80)]),
            source_mount: Some(MountPath::new("/ws/source", "/src")),
            mounts: vec![MountPath::new("/ws/process/opt/out", "out")],
            workdir: PathBuf::from("/ws/process"),
            output_names: vec!["VERSION".to_string()],
        }
    }

    #[test]
    fn test_run_args_for_script_step() {
        let args = DockerCli::run_args(&config()).unwrap();
        let joined = args.join(" ");
        assert!(joined.starts_with("run --rm -e A=1 -e B=2 -p 8080:80"));
        assert!(joined.contains("-v /ws/process:/cirunner/process"));
        assert!(joined.contains("-v /ws/source:/src -w /src"));
        assert!(joined.ends_with("--entrypoint sh alpine:3 /cirunner/process/stage-2.sh"));
    }

    #[test]
    fn test_run_args_with_command_override() {
        let mut cfg = config();
        cfg.command = Some("python3 -m 'my tool'".to_string());
        cfg.args = vec!["--fast".to_string()];
        let args = DockerCli::run_args(&cfg).unwrap();
        let tail: Vec<_> = args.iter().rev().take(5).rev().cloned().collect();
        assert_eq!(
            tail,
            vec!["python3", "alpine:3", "-m", "my tool", "--fast"]
        );
    }

    #[test]
    fn test_run_args_with_script_mount() {
        let mut cfg = config();
        cfg.script_mount = Some(MountPath::new("", "/custom/run.sh"));
        let args = DockerCli::run_args(&cfg).unwrap();
        assert!(args.contains(&"/ws/process/stage-2.sh:/custom/run.sh".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/custom/run.sh"));
    }

    #[test]
    fn test_run_args_rejects_unbalanced_quotes() {
        let mut cfg = config();
        cfg.command = Some("sh -c 'oops".to_string());
        assert!(matches!(
            DockerCli::run_args(&cfg),
            Err(PipelineError::StepExecution { .. })
        ));
    }

    #[test]
    fn test_build_args_managed_dockerfile() {
        let request = WorkflowRequest {
            ci_project_details: vec![ProjectDetails {
                checkout_path: "app".to_string(),
                ..ProjectDetails::default()
            }],
            ci_build_config: Some(BuildConfig {
                build_type: BuildType::ManagedDockerfile,
                docker_build_config: DockerBuildConfig {
                    args: BTreeMap::from([("MODE".to_string(), "prod".to_string())]),
                    ..DockerBuildConfig::default()
                },
            }),
            ..WorkflowRequest::default()
        };
        let args = DockerCli::build_args(&request, Path::new("/ws/source"), "reg/app:1");
        assert_eq!(
            args.join(" "),
            "build --network host --build-arg MODE=prod -f /ws/source/app/Dockerfile -t reg/app:1 /ws/source/app"
        );
    }

    #[test]
    fn test_build_args_buildx() {
        let request = WorkflowRequest {
            ci_build_config: Some(BuildConfig {
                build_type: BuildType::SelfDockerfile,
                docker_build_config: DockerBuildConfig {
                    dockerfile_path: "docker/Dockerfile.ci".to_string(),
                    target_platform: "linux/amd64,linux/arm64".to_string(),
                    buildx: true,
                    ..DockerBuildConfig::default()
                },
            }),
            ..WorkflowRequest::default()
        };
        let args = DockerCli::build_args(&request, Path::new("/src"), "reg/app:2");
        assert_eq!(
            args.join(" "),
            "buildx build --platform linux/amd64,linux/arm64 --push -f /src/docker/Dockerfile.ci -t reg/app:2 /src"
        );
    }

    #[test]
    fn test_parse_digest() {
        assert_eq!(
            parse_digest("reg/app@sha256:abc\n").as_deref(),
            Some("sha256:abc")
        );
        assert_eq!(parse_digest("\"sha256:def\"").as_deref(), Some("sha256:def"));
        assert_eq!(parse_digest("<no value>"), None);
    }
}
