//! Git CLI adapter

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::executor::contained;
use crate::orchestrator::SourceControl;
use crate::pipeline::{Phase, PipelineError, PipelineResult, ProjectDetails};

/// Clones projects with the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl GitCli {
    /// Creates a client for the `git` executable
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }

    /// Directory `project` is cloned into under `dest`
    ///
    /// Falls back to the repository name when no checkout path is set.
    #[must_use]
    pub fn checkout_target(project: &ProjectDetails, dest: &Path) -> PathBuf {
        let relative = contained(&project.checkout_path);
        if relative.as_os_str().is_empty() {
            dest.join(project.repo_name())
        } else {
            dest.join(relative)
        }
    }

    fn git(&self, args: &[&str], cwd: Option<&Path>) -> PipelineResult {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        tracing::debug!(args = ?args, "Running git");

        let output = cmd
            .output()
            .map_err(|e| PipelineError::infrastructure(Phase::Checkout, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::infrastructure(
                Phase::Checkout,
                format!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()),
            ));
        }
        Ok(())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceControl for GitCli {
    fn clone_and_checkout(&self, projects: &[ProjectDetails], dest: &Path) -> PipelineResult {
        for project in projects {
            let target = Self::checkout_target(project, dest);
            let target_str = target.to_string_lossy();
            tracing::info!(repository = %project.git_repository, target = %target_str, "Cloning repository");
            self.git(&["clone", &project.git_repository, &target_str], None)?;

            let revision = if project.commit_hash.is_empty() {
                project.source_value.as_str()
            } else {
                project.commit_hash.as_str()
            };
            if !revision.is_empty() {
                self.git(&["checkout", revision], Some(&target))?;
                tracing::info!(revision, "Checked out revision");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkout_target() {
        let project = ProjectDetails {
            git_repository: "https://github.com/acme/widget.git".to_string(),
            ..ProjectDetails::default()
        };
        assert_eq!(
            GitCli::checkout_target(&project, Path::new("/ws")),
            PathBuf::from("/ws/widget")
        );

        let nested = ProjectDetails {
            checkout_path: "./libs/../core".to_string(),
            ..project
        };
        assert!(GitCli::checkout_target(&nested, Path::new("/ws")).starts_with("/ws"));
    }

    #[test]
    fn test_clone_failure_is_checkout_error() {
        let dir = TempDir::new().unwrap();
        let project = ProjectDetails {
            git_repository: dir.path().join("missing").display().to_string(),
            checkout_path: "app".to_string(),
            ..ProjectDetails::default()
        };
        let err = GitCli::new()
            .clone_and_checkout(&[project], dir.path())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Infrastructure {
                phase: Phase::Checkout,
                ..
            }
        ));
    }
}
