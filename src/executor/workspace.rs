//! Per-invocation working directories
//!
//! Every pipeline invocation owns a directory tree keyed by a fresh id:
//!
//! - `source/` - checkout root and script working directory
//! - `process/` - script and output files, recreated before every step
//! - `artifacts/` - staging area zipped after the run

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Directory tree of one invocation
#[derive(Debug, Clone)]
pub struct Workspace {
    id: Uuid,
    root: PathBuf,
    source_dir: PathBuf,
    process_dir: PathBuf,
    artifacts_dir: PathBuf,
}

impl Workspace {
    /// Creates a new workspace under `base`
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the directories cannot be created
    pub fn create(base: impl AsRef<Path>) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let root = base.as_ref().join(id.to_string());
        let source_dir = root.join("source");
        let process_dir = root.join("process");
        let artifacts_dir = root.join("artifacts");

        for dir in [&source_dir, &process_dir, &artifacts_dir] {
            fs::create_dir_all(dir)?;
        }
        tracing::debug!(workspace = %root.display(), "Created workspace");

        Ok(Self {
            id,
            root,
            source_dir,
            process_dir,
            artifacts_dir,
        })
    }

    /// Invocation id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Root of the tree
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checkout root
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Script output directory
    #[must_use]
    pub fn process_dir(&self) -> &Path {
        &self.process_dir
    }

    /// Artifact staging directory
    #[must_use]
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Removes and recreates the script output directory
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the directory cannot be recreated
    pub fn reset_process_dir(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.process_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.process_dir)
    }

    /// Resolves a step-relative path against the checkout root
    #[must_use]
    pub fn source_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.source_dir.join(candidate)
        }
    }

    /// Staging location for `path` produced by `step`
    #[must_use]
    pub fn artifact_path(&self, step: &str, path: &str) -> PathBuf {
        self.artifacts_dir.join(step).join(contained(path))
    }

    /// Returns true if nothing has been staged
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the staging directory cannot be read
    pub fn artifacts_empty(&self) -> io::Result<bool> {
        match fs::read_dir(&self.artifacts_dir) {
            Ok(mut entries) => Ok(entries.next().is_none()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Deletes the whole tree
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if removal fails
    pub fn remove(self) -> io::Result<()> {
        fs::remove_dir_all(&self.root)
    }
}

/// Strips root and parent components so `path` can be joined under a
/// directory without escaping it
#[must_use]
pub fn contained(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Copies a file or directory tree from `src` to `dst`
///
/// # Errors
///
/// Returns `std::io::Error` if `src` does not exist or a copy fails
pub fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = fs::metadata(src)?;
    if metadata.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspaces_are_isolated() {
        let base = TempDir::new().unwrap();
        let first = Workspace::create(base.path()).unwrap();
        let second = Workspace::create(base.path()).unwrap();
        assert_ne!(first.root(), second.root());
        assert!(first.process_dir().is_dir());
        assert!(second.artifacts_dir().is_dir());
    }

    #[test]
    fn test_reset_process_dir_clears_leftovers() {
        let base = TempDir::new().unwrap();
        let workspace = Workspace::create(base.path()).unwrap();
        let leftover = workspace.process_dir().join("stage-0.env");
        fs::write(&leftover, "A=1").unwrap();

        workspace.reset_process_dir().unwrap();
        assert!(!leftover.exists());
        assert!(workspace.process_dir().is_dir());
    }

    #[test]
    fn test_artifact_path_stays_in_staging() {
        let base = TempDir::new().unwrap();
        let workspace = Workspace::create(base.path()).unwrap();
        let staged = workspace.artifact_path("build", "/../etc/report");
        assert!(staged.starts_with(workspace.artifacts_dir()));
        assert!(staged.ends_with("build/etc/report"));
    }

    #[test]
    fn test_copy_recursive() {
        let base = TempDir::new().unwrap();
        let src = base.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/a.txt"), "a").unwrap();

        let dst = base.path().join("dst");
        copy_recursive(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("nested/a.txt")).unwrap(), "a");

        let missing = copy_recursive(&base.path().join("missing"), &dst).unwrap_err();
        assert_eq!(missing.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_artifacts_empty() {
        let base = TempDir::new().unwrap();
        let workspace = Workspace::create(base.path()).unwrap();
        assert!(workspace.artifacts_empty().unwrap());
        fs::write(workspace.artifacts_dir().join("x"), "1").unwrap();
        assert!(!workspace.artifacts_empty().unwrap());
    }
}
