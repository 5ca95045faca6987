//! Local blob storage and build cache adapters

use std::fs;
use std::path::{Path, PathBuf};

use crate::executor::contained;
use crate::orchestrator::{BlobStorage, CacheStore};
use crate::pipeline::{Phase, PipelineError, PipelineResult, StorageConfig, WorkflowRequest};

/// Blob store backed by a local directory
///
/// Objects land at `<root>/<bucket>/<prefix>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    /// Creates a store rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of `key` for `config`
    #[must_use]
    pub fn object_path(&self, config: &StorageConfig, key: &str) -> PathBuf {
        self.root
            .join(contained(&config.bucket))
            .join(contained(&config.prefix))
            .join(contained(key))
    }
}

impl BlobStorage for LocalBlobStorage {
    fn upload(&self, config: &StorageConfig, local: &Path, remote_key: &str) -> PipelineResult {
        let target = self.object_path(config, remote_key);
        let copy = || -> std::io::Result<()> {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(local, &target).map(|_| ())
        };
        copy().map_err(|e| PipelineError::infrastructure(Phase::ArtifactUpload, e))?;
        tracing::info!(key = %remote_key, target = %target.display(), "Uploaded artifact");
        Ok(())
    }
}

/// Cache store that keeps nothing
///
/// Runs always start cold and nothing is saved afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl CacheStore for NoopCache {
    fn pull(&self, request: &WorkflowRequest) -> PipelineResult {
        tracing::debug!(pipeline_id = request.pipeline_id, "Build cache disabled, nothing to pull");
        Ok(())
    }

    fn push(&self, request: &WorkflowRequest) -> PipelineResult {
        tracing::debug!(pipeline_id = request.pipeline_id, "Build cache disabled, nothing to push");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upload_copies_under_bucket_and_prefix() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("archive.zip");
        fs::write(&archive, b"zip").unwrap();

        let store = LocalBlobStorage::new(dir.path().join("blobs"));
        let config = StorageConfig {
            storage_module_configured: true,
            bucket: "ci-logs".to_string(),
            prefix: "pipelines/7".to_string(),
        };
        store.upload(&config, &archive, "job-artifact.zip").unwrap();

        let stored = dir.path().join("blobs/ci-logs/pipelines/7/job-artifact.zip");
        assert_eq!(fs::read(stored).unwrap(), b"zip");
    }

    #[test]
    fn test_upload_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStorage::new(dir.path());
        let err = store
            .upload(&StorageConfig::default(), &dir.path().join("none.zip"), "x.zip")
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Infrastructure {
                phase: Phase::ArtifactUpload,
                ..
            }
        ));
    }

    #[test]
    fn test_noop_cache() {
        let request = WorkflowRequest::default();
        assert!(NoopCache.pull(&request).is_ok());
        assert!(NoopCache.push(&request).is_ok());
    }
}
