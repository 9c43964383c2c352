//! Isolated on-disk workspaces for runs and job instances

use crate::core::job::JobInstance;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Directory tree owned by one run:
///
/// ```text
/// <root>/<run_id>/
///   artifacts/         shared by the stages of this run only
///   jobs/<sandbox>/    working directory of one instance
///   state/<sandbox>/   private scratch space of one instance
/// ```
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    root: PathBuf,
    keep: bool,
}

/// Directories handed to a single instance
#[derive(Debug, Clone)]
pub struct InstanceWorkspace {
    pub dir: PathBuf,
    pub state_dir: PathBuf,
}

impl RunWorkspace {
    pub async fn create(base: &Path, run_id: Uuid, keep: bool) -> io::Result<Self> {
        let root = base.join(run_id.to_string());
        tokio::fs::create_dir_all(root.join("artifacts")).await?;
        tokio::fs::create_dir_all(root.join("jobs")).await?;
        tokio::fs::create_dir_all(root.join("state")).await?;
        debug!(path = %root.display(), "Created run workspace");
        Ok(Self { root, keep })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Create the sandbox of an instance.
    ///
    /// Fails if the directory already exists so two instances can never
    /// share a working directory.
    pub async fn prepare(&self, instance: &JobInstance) -> io::Result<InstanceWorkspace> {
        let name = instance.sandbox_name();
        let dir = self.root.join("jobs").join(&name);
        let state_dir = self.root.join("state").join(&name);

        tokio::fs::create_dir(&dir).await?;
        tokio::fs::create_dir(&state_dir).await?;

        Ok(InstanceWorkspace { dir, state_dir })
    }

    /// Remove the run's directory unless it is being kept
    pub async fn cleanup(&self) -> io::Result<()> {
        if self.keep {
            debug!(path = %self.root.display(), "Keeping run workspace");
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
