//! Container image building and source packaging.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ImageBuilder, ImageRequest, SourcePackager};
use crate::errors::{DeployError, Result};

/// Builds with the local `docker` daemon.
#[derive(Debug, Clone)]
pub struct DockerImageBuilder {
    program: PathBuf,
}

impl Default for DockerImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerImageBuilder {
    /// Uses `docker` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("docker"),
        }
    }

    async fn docker(&self, step: &str, args: &[&str]) -> Result<()> {
        let status = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| DeployError::collaborator("docker", format!("{step}: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(DeployError::collaborator("docker", format!("{step} exited with {status}")))
        }
    }

    async fn login(&self, registry: &str, password: &str) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(["login", "--username", "AWS", "--password-stdin", registry])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| DeployError::collaborator("docker", format!("login: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(password.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(DeployError::collaborator("docker", format!("login exited with {status}")))
        }
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }

    async fn build_and_push(&self, request: &ImageRequest) -> Result<()> {
        let context = request.context_dir.to_string_lossy();
        tracing::info!(image = %request.image, "building image");
        self.docker("build", &["build", "-t", &request.image, &context])
            .await?;
        self.login(&request.registry, &request.password).await?;
        tracing::info!(image = %request.image, "pushing image");
        self.docker("push", &["push", &request.image]).await
    }
}

fn locate_zip() -> Result<PathBuf> {
    which::which("zip")
        .map_err(|_| DeployError::missing("zip", "install zip to package the app source"))
}

/// Archives a directory with the `zip` tool.
#[derive(Debug, Clone, Default)]
pub struct ZipPackager;

impl ZipPackager {
    /// Creates a packager.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourcePackager for ZipPackager {
    async fn check(&self) -> Result<()> {
        locate_zip().map(drop)
    }

    async fn package(&self, dir: &Path) -> Result<Vec<u8>> {
        let zip = locate_zip()?;
        if !dir.is_dir() {
            return Err(DeployError::missing(
                format!("app directory {}", dir.display()),
                "set APP_DIR to the application build context",
            ));
        }

        let scratch = tempfile::tempdir()?;
        let archive = scratch.path().join("source.zip");
        let status = Command::new(zip)
            .args(["-r", "-q"])
            .arg(&archive)
            .arg(".")
            .current_dir(dir)
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(DeployError::collaborator("zip", format!("exited with {status}")));
        }
        Ok(tokio::fs::read(&archive).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_docker_is_unavailable() {
        let builder = DockerImageBuilder {
            program: PathBuf::from("/nonexistent/docker"),
        };
        assert!(!builder.is_available().await);
    }

    #[tokio::test]
    async fn test_package_missing_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("nope");

        let err = ZipPackager::new().package(&missing).await.unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
    }
}
