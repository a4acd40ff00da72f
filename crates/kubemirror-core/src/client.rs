//! Container runtime capability used by the mirror engine.
//!
//! [`DockerCli`] implements [`ImageClient`] by shelling out to the `docker`
//! binary through a [`CommandRunner`].

use crate::error::{MirrorError, Result};
use crate::exec::{command_line, CommandRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Docker CLI binary name
pub const DOCKER: &str = "docker";

/// Registry login credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pull / tag / push capability over a container runtime.
#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Authenticate against `registry` (a host, or a Docker Hub namespace).
    async fn login(&self, registry: &str, credentials: &Credentials) -> Result<()>;

    /// Check that the runtime is reachable.
    async fn ping(&self) -> Result<()>;

    /// Pull `image`, returning the progress log.
    async fn pull(&self, image: &str) -> Result<String>;

    /// Tag `source` as `target`.
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// Push `target`.
    async fn push(&self, target: &str) -> Result<()>;
}

/// Login server for `registry`, if its first segment names a host.
///
/// `pixiuio` (a Docker Hub namespace) has none; `harbor.local/library` and
/// `localhost:5000` do. Mirrors Docker's own domain detection.
pub fn login_server(registry: &str) -> Option<&str> {
    let first = registry.split('/').next().unwrap_or_default();
    if first.contains('.') || first.contains(':') || first == "localhost" {
        Some(first)
    } else {
        None
    }
}

/// [`ImageClient`] backed by the docker CLI.
#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn docker(&self, args: &[&str]) -> Result<Vec<u8>> {
        self.runner
            .run(DOCKER, args)
            .await?
            .into_checked(&command_line(DOCKER, args))
    }
}

#[async_trait]
impl ImageClient for DockerCli {
    async fn login(&self, registry: &str, credentials: &Credentials) -> Result<()> {
        let mut args = vec!["login"];
        if let Some(server) = login_server(registry) {
            args.push(server);
        }
        args.extend(["-u", credentials.user.as_str(), "--password-stdin"]);

        let output = self
            .runner
            .run_with_input(DOCKER, &args, credentials.password.as_bytes())
            .await
            .map_err(|e| MirrorError::Authentication {
                registry: registry.to_string(),
                output: e.to_string(),
            })?;

        if output.success() {
            Ok(())
        } else {
            Err(MirrorError::Authentication {
                registry: registry.to_string(),
                output: output.text().trim().to_string(),
            })
        }
    }

    async fn ping(&self) -> Result<()> {
        let args = ["version", "--format", "{{.Server.Version}}"];
        let output = self
            .runner
            .run(DOCKER, &args)
            .await
            .map_err(|e| MirrorError::Connectivity(e.to_string()))?;
        if output.success() {
            debug!(server = %output.text().trim(), "docker daemon reachable");
            Ok(())
        } else {
            Err(MirrorError::Connectivity(output.text().trim().to_string()))
        }
    }

    async fn pull(&self, image: &str) -> Result<String> {
        let out = self.docker(&["pull", image]).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.docker(&["tag", source, target]).await.map(|_| ())
    }

    async fn push(&self, target: &str) -> Result<()> {
        self.docker(&["push", target]).await.map(|_| ())
    }
}
