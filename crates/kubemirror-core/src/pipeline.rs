//! End-to-end mirror run: prepare, validate, collect, mirror.

use std::sync::Arc;

use tracing::{debug, info};

use crate::client::{Credentials, ImageClient};
use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::exec::CommandRunner;
use crate::images::ImageSources;
use crate::install::install_kubeadm;
use crate::mirror::{MirrorConfig, MirrorEngine, MirrorReport};
use crate::reference::ImageReference;
use crate::validate::validate;
use crate::version::{installed_version, resolve_target_version};

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub kubernetes_version: Option<String>,
    pub repository: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub concurrency: Option<usize>,
    pub install_kubeadm: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A fully resolved mirror run.
pub struct MirrorPipeline {
    config: Config,
    kubernetes_version: Option<String>,
    credentials: Credentials,
    mirror: MirrorConfig,
    install: bool,
    runner: Arc<dyn CommandRunner>,
    client: Arc<dyn ImageClient>,
}

impl MirrorPipeline {
    /// Resolve settings from overrides, config and environment.
    ///
    /// The Kubernetes version is only resolved when kubeadm images are
    /// requested.
    pub fn new(
        config: Config,
        overrides: Overrides,
        env_version: Option<String>,
        runner: Arc<dyn CommandRunner>,
        client: Arc<dyn ImageClient>,
    ) -> Self {
        let kubernetes_version = if config.default.push_kubernetes {
            resolve_target_version(
                overrides.kubernetes_version.as_deref(),
                config.kubernetes_version(),
                env_version.as_deref(),
            )
        } else {
            None
        };

        let credentials = Credentials::new(
            non_empty(overrides.user).unwrap_or_else(|| config.registry.user.clone()),
            non_empty(overrides.password).unwrap_or_else(|| config.registry.password.clone()),
        );
        let mirror = MirrorConfig::new(
            non_empty(overrides.repository).unwrap_or_else(|| config.registry.repository.clone()),
        )
        .with_concurrency(overrides.concurrency.unwrap_or(config.registry.concurrency));
        let install = overrides.install_kubeadm || config.kubernetes.install;

        debug!(
            kubernetes_version = ?kubernetes_version,
            registry = %mirror.target_registry,
            concurrency = mirror.max_concurrent,
            "resolved settings"
        );

        Self {
            config,
            kubernetes_version,
            credentials,
            mirror,
            install,
            runner,
            client,
        }
    }

    pub fn kubernetes_version(&self) -> Option<&str> {
        self.kubernetes_version.as_deref()
    }

    pub fn target_registry(&self) -> &str {
        &self.mirror.target_registry
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Install the matching kubeadm when asked to.
    pub async fn prepare(&self) -> Result<()> {
        if !(self.install && self.config.default.push_kubernetes) {
            return Ok(());
        }
        let version = self
            .kubernetes_version
            .as_deref()
            .ok_or(MirrorError::MissingVersion)?;
        install_kubeadm(self.runner.as_ref(), version).await
    }

    /// Check the kubeadm version (when needed) and runtime connectivity.
    pub async fn validate(&self) -> Result<()> {
        let runner = Arc::clone(&self.runner);
        let client = Arc::clone(&self.client);
        validate(
            self.config.default.push_kubernetes,
            self.kubernetes_version.as_deref(),
            || async move { installed_version(runner.as_ref()).await },
            || async move { client.ping().await },
        )
        .await
    }

    /// Image sources selected by the config.
    pub fn sources(&self) -> ImageSources {
        ImageSources {
            kubernetes_version: if self.config.default.push_kubernetes {
                self.kubernetes_version.clone()
            } else {
                None
            },
            sentinel: self.config.kubernetes.ignore_prefix.clone(),
            config_entries: self
                .config
                .default
                .push_images
                .then(|| self.config.images.clone()),
        }
    }

    /// The images this run mirrors, in order.
    pub async fn images(&self) -> Result<Vec<ImageReference>> {
        if self.config.default.push_kubernetes && self.kubernetes_version.is_none() {
            return Err(MirrorError::MissingVersion);
        }
        self.sources().collect(self.runner.as_ref()).await
    }

    /// Each image with the reference it would be pushed as.
    pub async fn plan(&self) -> Result<Vec<(ImageReference, Result<String>)>> {
        let images = self.images().await?;
        Ok(images
            .into_iter()
            .map(|image| {
                let target = image.target_in(&self.mirror.target_registry);
                (image, target)
            })
            .collect())
    }

    /// Collect the image set and mirror it.
    pub async fn push(&self) -> Result<MirrorReport> {
        let images = self.images().await?;
        info!(count = images.len(), "mirroring images");
        let engine = MirrorEngine::new(Arc::clone(&self.client), self.mirror.clone());
        engine.run(&images, &self.credentials).await
    }

    /// prepare -> validate -> push.
    pub async fn run(&self) -> Result<MirrorReport> {
        self.prepare().await?;
        self.validate().await?;
        self.push().await
    }
}
