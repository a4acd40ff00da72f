//! Configuration file
//!
//! `config.toml` next to the binary by default. Every section is optional:
//!
//! ```toml
//! images = ["docker.io/nginx:latest"]
//!
//! [default]
//! push_kubernetes = true
//! push_images = true
//!
//! [kubernetes]
//! version = "v1.22.8"
//!
//! [registry]
//! repository = "pixiuio"
//! ```

use crate::error::{MirrorError, Result};
use crate::mirror::DEFAULT_CONCURRENCY;
use crate::sanitize::DEFAULT_SENTINEL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

/// Registry namespace used when none is configured
pub const DEFAULT_REPOSITORY: &str = "pixiuio";

/// Login user used when none is configured
pub const DEFAULT_USER: &str = "user";

/// Login password used when none is configured
pub const DEFAULT_PASSWORD: &str = "password";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default: DefaultOptions,
    pub kubernetes: KubernetesOptions,
    pub registry: RegistryOptions,
    /// Extra images to mirror, one reference per entry
    pub images: Vec<String>,
}

/// Which image sources to mirror
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultOptions {
    /// Mirror the control-plane images kubeadm lists
    pub push_kubernetes: bool,
    /// Mirror the `images` list
    pub push_images: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesOptions {
    /// Target Kubernetes version, e.g. `v1.22.8`
    pub version: String,
    /// Install the matching kubeadm package before validating
    pub install: bool,
    /// Line prefix of kubeadm diagnostics to strip from JSON output
    pub ignore_prefix: String,
}

impl Default for KubernetesOptions {
    fn default() -> Self {
        Self {
            version: String::new(),
            install: false,
            ignore_prefix: DEFAULT_SENTINEL.to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOptions {
    /// Registry (host or namespace) images are pushed into
    pub repository: String,
    pub user: String,
    pub password: String,
    /// Images mirrored at once; 0 means all of them
    pub concurrency: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl std::fmt::Debug for RegistryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryOptions")
            .field("repository", &self.repository)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path`; the file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    /// Load `path` if given, else [`DEFAULT_CONFIG_PATH`] when it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    debug!("no config file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// The configured Kubernetes version, if non-empty.
    pub fn kubernetes_version(&self) -> Option<&str> {
        Some(self.kubernetes.version.as_str()).filter(|v| !v.is_empty())
    }
}
