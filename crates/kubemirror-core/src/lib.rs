//! kubemirror core library
//!
//! Mirrors the images a Kubernetes release needs (as reported by kubeadm),
//! plus any extra images from the config file, into a private registry:
//!
//! - resolve the target Kubernetes version (CLI > config > environment)
//! - check that the installed kubeadm reports the same version
//! - list the required images, stripping kubeadm's stray warning lines
//! - pull, retag and push every image concurrently

pub mod client;
pub mod config;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod images;
pub mod install;
pub mod mirror;
pub mod pipeline;
pub mod reference;
pub mod sanitize;
pub mod telemetry;
pub mod validate;
pub mod version;

pub use client::{login_server, Credentials, DockerCli, ImageClient, DOCKER};
pub use config::{Config, DefaultOptions, KubernetesOptions, RegistryOptions, DEFAULT_CONFIG_PATH};
pub use error::{MirrorError, Result};
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use images::{list_from_config, list_from_tool, parse_image_list, ImageSources};
pub use install::install_kubeadm;
pub use mirror::{ImageResult, MirrorConfig, MirrorEngine, MirrorReport, DEFAULT_CONCURRENCY};
pub use pipeline::{MirrorPipeline, Overrides};
pub use reference::ImageReference;
pub use sanitize::{clean, DEFAULT_SENTINEL};
pub use telemetry::init_tracing;
pub use validate::validate;
pub use version::{
    installed_version, resolve_target_version, target_version_from_env, KUBEADM,
    KUBERNETES_VERSION_ENV,
};

/// kubemirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
