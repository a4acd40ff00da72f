//! Kubernetes version resolution
//!
//! The target version comes from the command line, the config file or the
//! `KubernetesVersion` environment variable, in that order. The installed
//! version is whatever `kubeadm version -o json` reports.

use crate::error::{MirrorError, Result};
use crate::exec::{command_line, CommandRunner};
use serde::Deserialize;
use tracing::debug;

/// kubeadm binary name
pub const KUBEADM: &str = "kubeadm";

/// Environment variable consulted last when resolving the target version
pub const KUBERNETES_VERSION_ENV: &str = "KubernetesVersion";

/// `kubeadm version -o json` payload, reduced to what we read.
#[derive(Debug, Clone, Deserialize)]
pub struct KubeadmVersion {
    #[serde(rename = "clientVersion")]
    pub client_version: ClientVersion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientVersion {
    #[serde(rename = "gitVersion", default)]
    pub git_version: String,
}

/// Pick the target Kubernetes version.
///
/// Explicit beats configured beats environment. Empty strings count as unset,
/// so `None` is the only "not found" signal.
pub fn resolve_target_version(
    explicit: Option<&str>,
    configured: Option<&str>,
    env: Option<&str>,
) -> Option<String> {
    [explicit, configured, env]
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Read [`KUBERNETES_VERSION_ENV`] from the process environment.
pub fn target_version_from_env() -> Option<String> {
    std::env::var(KUBERNETES_VERSION_ENV).ok()
}

/// Parse the `gitVersion` out of `kubeadm version -o json` output.
pub fn parse_kubeadm_version(output: &[u8]) -> Result<String> {
    let parsed: KubeadmVersion = serde_json::from_slice(output)
        .map_err(|e| MirrorError::MalformedVersionOutput(e.to_string()))?;
    debug!(?parsed, "kubeadm version");

    let version = parsed.client_version.git_version;
    if version.is_empty() {
        return Err(MirrorError::MalformedVersionOutput(
            "clientVersion.gitVersion is empty".to_string(),
        ));
    }
    Ok(version)
}

/// Version of the kubeadm found on PATH, e.g. `v1.23.6`.
pub async fn installed_version(runner: &dyn CommandRunner) -> Result<String> {
    runner.look_path(KUBEADM).await?;

    let args = ["version", "-o", "json"];
    let output = runner
        .run(KUBEADM, &args)
        .await?
        .into_checked(&command_line(KUBEADM, &args))?;

    parse_kubeadm_version(&output)
}
