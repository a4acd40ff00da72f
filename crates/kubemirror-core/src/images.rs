//! Image list collection
//!
//! Two sources feed a mirror run: the control-plane images kubeadm computes
//! for a Kubernetes version, and the `images` list from the config file.

use crate::error::{MirrorError, Result};
use crate::exec::{command_line, CommandRunner};
use crate::reference::ImageReference;
use crate::sanitize;
use crate::version::KUBEADM;
use serde::Deserialize;
use tracing::debug;

/// `kubeadm config images list -o json` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct KubeadmImages {
    pub images: Vec<String>,
}

/// Parse a (sanitized) kubeadm image list.
pub fn parse_image_list(output: &[u8]) -> Result<Vec<ImageReference>> {
    let parsed: KubeadmImages = serde_json::from_slice(output)
        .map_err(|e| MirrorError::MalformedImageList(e.to_string()))?;
    Ok(parsed.images.into_iter().map(ImageReference::from).collect())
}

/// Images kubeadm requires for `kubernetes_version`.
///
/// Diagnostic lines starting with `sentinel` are stripped before parsing.
pub async fn list_from_tool(
    runner: &dyn CommandRunner,
    kubernetes_version: &str,
    sentinel: &str,
) -> Result<Vec<ImageReference>> {
    let args = [
        "config",
        "images",
        "list",
        "--kubernetes-version",
        kubernetes_version,
        "-o",
        "json",
    ];
    let output = runner
        .run(KUBEADM, &args)
        .await?
        .into_checked(&command_line(KUBEADM, &args))?;

    let cleaned = sanitize::clean(&output, sentinel);
    debug!(images = %String::from_utf8_lossy(&cleaned), "kubeadm image list");
    parse_image_list(&cleaned)
}

/// Images listed in the config file.
///
/// Entries are trimmed, blank entries are skipped, and an entry with inner
/// whitespace is rejected.
pub fn list_from_config(entries: &[String]) -> Result<Vec<ImageReference>> {
    let mut images = Vec::with_capacity(entries.len());
    for entry in entries {
        let image = entry.trim();
        if image.is_empty() {
            continue;
        }
        if image.contains(char::is_whitespace) {
            return Err(MirrorError::InvalidImageFormat(image.to_string()));
        }
        images.push(ImageReference::new(image));
    }
    Ok(images)
}

/// Which sources a run mirrors, plus what each needs.
#[derive(Debug, Clone, Default)]
pub struct ImageSources {
    /// Kubernetes version to ask kubeadm about; `None` skips the kubeadm list.
    pub kubernetes_version: Option<String>,
    /// Diagnostic prefix stripped from kubeadm output.
    pub sentinel: String,
    /// Config file entries; `None` skips the config list.
    pub config_entries: Option<Vec<String>>,
}

impl ImageSources {
    /// kubeadm list (if requested) followed by the config list (if requested).
    ///
    /// Duplicates across the two are kept; each is mirrored on its own.
    pub async fn collect(&self, runner: &dyn CommandRunner) -> Result<Vec<ImageReference>> {
        let mut images = Vec::new();
        if let Some(version) = &self.kubernetes_version {
            images.extend(list_from_tool(runner, version, &self.sentinel).await?);
        }
        if let Some(entries) = &self.config_entries {
            images.extend(list_from_config(entries)?);
        }
        debug!(count = images.len(), "collected images");
        Ok(images)
    }
}
