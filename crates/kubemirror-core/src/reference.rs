//! Image references and target derivation.

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};

/// A source image reference such as `k8s.gcr.io/coredns/coredns:v1.8.4`.
///
/// Collected references are not validated; the `registry/...` shape is only
/// checked when a target is derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last `/`-separated segment, e.g. `coredns:v1.8.4`.
    pub fn last_segment(&self) -> Result<&str> {
        match self.0.rsplit_once('/') {
            Some((_, last)) => Ok(last),
            None => Err(MirrorError::InvalidImageFormat(self.0.clone())),
        }
    }

    /// Destination reference inside `target_registry`.
    ///
    /// Only the final path segment survives, so `k8s.gcr.io/coredns/coredns:v1.8.4`
    /// pushed to `pixiuio` becomes `pixiuio/coredns:v1.8.4`. Two sources that
    /// share a final segment map to the same target.
    pub fn target_in(&self, target_registry: &str) -> Result<String> {
        Ok(format!("{}/{}", target_registry, self.last_segment()?))
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ImageReference {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageReference {
    fn from(value: String) -> Self {
        Self(value)
    }
}
