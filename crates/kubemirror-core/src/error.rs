//! Error types for kubemirror-core

use thiserror::Error;

/// Errors that can occur while reconciling versions or mirroring images
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Executable is not resolvable on PATH
    #[error("failed to find {tool}: {detail}")]
    ToolNotFound { tool: String, detail: String },

    /// An invoked process exited non-zero (or could not be spawned)
    #[error("command `{command}` failed ({status}): {output}")]
    ExternalTool {
        command: String,
        status: String,
        output: String,
    },

    /// `kubeadm version -o json` did not yield a usable gitVersion
    #[error("malformed kubeadm version output: {0}")]
    MalformedVersionOutput(String),

    /// `kubeadm config images list -o json` did not parse
    #[error("malformed kubeadm image list: {0}")]
    MalformedImageList(String),

    /// Image reference is not of the form `registry/[namespace/]repo:tag`
    #[error("invalid image format: {0}")]
    InvalidImageFormat(String),

    /// Kubernetes images were requested but no version could be resolved
    #[error("failed to find kubernetes version (set --kubernetes-version, kubernetes.version or KubernetesVersion)")]
    MissingVersion,

    /// Installed kubeadm does not match the requested Kubernetes version
    #[error("kubeadm version {actual} does not match kubernetes version {expected}")]
    VersionMismatch { expected: String, actual: String },

    /// Installed kubeadm version could not be determined
    #[error("failed to get kubeadm version: {0}")]
    InstalledVersion(#[source] Box<MirrorError>),

    /// Registry login was rejected
    #[error("failed to log in to {registry}: {output}")]
    Authentication { registry: String, output: String },

    /// Container runtime is unreachable
    #[error("container runtime is not reachable: {0}")]
    Connectivity(String),

    /// Configuration file could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// A mirror worker panicked or was aborted
    #[error("mirror task failed: {0}")]
    TaskFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Build an [`MirrorError::ExternalTool`] from a command line and its captured output.
    pub fn external(command: &str, status: impl Into<String>, output: &[u8]) -> Self {
        MirrorError::ExternalTool {
            command: command.to_string(),
            status: status.into(),
            output: String::from_utf8_lossy(output).trim().to_string(),
        }
    }
}

impl From<toml::de::Error> for MirrorError {
    fn from(err: toml::de::Error) -> Self {
        MirrorError::Config(err.to_string())
    }
}

/// Result type for kubemirror-core operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_error_carries_trimmed_output() {
        let err = MirrorError::external("kubeadm version -o json", "exit status 1", b"boom\n");
        assert_eq!(
            err.to_string(),
            "command `kubeadm version -o json` failed (exit status 1): boom"
        );
    }

    #[test]
    fn test_installed_version_wraps_source() {
        let inner = MirrorError::ToolNotFound {
            tool: "kubeadm".to_string(),
            detail: "cannot find binary path".to_string(),
        };
        let err = MirrorError::InstalledVersion(Box::new(inner));
        assert!(err.to_string().starts_with("failed to get kubeadm version"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
