//! Preconditions checked before any image is touched.

use crate::error::{MirrorError, Result};
use std::future::Future;
use tracing::{debug, info};

/// Gate a mirror run.
///
/// When Kubernetes images are requested the target version must be known and
/// must equal the installed kubeadm version exactly. The runtime connectivity
/// check always runs last and its error is returned as is. Checks run in order
/// and stop at the first failure.
pub async fn validate<V, VFut, P, PFut>(
    require_push_kubernetes: bool,
    target_version: Option<&str>,
    installed_version: V,
    ping: P,
) -> Result<()>
where
    V: FnOnce() -> VFut,
    VFut: Future<Output = Result<String>>,
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<()>>,
{
    if require_push_kubernetes {
        let expected = match target_version {
            Some(v) if !v.is_empty() => v,
            _ => return Err(MirrorError::MissingVersion),
        };

        let actual = installed_version()
            .await
            .map_err(|e| MirrorError::InstalledVersion(Box::new(e)))?;

        if actual != expected {
            return Err(MirrorError::VersionMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        info!(version = %actual, "kubeadm matches kubernetes version");
    } else {
        debug!("kubernetes images not requested, skipping kubeadm check");
    }

    ping().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn installed(v: &str) -> Result<String> {
        Ok(v.to_string())
    }

    async fn reachable() -> Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_skips_version_check_when_not_pushing_kubernetes() {
        let called = AtomicBool::new(false);
        let flag = &called;
        validate(
            false,
            Some("v1.22.8"),
            move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok("v1.0.0".to_string())
            },
            reachable,
        )
        .await
        .unwrap();
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_matching_versions_pass() {
        validate(true, Some("v1.22.8"), || installed("v1.22.8"), reachable)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_version() {
        for target in [None, Some("")] {
            let err = validate(true, target, || installed("v1.22.8"), reachable)
                .await
                .unwrap_err();
            assert!(matches!(err, MirrorError::MissingVersion));
        }
    }

    #[tokio::test]
    async fn test_mismatch_short_circuits_before_ping() {
        let pinged = AtomicBool::new(false);
        let flag = &pinged;
        let err = validate(
            true,
            Some("v1.22.8"),
            || installed("v1.23.6"),
            move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .unwrap_err();

        match err {
            MirrorError::VersionMismatch { expected, actual } => {
                assert_eq!(expected, "v1.22.8");
                assert_eq!(actual, "v1.23.6");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!pinged.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_versions_compare_by_exact_value() {
        let err = validate(true, Some("1.22.8"), || installed("v1.22.8"), reachable)
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_installed_version_failure_is_wrapped() {
        let err = validate(
            true,
            Some("v1.22.8"),
            || async {
                Err(MirrorError::ToolNotFound {
                    tool: "kubeadm".to_string(),
                    detail: "not found".to_string(),
                })
            },
            reachable,
        )
        .await
        .unwrap_err();
        match err {
            MirrorError::InstalledVersion(inner) => {
                assert!(matches!(*inner, MirrorError::ToolNotFound { .. }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_error_propagates_unwrapped() {
        let err = validate(false, None, || installed("unused"), || async {
            Err(MirrorError::Connectivity("daemon down".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MirrorError::Connectivity(ref m) if m == "daemon down"));
    }
}
