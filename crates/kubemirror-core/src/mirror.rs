//! Concurrent pull / retag / push of an image set.
//!
//! [`MirrorEngine`] logs in once, then mirrors every image in its own tokio
//! task. A semaphore caps how many run at once. Workers never cancel each
//! other: every image is attempted, and the run fails afterwards if any image
//! did. [`MirrorReport`] keeps each image's outcome plus the first failure
//! observed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{Credentials, ImageClient};
use crate::error::{MirrorError, Result};
use crate::reference::ImageReference;

/// Default number of images mirrored at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Settings for a mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Registry (host or namespace) every image is pushed into.
    pub target_registry: String,
    /// Maximum concurrent workers; `0` (or anything above the image count)
    /// gives every image its own slot.
    pub max_concurrent: usize,
}

impl MirrorConfig {
    pub fn new(target_registry: impl Into<String>) -> Self {
        Self {
            target_registry: target_registry.into(),
            max_concurrent: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Semaphore size for a run over `images` images. Never more than one
    /// slot per image, so any cap above the image count acts like `0`.
    fn permits(&self, images: usize) -> usize {
        let slots = images.clamp(1, Semaphore::MAX_PERMITS);
        match self.max_concurrent {
            0 => slots,
            n => n.min(slots),
        }
    }
}

/// Outcome of mirroring one image.
#[derive(Debug)]
pub struct ImageResult {
    pub source: ImageReference,
    /// Pushed reference on success.
    pub outcome: Result<String>,
}

impl ImageResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-image outcomes of a run, in input order.
#[derive(Debug)]
pub struct MirrorReport {
    pub results: Vec<ImageResult>,
    /// Index into `results` of the first failure to be reported.
    pub first_failure: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MirrorReport {
    /// `true` when every image was mirrored.
    pub fn all_succeeded(&self) -> bool {
        self.first_failure.is_none()
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }

    /// Failed images with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&ImageReference, &MirrorError)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.source, e)))
    }

    /// Pushed references, in input order.
    pub fn targets(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_deref().ok())
            .collect()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Collapse to pass/fail, surfacing the first reported failure.
    pub fn into_result(mut self) -> Result<()> {
        match self.first_failure {
            None => Ok(()),
            Some(idx) => match self.results.swap_remove(idx).outcome {
                Err(e) => Err(e),
                Ok(_) => Ok(()),
            },
        }
    }
}

/// Fan-out mirror of an image set into one registry.
pub struct MirrorEngine {
    client: Arc<dyn ImageClient>,
    config: MirrorConfig,
}

impl MirrorEngine {
    pub fn new(client: Arc<dyn ImageClient>, config: MirrorConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Mirror `images` and report every outcome.
    ///
    /// Fails early only when login is rejected; per-image failures land in the
    /// report.
    #[instrument(skip(self, images, credentials), fields(registry = %self.config.target_registry, images = images.len()))]
    pub async fn run(
        &self,
        images: &[ImageReference],
        credentials: &Credentials,
    ) -> Result<MirrorReport> {
        let registry = self.config.target_registry.clone();
        let started_at = Utc::now();

        self.client
            .login(&registry, credentials)
            .await
            .map_err(|e| match e {
                MirrorError::Authentication { .. } => e,
                other => MirrorError::Authentication {
                    registry: registry.clone(),
                    output: other.to_string(),
                },
            })?;
        info!(user = %credentials.user, "logged in");

        let semaphore = Arc::new(Semaphore::new(self.config.permits(images.len())));
        let mut join_set = JoinSet::new();

        for (idx, image) in images.iter().cloned().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let registry = registry.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = mirror_image(client.as_ref(), &image, &registry).await;
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<Result<String>>> = images.iter().map(|_| None).collect();
        let mut first_failure = None;
        let mut lost = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => {
                    if outcome.is_err() && first_failure.is_none() {
                        first_failure = Some(idx);
                    }
                    slots[idx] = Some(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "mirror task did not complete");
                    lost.push(e.to_string());
                }
            }
        }

        // A task that panicked never reports its index; hand its error to
        // whichever slot is still empty.
        let mut lost = lost.into_iter();
        let results: Vec<ImageResult> = images
            .iter()
            .cloned()
            .zip(slots)
            .enumerate()
            .map(|(idx, (source, slot))| {
                let outcome = slot.unwrap_or_else(|| {
                    if first_failure.is_none() {
                        first_failure = Some(idx);
                    }
                    Err(MirrorError::TaskFailed(
                        lost.next().unwrap_or_else(|| "task vanished".to_string()),
                    ))
                });
                ImageResult { source, outcome }
            })
            .collect();

        let report = MirrorReport {
            results,
            first_failure,
            started_at,
            finished_at: Utc::now(),
        };

        if report.all_succeeded() {
            info!(
                mirrored = report.succeeded_count(),
                duration_ms = report.duration_ms(),
                "mirror run complete"
            );
        } else {
            for (image, err) in report.failures() {
                error!(image = %image, error = %err, "image failed to mirror");
            }
        }

        Ok(report)
    }

    /// Mirror `images`, failing with the first reported error.
    pub async fn mirror(&self, images: &[ImageReference], credentials: &Credentials) -> Result<()> {
        self.run(images, credentials).await?.into_result()
    }
}

async fn mirror_image(
    client: &dyn ImageClient,
    image: &ImageReference,
    registry: &str,
) -> Result<String> {
    let target = image.target_in(registry)?;

    info!(image = %image, "starting pull image");
    let progress = client.pull(image.as_str()).await.map_err(|e| {
        error!(image = %image, error = %e, "failed to pull");
        e
    })?;
    for line in progress.lines().filter(|l| !l.trim().is_empty()) {
        debug!(image = %image, "{}", line);
    }

    info!(image = %image, target = %target, "tagging");
    client.tag(image.as_str(), &target).await.map_err(|e| {
        error!(image = %image, target = %target, error = %e, "failed to tag");
        e
    })?;

    info!(target = %target, "starting push image");
    client.push(&target).await?;

    info!(image = %image, target = %target, "complete push image");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingClient;
    use std::time::Duration;

    fn refs(images: &[&str]) -> Vec<ImageReference> {
        images.iter().map(|i| ImageReference::new(*i)).collect()
    }

    fn creds() -> Credentials {
        Credentials::new("user", "password")
    }

    #[tokio::test]
    async fn test_mirror_all_images() {
        let client = Arc::new(RecordingClient::new());
        let engine = MirrorEngine::new(client.clone(), MirrorConfig::new("myregistry"));

        let report = engine
            .run(
                &refs(&["k8s.gcr.io/etcd:3.5.0-0", "docker.io/nginx:latest"]),
                &creds(),
            )
            .await
            .unwrap();

        assert!(report.all_succeeded());
        assert_eq!(
            report.targets(),
            vec!["myregistry/etcd:3.5.0-0", "myregistry/nginx:latest"]
        );

        let ops = client.ops();
        assert_eq!(ops[0], "login myregistry user");
        assert!(ops.contains(&"tag docker.io/nginx:latest myregistry/nginx:latest".to_string()));
        assert!(ops.contains(&"push myregistry/etcd:3.5.0-0".to_string()));
    }

    #[tokio::test]
    async fn test_per_image_order_is_pull_tag_push() {
        let client = Arc::new(RecordingClient::new());
        let engine = MirrorEngine::new(client.clone(), MirrorConfig::new("reg"));
        engine
            .mirror(&refs(&["k8s.gcr.io/pause:3.5"]), &creds())
            .await
            .unwrap();

        assert_eq!(
            client.ops(),
            vec![
                "login reg user",
                "pull k8s.gcr.io/pause:3.5",
                "tag k8s.gcr.io/pause:3.5 reg/pause:3.5",
                "push reg/pause:3.5",
            ]
        );
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_siblings() {
        let client = Arc::new(RecordingClient::new().fail_pull("k8s.gcr.io/etcd:3.5.0-0"));
        let engine = MirrorEngine::new(client.clone(), MirrorConfig::new("myregistry"));

        let report = engine
            .run(
                &refs(&["k8s.gcr.io/etcd:3.5.0-0", "docker.io/nginx:latest"]),
                &creds(),
            )
            .await
            .unwrap();

        assert!(!report.all_succeeded());
        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.first_failure, Some(0));

        // The healthy image went all the way through; nothing is rolled back.
        let ops = client.ops();
        assert!(ops.contains(&"push myregistry/nginx:latest".to_string()));
        assert!(!ops.iter().any(|op| op.starts_with("tag k8s.gcr.io/etcd")));

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, MirrorError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn test_invalid_reference_fails_only_that_image() {
        let client = Arc::new(RecordingClient::new());
        let engine = MirrorEngine::new(client.clone(), MirrorConfig::new("reg"));

        let err = engine
            .mirror(&refs(&["busybox", "docker.io/nginx:latest"]), &creds())
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::InvalidImageFormat(ref i) if i == "busybox"));
        assert!(client.ops().contains(&"push reg/nginx:latest".to_string()));
        assert!(!client.ops().iter().any(|op| op.contains("busybox")));
    }

    #[tokio::test]
    async fn test_login_failure_aborts_before_any_image_work() {
        let client = Arc::new(RecordingClient::new().reject_login());
        let engine = MirrorEngine::new(client.clone(), MirrorConfig::new("reg"));

        let err = engine
            .run(&refs(&["docker.io/nginx:latest"]), &creds())
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::Authentication { .. }));
        assert_eq!(client.ops(), vec!["login reg user"]);
    }

    #[tokio::test]
    async fn test_empty_image_set_still_logs_in() {
        let client = Arc::new(RecordingClient::new());
        let engine = MirrorEngine::new(client.clone(), MirrorConfig::new("reg"));
        let report = engine.run(&[], &creds()).await.unwrap();
        assert!(report.all_succeeded());
        assert!(report.results.is_empty());
        assert_eq!(client.ops(), vec!["login reg user"]);
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let client = Arc::new(RecordingClient::new().with_delay(Duration::from_millis(20)));
        let engine = MirrorEngine::new(
            client.clone(),
            MirrorConfig::new("reg").with_concurrency(2),
        );

        let images = refs(&[
            "k8s.gcr.io/kube-apiserver:v1.22.8",
            "k8s.gcr.io/kube-controller-manager:v1.22.8",
            "k8s.gcr.io/kube-scheduler:v1.22.8",
            "k8s.gcr.io/kube-proxy:v1.22.8",
            "k8s.gcr.io/pause:3.5",
            "k8s.gcr.io/etcd:3.5.0-0",
        ]);
        engine.mirror(&images, &creds()).await.unwrap();

        assert!(client.max_in_flight() <= 2);
        assert!(
            client.max_in_flight() > 1,
            "expected concurrent pulls, max_in_flight={}",
            client.max_in_flight()
        );
    }

    #[tokio::test]
    async fn test_zero_cap_runs_every_image_at_once() {
        let client = Arc::new(RecordingClient::new().with_delay(Duration::from_millis(50)));
        let engine = MirrorEngine::new(
            client.clone(),
            MirrorConfig::new("reg").with_concurrency(0),
        );

        let images = refs(&["a.io/one:1", "a.io/two:1", "a.io/three:1", "a.io/four:1"]);
        engine.mirror(&images, &creds()).await.unwrap();
        assert_eq!(client.max_in_flight(), 4);
    }

    #[test]
    fn test_permits_never_exceed_image_count() {
        assert_eq!(MirrorConfig::new("reg").permits(10), DEFAULT_CONCURRENCY);
        assert_eq!(MirrorConfig::new("reg").with_concurrency(0).permits(10), 10);
        assert_eq!(MirrorConfig::new("reg").with_concurrency(0).permits(0), 1);
        assert_eq!(MirrorConfig::new("reg").with_concurrency(8).permits(3), 3);
        assert_eq!(
            MirrorConfig::new("reg").with_concurrency(usize::MAX).permits(2),
            2
        );
    }

    #[tokio::test]
    async fn test_oversized_cap_from_config_runs_every_image() {
        let config =
            crate::config::Config::from_toml("[registry]\nconcurrency = 9223372036854775807")
                .unwrap();
        let client = Arc::new(RecordingClient::new().with_delay(Duration::from_millis(20)));
        let engine = MirrorEngine::new(
            client.clone(),
            MirrorConfig::new("reg").with_concurrency(config.registry.concurrency),
        );

        let images = refs(&["a.io/one:1", "a.io/two:1", "a.io/three:1"]);
        let report = engine.run(&images, &creds()).await.unwrap();
        assert!(report.all_succeeded());
        assert_eq!(client.max_in_flight(), 3);
    }

    /// Delegates to a [`RecordingClient`] but panics when pulling one image.
    struct PanicOnPull {
        inner: RecordingClient,
        image: &'static str,
    }

    #[async_trait::async_trait]
    impl ImageClient for PanicOnPull {
        async fn login(&self, registry: &str, credentials: &Credentials) -> Result<()> {
            self.inner.login(registry, credentials).await
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }

        async fn pull(&self, image: &str) -> Result<String> {
            if image == self.image {
                panic!("worker blew up");
            }
            self.inner.pull(image).await
        }

        async fn tag(&self, source: &str, target: &str) -> Result<()> {
            self.inner.tag(source, target).await
        }

        async fn push(&self, target: &str) -> Result<()> {
            self.inner.push(target).await
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_becomes_task_failed() {
        let client = Arc::new(PanicOnPull {
            inner: RecordingClient::new(),
            image: "a.io/boom:1",
        });
        let engine = MirrorEngine::new(client.clone(), MirrorConfig::new("reg"));
        let images = refs(&["a.io/one:1", "a.io/boom:1", "a.io/two:1"]);

        let report = engine.run(&images, &creds()).await.unwrap();
        assert_eq!(report.first_failure, Some(1));
        assert_eq!(report.succeeded_count(), 2);
        assert_eq!(report.targets(), vec!["reg/one:1", "reg/two:1"]);
        assert!(client.inner.ops().contains(&"push reg/two:1".to_string()));

        let err = report.into_result().unwrap_err();
        match err {
            MirrorError::TaskFailed(detail) => assert!(detail.contains("panicked")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_report_keeps_input_order() {
        let client = Arc::new(
            RecordingClient::new()
                .with_delay(Duration::from_millis(5))
                .fail_push("reg/two:1"),
        );
        let engine = MirrorEngine::new(client, MirrorConfig::new("reg"));
        let images = refs(&["a.io/one:1", "a.io/two:1", "a.io/three:1"]);

        let report = engine.run(&images, &creds()).await.unwrap();
        let sources: Vec<&str> = report.results.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["a.io/one:1", "a.io/two:1", "a.io/three:1"]);
        assert_eq!(report.targets(), vec!["reg/one:1", "reg/three:1"]);
        let failed: Vec<&str> = report.failures().map(|(i, _)| i.as_str()).collect();
        assert_eq!(failed, vec!["a.io/two:1"]);
    }
}
