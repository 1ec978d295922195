//! Background fetching of everything a node start needs before it can run offline.

use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Instant,
};

use mk_core::{CoreError, EventBus, GroupReport, MiniPath, ResultExt, TaskFailure, TaskGroup, system};
use mk_model::{ClusterConfig, DriverKind, Event, EventKind, base_image_fallback_1, base_image_fallback_2};
use tracing::{error, info, instrument, warn};

use crate::{
    binary::BinarySource,
    error::CacheError,
    image::{self, ImageStore},
    preload::PreloadSource,
};

pub type CacheGroup = TaskGroup<CacheError>;

pub const CACHE_IMAGES_TASK: &str = "cache-images";
pub const BASE_IMAGE_TASK: &str = "base-image";

const GITHUB_AUTH_DOC: &str = "https://help.github.com/en/packages/using-github-packages-with-your-projects-ecosystem/configuring-docker-for-use-with-github-packages#authenticating-to-github-packages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Save every Kubernetes image to the image cache when no preload is used.
    pub cache_images: bool,
    /// Finish all downloads and stop before any host is started.
    pub download_only: bool,
    pub preload: bool,
    /// `<home>/cache/images`.
    pub images_dir: PathBuf,
}

impl CacheOptions {
    pub fn new(paths: &MiniPath) -> Self {
        Self {
            cache_images: true,
            download_only: false,
            preload: true,
            images_dir: paths.images_cache_dir(),
        }
    }

    pub fn with_cache_images(mut self, on: bool) -> Self {
        self.cache_images = on;
        self
    }

    pub fn with_download_only(mut self, on: bool) -> Self {
        self.download_only = on;
        self
    }

    pub fn with_preload(mut self, on: bool) -> Self {
        self.preload = on;
        self
    }
}

/// Base image reference the background pull settled on.
///
/// Empty until the pull task succeeded; read it after
/// [`CacheCoordinator::wait_download_backend_artifacts`].
#[derive(Debug, Clone, Default)]
pub struct BaseImageSelection(Arc<OnceLock<String>>);

impl BaseImageSelection {
    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    fn set(&self, image: &str) {
        let _ = self.0.set(image.to_string());
    }

    /// Writes the selected image into `cc`, if one was selected.
    pub fn apply(&self, cc: &mut ClusterConfig) {
        if let Some(image) = self.get()
            && image != cc.kic_base_image
        {
            info!(from = %cc.kic_base_image, to = image, "using fallback base image");
            cc.kic_base_image = image.to_string();
        }
    }
}

pub struct CacheCoordinator {
    options: CacheOptions,
    images: Arc<dyn ImageStore>,
    preload: Arc<dyn PreloadSource>,
    binaries: Arc<dyn BinarySource>,
    events: EventBus,
}

impl CacheCoordinator {
    pub fn new(
        options: CacheOptions,
        images: Arc<dyn ImageStore>,
        preload: Arc<dyn PreloadSource>,
        binaries: Arc<dyn BinarySource>,
    ) -> Self {
        Self {
            options,
            images,
            preload,
            binaries,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    #[inline]
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Fetches the preload tarball in the foreground, or schedules per-image caching.
    ///
    /// A repository override disables the preload since the tarball only holds images
    /// from the default registry. A failed preload falls back to per-image caching.
    #[instrument(level = "debug", skip(self, group))]
    pub async fn begin_cache_images(
        &self,
        group: &mut CacheGroup,
        image_repository: &str,
        kubernetes_version: &str,
        container_runtime: &str,
    ) {
        if image_repository.is_empty()
            && self.options.preload
            && self.preload.exists(kubernetes_version, container_runtime).await
        {
            info!("caching tarball of preloaded images");
            let start = Instant::now();
            match self.preload.fetch(kubernetes_version, container_runtime).await {
                Ok(path) => {
                    info!(path = %path.display(), kubernetes_version, container_runtime, "preloaded tarball ready");
                    self.events
                        .publish(
                            Event::new(EventKind::PreloadReady)
                                .with_task(path.display().to_string())
                                .with_elapsed(start.elapsed()),
                        )
                        .await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "error downloading preloaded artifacts, continuing without preload");
                    self.events
                        .publish(Event::new(EventKind::PreloadFailed).with_reason(&e))
                        .await;
                }
            }
        }

        if !self.options.cache_images {
            return;
        }

        let store = Arc::clone(&self.images);
        let dir = self.options.images_dir.clone();
        let images = image::kubernetes_images(image_repository, kubernetes_version);
        group.spawn(CACHE_IMAGES_TASK, async move {
            image::save_to_dir(store.as_ref(), &images, &dir).await.map(|_| ())
        });
    }

    /// Waits for image caching. Failures are logged and published, never returned.
    pub async fn wait_cache_images(&self, group: CacheGroup) {
        let report = group.wait().await;
        self.publish_report(&report).await;
        for (task, failure) in &report.failed {
            error!(task = %task, error = %failure, "error caching images");
        }
    }

    /// Schedules the base image pull for container-as-node backends.
    ///
    /// Tries the configured image, then the two fallbacks, stopping at the first success.
    pub async fn begin_download_backend_artifacts(
        &self,
        group: &mut CacheGroup,
        cc: &ClusterConfig,
        kind: DriverKind,
    ) -> BaseImageSelection {
        let selection = BaseImageSelection::default();
        if kind != DriverKind::Kic {
            info!(driver = %cc.driver, "driver isn't kic, skipping base-image download");
            return selection;
        }
        info!(driver = %cc.driver, runtime = %cc.kubernetes.container_runtime, "beginning downloading kic artifacts");

        if self.images.exists(&cc.kic_base_image).await {
            selection.set(&cc.kic_base_image);
            self.events
                .publish(Event::new(EventKind::BaseImagePresent).with_task(&cc.kic_base_image))
                .await;
            return selection;
        }

        info!("pulling base image ...");
        let candidates = [cc.kic_base_image.clone(), base_image_fallback_1(), base_image_fallback_2()];
        let store = Arc::clone(&self.images);
        let events = self.events.clone();
        let chosen = selection.clone();
        group.spawn(BASE_IMAGE_TASK, async move {
            pull_first_available(store.as_ref(), &candidates, &events, &chosen).await
        });
        selection
    }

    /// Waits for the base image pull.
    ///
    /// A registry login requirement is returned as `RegistryAuthRequired`;
    /// other failures are logged and the start goes on.
    pub async fn wait_download_backend_artifacts(&self, group: CacheGroup) -> Result<(), CoreError> {
        let report = group.wait().await;
        self.publish_report(&report).await;

        let mut auth: Option<CoreError> = None;
        for (task, failure) in report.failed {
            match failure {
                TaskFailure::Error(e) if e.is_auth() => {
                    warn!(task = %task, error = %e, "error downloading kic artifacts");
                    if matches!(e, CacheError::GithubNeedsLogin { .. }) {
                        warn!(
                            doc = GITHUB_AUTH_DOC,
                            "in order to use the fall back image, you need to log in to the github packages registry"
                        );
                    }
                    auth.get_or_insert_with(|| {
                        CoreError::from(e).context(
                            "please either authenticate to the registry or use --base-image flag to use a different registry",
                        )
                    });
                }
                other => error!(task = %task, error = %other, "error downloading kic artifacts"),
            }
        }
        match auth {
            Some(e) => Err(e),
            None => {
                info!("successfully downloaded all kic artifacts");
                Ok(())
            }
        }
    }

    /// Completes every download a later offline start needs.
    ///
    /// Caches kubelet/kubeadm for the node and kubectl for this host, joins both groups
    /// and saves `profile_images` to the image cache.
    #[instrument(level = "debug", skip_all, fields(kubernetes_version = %kubernetes_version))]
    pub async fn handle_download_only(
        &self,
        cache_group: CacheGroup,
        backend_group: CacheGroup,
        kubernetes_version: &str,
        profile_images: &[String],
    ) -> Result<(), CoreError> {
        for binary in ["kubelet", "kubeadm"] {
            self.binaries
                .cache_binary(binary, kubernetes_version, "linux", system::arch())
                .await
                .context("failed to cache binaries")?;
        }
        let kubectl = if cfg!(windows) { "kubectl.exe" } else { "kubectl" };
        self.binaries
            .cache_binary(kubectl, kubernetes_version, system::platform(), system::arch())
            .await
            .context("failed to cache kubectl")?;

        self.wait_cache_images(cache_group).await;
        self.wait_download_backend_artifacts(backend_group).await?;

        if !profile_images.is_empty() {
            image::save_to_dir(self.images.as_ref(), profile_images, &self.options.images_dir)
                .await
                .context("failed to cache images to tar")?;
        }
        Ok(())
    }

    async fn publish_report(&self, report: &GroupReport<CacheError>) {
        for task in &report.succeeded {
            self.events
                .publish(Event::new(EventKind::CacheTaskSucceeded).with_task(task))
                .await;
        }
        for (task, failure) in &report.failed {
            self.events
                .publish(
                    Event::new(EventKind::CacheTaskFailed)
                        .with_task(task)
                        .with_reason(failure),
                )
                .await;
        }
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("options", &self.options)
            .field("events", &self.events)
            .finish()
    }
}

/// Pulls `candidates` in order; returns the last error when none could be pulled.
async fn pull_first_available(
    store: &dyn ImageStore,
    candidates: &[String],
    events: &EventBus,
    chosen: &BaseImageSelection,
) -> Result<(), CacheError> {
    let mut last = None;
    for (i, image) in candidates.iter().enumerate() {
        if i > 0 {
            events
                .publish(Event::new(EventKind::BaseImageFallback).with_task(image))
                .await;
        }
        match store.pull(image).await {
            Ok(()) => {
                chosen.set(image);
                events
                    .publish(Event::new(EventKind::BaseImagePulled).with_task(image))
                    .await;
                return Ok(());
            }
            Err(e) => {
                info!(image, error = %e, "failed to download base image");
                last = Some(e);
            }
        }
    }
    events
        .publish(Event::new(EventKind::BaseImageUnavailable).with_task(&candidates[0]))
        .await;
    Err(last.unwrap_or_else(|| CacheError::Pull {
        image: String::new(),
        reason: "no base image candidates".into(),
    }))
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Mutex};

    use async_trait::async_trait;
    use mk_core::{ErrorKind, Subscribe};

    use super::*;

    #[derive(Default)]
    struct Images {
        present: Vec<String>,
        /// Pulls succeed only for these.
        pullable: Vec<String>,
        github_login: bool,
        pulls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageStore for Images {
        async fn exists(&self, image: &str) -> bool {
            self.present.iter().any(|i| i == image)
        }

        async fn pull(&self, image: &str) -> Result<(), CacheError> {
            self.pulls.lock().unwrap().push(image.to_string());
            if self.pullable.iter().any(|i| i == image) {
                return Ok(());
            }
            if self.github_login && image.starts_with("docker.pkg.github.com") {
                return Err(CacheError::GithubNeedsLogin { image: image.into() });
            }
            Err(CacheError::Pull {
                image: image.into(),
                reason: "connection refused".into(),
            })
        }

        async fn save(&self, image: &str, _out: &Path) -> Result<(), CacheError> {
            Err(CacheError::Save {
                image: image.into(),
                reason: "daemon gone".into(),
            })
        }
    }

    struct Preload {
        available: bool,
        fetch_ok: bool,
    }

    #[async_trait]
    impl PreloadSource for Preload {
        async fn exists(&self, _v: &str, _r: &str) -> bool {
            self.available
        }

        async fn fetch(&self, _v: &str, _r: &str) -> Result<PathBuf, CacheError> {
            if self.fetch_ok {
                Ok(PathBuf::from("/cache/preload.tar.lz4"))
            } else {
                Err(CacheError::HttpStatus {
                    url: "http://x".into(),
                    status: 503,
                })
            }
        }
    }

    #[derive(Default)]
    struct Binaries(Mutex<Vec<String>>);

    #[async_trait]
    impl BinarySource for Binaries {
        async fn cache_binary(&self, name: &str, _v: &str, os: &str, _a: &str) -> Result<PathBuf, CacheError> {
            self.0.lock().unwrap().push(format!("{os}/{name}"));
            Ok(PathBuf::from(name))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    impl Recorder {
        fn kinds(&self) -> Vec<EventKind> {
            self.0.lock().unwrap().iter().map(|e| e.kind).collect()
        }
    }

    fn coordinator(images: Arc<Images>, preload: Preload, cache_images: bool) -> (CacheCoordinator, Arc<Recorder>, Arc<Binaries>) {
        let rec = Arc::new(Recorder::default());
        let bins = Arc::new(Binaries::default());
        let home = std::env::temp_dir().join(format!("mk-cache-test-{}", std::process::id()));
        let options = CacheOptions::new(&MiniPath::new(home)).with_cache_images(cache_images);
        let c = CacheCoordinator::new(options, images, Arc::new(preload), bins.clone())
            .with_events(EventBus::new(vec![rec.clone() as Arc<dyn Subscribe>]));
        (c, rec, bins)
    }

    fn kic_cluster() -> ClusterConfig {
        ClusterConfig::default()
    }

    #[tokio::test]
    async fn base_image_falls_back_in_order_with_three_attempts() {
        let cc = kic_cluster();
        let images = Arc::new(Images {
            pullable: vec![base_image_fallback_2()],
            ..Default::default()
        });
        let (c, rec, _) = coordinator(images.clone(), Preload { available: false, fetch_ok: false }, false);

        let mut group = CacheGroup::new("kic");
        let selection = c.begin_download_backend_artifacts(&mut group, &cc, DriverKind::Kic).await;
        c.wait_download_backend_artifacts(group).await.unwrap();

        assert_eq!(
            *images.pulls.lock().unwrap(),
            vec![cc.kic_base_image.clone(), base_image_fallback_1(), base_image_fallback_2()]
        );
        assert_eq!(selection.get(), Some(base_image_fallback_2().as_str()));

        let mut updated = cc.clone();
        selection.apply(&mut updated);
        assert_eq!(updated.kic_base_image, base_image_fallback_2());

        let kinds = rec.kinds();
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::BaseImageFallback).count(), 2);
        assert!(kinds.contains(&EventKind::BaseImagePulled));
        assert!(kinds.contains(&EventKind::CacheTaskSucceeded));
    }

    #[tokio::test]
    async fn primary_success_stops_after_one_attempt() {
        let cc = kic_cluster();
        let images = Arc::new(Images {
            pullable: vec![cc.kic_base_image.clone()],
            ..Default::default()
        });
        let (c, _, _) = coordinator(images.clone(), Preload { available: false, fetch_ok: false }, false);

        let mut group = CacheGroup::new("kic");
        let selection = c.begin_download_backend_artifacts(&mut group, &cc, DriverKind::Kic).await;
        c.wait_download_backend_artifacts(group).await.unwrap();
        assert_eq!(images.pulls.lock().unwrap().len(), 1);
        assert_eq!(selection.get(), Some(cc.kic_base_image.as_str()));
    }

    #[tokio::test]
    async fn present_base_image_and_non_kic_skip_the_pull() {
        let cc = kic_cluster();
        let images = Arc::new(Images {
            present: vec![cc.kic_base_image.clone()],
            ..Default::default()
        });
        let (c, rec, _) = coordinator(images.clone(), Preload { available: false, fetch_ok: false }, false);

        let mut group = CacheGroup::new("kic");
        c.begin_download_backend_artifacts(&mut group, &cc, DriverKind::Kic).await;
        assert!(group.is_empty());
        c.begin_download_backend_artifacts(&mut group, &cc, DriverKind::BareMetal).await;
        assert!(group.is_empty());
        assert!(images.pulls.lock().unwrap().is_empty());
        assert_eq!(rec.kinds(), vec![EventKind::BaseImagePresent]);
    }

    #[tokio::test]
    async fn github_login_failure_requires_user_action() {
        let cc = kic_cluster();
        let images = Arc::new(Images {
            github_login: true,
            ..Default::default()
        });
        let (c, rec, _) = coordinator(images.clone(), Preload { available: false, fetch_ok: false }, false);

        let mut group = CacheGroup::new("kic");
        let selection = c.begin_download_backend_artifacts(&mut group, &cc, DriverKind::Kic).await;
        let err = c.wait_download_backend_artifacts(group).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RegistryAuthRequired);
        assert!(err.requires_user_action());
        assert!(err.to_string().contains("--base-image"));
        assert_eq!(images.pulls.lock().unwrap().len(), 3);
        assert!(selection.get().is_none());
        assert!(rec.kinds().contains(&EventKind::BaseImageUnavailable));
    }

    #[tokio::test]
    async fn plain_pull_failure_is_logged_only() {
        let cc = kic_cluster();
        let (c, _, _) = coordinator(Arc::new(Images::default()), Preload { available: false, fetch_ok: false }, false);

        let mut group = CacheGroup::new("kic");
        c.begin_download_backend_artifacts(&mut group, &cc, DriverKind::Kic).await;
        assert!(c.wait_download_backend_artifacts(group).await.is_ok());
    }

    #[tokio::test]
    async fn preload_short_circuits_image_caching() {
        let (c, rec, _) = coordinator(Arc::new(Images::default()), Preload { available: true, fetch_ok: true }, true);
        let mut group = CacheGroup::new("images");
        c.begin_cache_images(&mut group, "", "v1.18.3", "docker").await;
        assert!(group.is_empty());
        assert_eq!(rec.kinds(), vec![EventKind::PreloadReady]);
    }

    #[tokio::test]
    async fn repository_override_skips_preload() {
        let (c, rec, _) = coordinator(Arc::new(Images::default()), Preload { available: true, fetch_ok: true }, true);
        let mut group = CacheGroup::new("images");
        c.begin_cache_images(&mut group, "registry.example.com", "v1.18.3", "docker").await;
        assert_eq!(group.len(), 1);
        assert!(rec.kinds().is_empty());
    }

    #[tokio::test]
    async fn failed_preload_falls_through_and_wait_is_best_effort() {
        let (c, rec, _) = coordinator(Arc::new(Images::default()), Preload { available: true, fetch_ok: false }, true);
        let mut group = CacheGroup::new("images");
        c.begin_cache_images(&mut group, "", "v1.18.3", "docker").await;
        assert_eq!(group.len(), 1);

        // nothing can be pulled, so the task fails; the wait still returns normally
        c.wait_cache_images(group).await;

        let events = rec.0.lock().unwrap();
        assert_eq!(events[0].kind, EventKind::PreloadFailed);
        let failed = events
            .iter()
            .find(|e| e.kind == EventKind::CacheTaskFailed)
            .unwrap();
        assert_eq!(failed.task.as_deref(), Some(CACHE_IMAGES_TASK));
        assert!(failed.reason.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn mixed_group_reports_each_outcome_without_failing_the_wait() {
        let (c, rec, _) = coordinator(Arc::new(Images::default()), Preload { available: false, fetch_ok: false }, true);
        let mut group = CacheGroup::new("images");
        c.begin_cache_images(&mut group, "", "v1.18.3", "docker").await;
        group.spawn("kubectl", async { Ok::<(), CacheError>(()) });
        assert_eq!(group.len(), 2);

        c.wait_cache_images(group).await;

        let events = rec.0.lock().unwrap();
        let succeeded: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::CacheTaskSucceeded)
            .collect();
        let failed: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::CacheTaskFailed)
            .collect();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].task.as_deref(), Some("kubectl"));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task.as_deref(), Some(CACHE_IMAGES_TASK));
    }

    #[tokio::test]
    async fn caching_disabled_schedules_nothing() {
        let (c, _, _) = coordinator(Arc::new(Images::default()), Preload { available: false, fetch_ok: false }, false);
        let mut group = CacheGroup::new("images");
        c.begin_cache_images(&mut group, "", "v1.18.3", "docker").await;
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn download_only_caches_binaries_and_joins_groups() {
        let cc = kic_cluster();
        let images = Arc::new(Images {
            pullable: vec![cc.kic_base_image.clone()],
            ..Default::default()
        });
        let (c, rec, bins) = coordinator(images, Preload { available: false, fetch_ok: false }, false);

        let cache_group = CacheGroup::new("images");
        let mut kic_group = CacheGroup::new("kic");
        c.begin_download_backend_artifacts(&mut kic_group, &cc, DriverKind::Kic).await;

        c.handle_download_only(cache_group, kic_group, "v1.18.3", &[])
            .await
            .unwrap();

        let cached = bins.0.lock().unwrap().clone();
        assert_eq!(cached[0], "linux/kubelet");
        assert_eq!(cached[1], "linux/kubeadm");
        assert!(cached[2].ends_with("kubectl") || cached[2].ends_with("kubectl.exe"));
        assert!(rec.kinds().contains(&EventKind::BaseImagePulled));
    }
}
