use async_trait::async_trait;
use mk_core::Subscribe;
use mk_model::{Event, EventKind};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics text is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Lifecycle and cache metrics backed by its own [`Registry`].
///
/// Cloning shares the underlying collectors.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    host_starts: IntCounterVec,
    cache_tasks: IntCounterVec,
    base_image_fallbacks: IntCounter,
    lock_wait: Histogram,
    create_duration: Histogram,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let host_starts = IntCounterVec::new(
            Opts::new("mk_host_starts_total", "Node starts by outcome"),
            &["outcome"],
        )?;
        let cache_tasks = IntCounterVec::new(
            Opts::new("mk_cache_tasks_total", "Background cache tasks by outcome"),
            &["outcome"],
        )?;
        let base_image_fallbacks = IntCounter::new(
            "mk_base_image_fallbacks_total",
            "Base image pulls that moved on to a fallback reference",
        )?;
        let lock_wait = Histogram::with_opts(
            HistogramOpts::new("mk_lock_wait_seconds", "Time spent waiting for the machine lock")
                .buckets(vec![0.01, 0.1, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0]),
        )?;
        let create_duration = Histogram::with_opts(
            HistogramOpts::new("mk_create_duration_seconds", "Duration of backend unit creation")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 240.0]),
        )?;

        registry.register(Box::new(host_starts.clone()))?;
        registry.register(Box::new(cache_tasks.clone()))?;
        registry.register(Box::new(base_image_fallbacks.clone()))?;
        registry.register(Box::new(lock_wait.clone()))?;
        registry.register(Box::new(create_duration.clone()))?;

        Ok(Self {
            registry,
            host_starts,
            cache_tasks,
            base_image_fallbacks,
            lock_wait,
            create_duration,
        })
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn record(&self, event: &Event) {
        let seconds = event.elapsed_ms.map(|ms| ms as f64 / 1000.0);
        match event.kind {
            EventKind::LockAcquired => {
                if let Some(s) = seconds {
                    self.lock_wait.observe(s);
                }
            }
            EventKind::HostCreated => {
                if let Some(s) = seconds {
                    self.create_duration.observe(s);
                }
            }
            EventKind::HostSaved => self.host_starts.with_label_values(&["ok"]).inc(),
            EventKind::StartFailed => {
                let outcome = event.reason.as_deref().unwrap_or("unknown");
                self.host_starts.with_label_values(&[outcome]).inc();
            }
            EventKind::CacheTaskSucceeded => self.cache_tasks.with_label_values(&["ok"]).inc(),
            EventKind::CacheTaskFailed => self.cache_tasks.with_label_values(&["failed"]).inc(),
            EventKind::BaseImageFallback => self.base_image_fallbacks.inc(),
            _ => {}
        }
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

#[async_trait]
impl Subscribe for PrometheusMetrics {
    async fn on_event(&self, event: &Event) {
        self.record(event);
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }
}
