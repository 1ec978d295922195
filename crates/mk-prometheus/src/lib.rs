//! Prometheus metrics for node starts and artifact caching.
//!
//! [`PrometheusMetrics`] is an event subscriber: register it on the
//! [`mk_core::EventBus`] handed to the orchestrator and the cache coordinator.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use mk_core::{EventBus, Subscribe};
//! use mk_prometheus::PrometheusMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let bus = EventBus::new(vec![Arc::new(metrics.clone()) as Arc<dyn Subscribe>]);
//! # let _ = bus;
//! let text = metrics.render()?;
//! # let _ = text;
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `mk_host_starts_total{outcome}` - Counter; `ok` or the error kind
//! - `mk_cache_tasks_total{outcome}` - Counter; `ok` or `failed`
//! - `mk_base_image_fallbacks_total` - Counter
//! - `mk_lock_wait_seconds` - Histogram
//! - `mk_create_duration_seconds` - Histogram
//!
//! No HTTP endpoint is served; callers expose [`PrometheusMetrics::gather`] themselves.

mod backend;
pub use backend::{MetricsError, PrometheusMetrics};

pub use prometheus::{Encoder, Registry, TextEncoder};
