//! Artifact cache: preloaded image tarballs, per-image caching, the node base image
//! with its fallbacks, and Kubernetes release binaries.
//!
//! Work is scheduled into [`CacheGroup`]s and joined later by the
//! [`CacheCoordinator`]; a failing task never aborts its siblings.

mod error;
pub use error::CacheError;

mod download;

mod image;
pub use image::{DEFAULT_IMAGE_REPOSITORY, DaemonImageStore, ImageStore, cache_path, kubernetes_images, save_to_dir};

mod preload;
pub use preload::{HttpPreload, PRELOAD_BASE_URL, PreloadSource};

mod binary;
pub use binary::{BinarySource, HttpBinaries, KUBERNETES_RELEASE_URL};

mod coordinator;
pub use coordinator::{BASE_IMAGE_TASK, BaseImageSelection, CACHE_IMAGES_TASK, CacheCoordinator, CacheGroup, CacheOptions};
