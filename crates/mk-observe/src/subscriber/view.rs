use std::borrow::Borrow;

use mk_model::{Event, EventKind};
use tracing::{Level, debug, error, info, trace, warn};

/// Read access to event fields with placeholders for absent ones.
pub trait View {
    fn kind(&self) -> EventKind;
    fn as_machine(&self) -> &str;
    fn as_task(&self) -> &str;
    fn as_reason(&self) -> &str;
    fn elapsed_ms(&self) -> u64;
}

impl<T> View for T
where
    T: Borrow<Event>,
{
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
    #[inline]
    fn as_machine(&self) -> &str {
        self.borrow().machine.as_deref().unwrap_or("-")
    }
    #[inline]
    fn as_task(&self) -> &str {
        self.borrow().task.as_deref().unwrap_or("-")
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn elapsed_ms(&self) -> u64 {
        self.borrow().elapsed_ms.unwrap_or(0)
    }
}

pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // lock
        EventKind::LockAcquired => "machine lock acquired",
        EventKind::LockReleased => "machine lock released",

        // create
        EventKind::HostCreating => "creating host",
        EventKind::HostCreated => "host created",
        EventKind::CreateFailed => "host create failed",
        EventKind::CreateTimedOut => "host create timed out; backend state unknown",
        EventKind::ConflictDetected => "a unit with this name exists and was not created by us",
        EventKind::AbandonedUnitRemoved => "removed abandoned unit before recreating it",

        // fix
        EventKind::HostFixing => "reusing existing host",
        EventKind::HostStarted => "started stopped host",

        // post-start
        EventKind::PostStartCompleted => "post-start setup completed",
        EventKind::PostStartFailed => "post-start setup failed",
        EventKind::FingerprintFailed => "could not read guest os-release",
        EventKind::AssetsSynced => "local assets synced",

        EventKind::HostSaved => "host record saved",
        EventKind::StartFailed => "start failed",

        // cache
        EventKind::PreloadReady => "preloaded images tarball ready",
        EventKind::PreloadFailed => "preload unavailable, caching images individually",
        EventKind::CacheTaskSucceeded => "cache task finished",
        EventKind::CacheTaskFailed => "cache task failed",
        EventKind::BaseImagePresent => "base image already present",
        EventKind::BaseImageFallback => "trying fallback base image",
        EventKind::BaseImagePulled => "base image pulled",
        EventKind::BaseImageUnavailable => "no base image could be pulled",
    }
}

pub fn level_for(kind: EventKind) -> Level {
    match kind {
        EventKind::LockReleased | EventKind::HostSaved | EventKind::CacheTaskSucceeded => Level::TRACE,

        EventKind::LockAcquired
        | EventKind::HostCreating
        | EventKind::AssetsSynced
        | EventKind::PostStartCompleted
        | EventKind::BaseImagePresent => Level::DEBUG,

        EventKind::HostCreated
        | EventKind::HostFixing
        | EventKind::HostStarted
        | EventKind::PreloadReady
        | EventKind::BaseImagePulled
        | EventKind::AbandonedUnitRemoved => Level::INFO,

        EventKind::FingerprintFailed
        | EventKind::PreloadFailed
        | EventKind::BaseImageFallback
        | EventKind::CacheTaskFailed => Level::WARN,

        EventKind::CreateFailed
        | EventKind::CreateTimedOut
        | EventKind::ConflictDetected
        | EventKind::PostStartFailed
        | EventKind::StartFailed
        | EventKind::BaseImageUnavailable => Level::ERROR,
    }
}

/// Logs `e` at the level of its kind, under the `mk.events` target.
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());
    let (machine, task, elapsed_ms) = (e.as_machine(), e.as_task(), e.elapsed_ms());

    match level_for(e.kind()) {
        Level::TRACE => trace!(target: "mk.events", machine, task, "{msg}"),
        Level::DEBUG => debug!(target: "mk.events", machine, task, elapsed_ms, "{msg}"),
        Level::INFO => info!(target: "mk.events", machine, task, elapsed_ms, "{msg}"),
        Level::WARN => warn!(target: "mk.events", machine, task, reason = e.as_reason(), "{msg}"),
        _ => error!(target: "mk.events", machine, task, reason = e.as_reason(), "{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_log_at_warn_or_above() {
        for kind in [
            EventKind::CreateFailed,
            EventKind::CreateTimedOut,
            EventKind::ConflictDetected,
            EventKind::PostStartFailed,
            EventKind::FingerprintFailed,
            EventKind::PreloadFailed,
            EventKind::CacheTaskFailed,
            EventKind::BaseImageUnavailable,
            EventKind::StartFailed,
        ] {
            assert!(kind.is_failure());
            assert!(level_for(kind) <= Level::WARN, "{kind:?}");
        }
    }

    #[test]
    fn view_placeholders() {
        let e = Event::new(EventKind::HostCreated).with_machine("dev");
        assert_eq!(e.as_machine(), "dev");
        assert_eq!(e.as_task(), "-");
        assert_eq!(e.as_reason(), "unknown");
        assert_eq!((&e).elapsed_ms(), 0);
        log_event(&e);
    }
}
