use std::{path::Path, time::Instant};

use mk_model::{Event, EventKind, REQUIRED_DIRECTORIES};
use tracing::{debug, info, warn};

use super::assets;
use crate::{
    error::{CoreError, ErrorKind},
    events::EventBus,
    host::Host,
    runner::{Cmd, CommandRunner},
    system,
};

/// Prepares a freshly created or restarted unit.
///
/// Directory creation and asset sync are fatal; OS fingerprinting only logs.
pub(crate) async fn post_start_setup(
    host: &Host,
    files_dir: &Path,
    events: &EventBus,
) -> Result<(), CoreError> {
    let kind = host.kind();
    if kind.is_mock() {
        return Ok(());
    }

    let start = Instant::now();
    info!(machine = %host.name(), driver = host.driver_name(), "post-start starting");

    let runner = host
        .runner()
        .map_err(|e| CoreError::with_source(ErrorKind::PostStart, e).context("command runner"))?;

    create_required_directories(runner.as_ref())
        .await
        .map_err(|e| e.context(format!("sudo mkdir ({})", host.driver_name())))?;

    if kind.is_bare_metal() {
        info!(
            os = %system::os_info(),
            hostname = system::hostname().as_deref().unwrap_or("unknown"),
            arch = system::arch(),
            "local OS release"
        );
    }
    if kind.has_guest_os() && remote_os_release(runner.as_ref()).await.is_none() {
        events
            .publish(Event::new(EventKind::FingerprintFailed).with_machine(host.name().as_str()))
            .await;
    }

    let synced = assets::sync_local_assets(runner.as_ref(), files_dir).await?;
    if synced > 0 {
        events
            .publish(
                Event::new(EventKind::AssetsSynced)
                    .with_machine(host.name().as_str())
                    .with_reason(format!("{synced} files")),
            )
            .await;
    }

    info!(machine = %host.name(), took = ?start.elapsed(), "post-start completed");
    Ok(())
}

async fn create_required_directories(runner: &dyn CommandRunner) -> Result<(), CoreError> {
    let cmd = Cmd::sudo("mkdir").arg("-p").args(REQUIRED_DIRECTORIES);
    runner
        .run_cmd(&cmd)
        .await
        .map(|_| ())
        .map_err(|e| CoreError::with_source(ErrorKind::PostStart, e))
}

/// Ensures `/etc/hosts` inside the unit maps `name` to `ip`.
///
/// A no-op when the exact entry is present; otherwise any older entry for `name`
/// is replaced through a temp file copied into place with sudo.
pub async fn add_host_alias(runner: &dyn CommandRunner, name: &str, ip: &str) -> Result<(), CoreError> {
    let record = format!("{ip}\t{name}");
    let check = Cmd::new("grep").arg(format!("{record}$")).arg("/etc/hosts");
    if matches!(runner.run_cmd(&check).await, Ok(rr) if rr.success()) {
        debug!(%name, %ip, "host alias already present");
        return Ok(());
    }

    let script = format!(
        "{{ grep -v $'\\t{name}$' /etc/hosts; echo \"{record}\"; }} > /tmp/h.$$; sudo cp /tmp/h.$$ /etc/hosts"
    );
    runner
        .run_cmd(&Cmd::new("/bin/bash").arg("-c").arg(script))
        .await
        .map_err(|e| CoreError::with_source(ErrorKind::PostStart, e).context("hosts update"))?;
    info!(%name, %ip, "host alias added");
    Ok(())
}

/// Guest OS fingerprint, logged. `None` when it could not be determined.
async fn remote_os_release(runner: &dyn CommandRunner) -> Option<String> {
    let rr = match runner.run_cmd(&Cmd::new("cat").arg("/etc/os-release")).await {
        Ok(rr) => rr,
        Err(e) => {
            warn!(error = %e, "remote os-release failed");
            return None;
        }
    };
    match system::parse_pretty_name(&rr.stdout) {
        Some(name) => {
            info!(os = %name, "remote host OS release");
            Some(name)
        }
        None => {
            warn!(stdout = %rr.stdout, "failed to parse remote os-release");
            None
        }
    }
}
