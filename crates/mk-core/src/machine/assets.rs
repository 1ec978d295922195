use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    error::{CoreError, ErrorKind},
    runner::{CommandRunner, FileAsset},
};

const ASSET_PERMISSIONS: &str = "0644";

/// Every regular file under `files_dir`, targeted at the same path relative to `/`.
///
/// A missing directory yields no assets.
pub(crate) fn local_assets(files_dir: &Path) -> io::Result<Vec<FileAsset>> {
    let mut out = Vec::new();
    if !files_dir.is_dir() {
        return Ok(out);
    }
    walk(files_dir, files_dir, &mut out)?;
    out.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<FileAsset>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let ft = entry.file_type()?;
        if ft.is_dir() {
            walk(root, &path, out)?;
        } else if ft.is_file() {
            out.push(asset_for(root, path));
        }
    }
    Ok(())
}

fn asset_for(root: &Path, source: PathBuf) -> FileAsset {
    let rel = source.strip_prefix(root).unwrap_or(&source);
    let parent = rel
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    let target_name = rel
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    FileAsset {
        target_dir: format!("/{parent}"),
        target_name,
        permissions: ASSET_PERMISSIONS.to_string(),
        source,
    }
}

/// [`local_assets`] on the blocking pool.
async fn scan_assets(files_dir: PathBuf) -> io::Result<Vec<FileAsset>> {
    tokio::task::spawn_blocking(move || local_assets(&files_dir))
        .await
        .map_err(io::Error::other)?
}

/// Copies local assets into the unit. Stops at the first failure.
pub(crate) async fn sync_local_assets(
    runner: &dyn CommandRunner,
    files_dir: &Path,
) -> Result<usize, CoreError> {
    let assets = scan_assets(files_dir.to_path_buf()).await.map_err(|e| {
        CoreError::with_source(ErrorKind::PostStart, e)
            .context(format!("read {}", files_dir.display()))
    })?;

    for asset in &assets {
        debug!(src = %asset.source.display(), dst = %asset.target_path(), "syncing asset");
        runner.copy(asset).await.map_err(|e| {
            CoreError::with_source(ErrorKind::PostStart, e)
                .context(format!("copy {}", asset.target_path()))
        })?;
    }
    if !assets.is_empty() {
        info!(count = assets.len(), "synced local assets");
    }
    Ok(assets.len())
}
