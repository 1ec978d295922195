use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::CacheError;

/// Suffix of the digest file published next to every artifact.
pub(crate) const CHECKSUM_SUFFIX: &str = ".sha256";

/// Fetches the hex sha256 published at `<url>.sha256`.
///
/// The body may be a bare digest or `sha256sum` output (`<digest>  <name>`).
pub(crate) async fn fetch_checksum(client: &reqwest::Client, url: &str) -> Result<String, CacheError> {
    let sum_url = format!("{url}{CHECKSUM_SUFFIX}");
    let response = client.get(&sum_url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CacheError::HttpStatus {
            url: sum_url,
            status: status.as_u16(),
        });
    }
    let body = response.text().await?;
    parse_checksum(&body).ok_or(CacheError::BadChecksum { url: sum_url })
}

fn parse_checksum(body: &str) -> Option<String> {
    let digest = body.split_whitespace().next()?.to_ascii_lowercase();
    (digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit())).then_some(digest)
}

/// Downloads `url` to `dst` through a temporary file renamed into place.
///
/// The body is hashed while it streams; the rename only happens when the
/// sha256 equals `sha256` and, if the server advertised one, the size equals
/// the content length. Otherwise the temporary file is removed.
pub(crate) async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dst: &Path,
    sha256: &str,
) -> Result<u64, CacheError> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::io(parent, e))?;
    }

    info!(%url, dst = %dst.display(), "downloading");
    let mut response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CacheError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let expected = response.content_length();

    let tmp = partial_path(dst);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| CacheError::io(&tmp, e))?;
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(|e| CacheError::io(&tmp, e))?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| CacheError::io(&tmp, e))?;
    drop(file);

    if let Some(expected) = expected
        && expected != written
    {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CacheError::Truncated {
            path: dst.to_path_buf(),
            expected,
            actual: written,
        });
    }

    let actual = format!("{:x}", hasher.finalize());
    if !actual.eq_ignore_ascii_case(sha256) {
        warn!(dst = %dst.display(), expected = %sha256, %actual, "checksum mismatch, discarding download");
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CacheError::Checksum {
            path: dst.to_path_buf(),
            expected: sha256.to_string(),
            actual,
        });
    }

    tokio::fs::rename(&tmp, dst)
        .await
        .map_err(|e| CacheError::io(dst, e))?;
    debug!(dst = %dst.display(), bytes = written, "download verified");
    Ok(written)
}

/// Fetches the published digest of `url`, then downloads and verifies it.
pub(crate) async fn download_verified(client: &reqwest::Client, url: &str, dst: &Path) -> Result<u64, CacheError> {
    let sha256 = fetch_checksum(client, url).await?;
    download_file(client, url, dst, &sha256).await
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".download");
    dst.with_file_name(name)
}
