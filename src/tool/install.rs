//! Fetching and unpacking the SteamCMD distribution archive

use crate::error::{Error, Result};
use futures::StreamExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub(super) const ARCHIVE_TEMP_NAME: &str = ".steamcmd-archive.tmp";
/// Unpack target; only complete installs leave it
pub(super) const STAGING_DIR_NAME: &str = ".steamcmd-staging";

/// Download `url`, unpack it into a staging directory and move the result
/// into `tool_dir` with the launcher last, so `locate` never sees a partial
/// install. Returns the installed launcher.
///
/// Percent is reported only when the server sends a content length.
pub(super) async fn download_and_install<F>(
    client: &reqwest::Client,
    url: &str,
    tool_dir: &Path,
    launcher_name: &str,
    on_progress: &F,
) -> Result<PathBuf>
where
    F: Fn(f64) + Send + Sync,
{
    let archive_path = tool_dir.join(ARCHIVE_TEMP_NAME);
    let staging = tool_dir.join(STAGING_DIR_NAME);
    // leftovers of an interrupted run
    remove_staging(&staging).await;
    tokio::fs::create_dir_all(&staging).await?;

    let result: Result<PathBuf> = async {
        fetch(client, url, &archive_path, on_progress).await?;
        let archive = archive_path.clone();
        let (unpack_dir, dest) = (staging.clone(), tool_dir.to_path_buf());
        let launcher = launcher_name.to_string();
        let zip = is_zip(url);
        tokio::task::spawn_blocking(move || {
            if zip {
                unpack_zip(&archive, &unpack_dir)?;
            } else {
                unpack_tar_gz(&archive, &unpack_dir)?;
            }
            promote(&unpack_dir, &dest, &launcher)
        })
        .await
        .map_err(|e| Error::Install(format!("unpack task failed: {}", e)))?
    }
    .await;

    if let Err(e) = tokio::fs::remove_file(&archive_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %archive_path.display(), error = %e, "Failed to remove archive");
    }
    remove_staging(&staging).await;

    result
}

async fn remove_staging(staging: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %staging.display(), error = %e, "Failed to remove staging directory");
    }
}

/// Move the unpacked tree from `staging` into `dest`, launcher last
fn promote(staging: &Path, dest: &Path, launcher_name: &str) -> Result<PathBuf> {
    let staged_launcher = staging.join(launcher_name);
    if !staged_launcher.is_file() {
        return Err(Error::Install(format!(
            "archive did not contain {}",
            launcher_name
        )));
    }
    make_executable(&staged_launcher)?;

    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        if entry.file_name() == launcher_name {
            continue;
        }
        let target = dest.join(entry.file_name());
        // without a launcher anything already here is from an incomplete install
        if target.is_dir() {
            std::fs::remove_dir_all(&target)?;
        } else if target.exists() {
            std::fs::remove_file(&target)?;
        }
        std::fs::rename(entry.path(), &target)?;
    }

    let launcher = dest.join(launcher_name);
    std::fs::rename(&staged_launcher, &launcher)?;
    Ok(launcher)
}

async fn fetch<F>(client: &reqwest::Client, url: &str, path: &Path, on_progress: &F) -> Result<()>
where
    F: Fn(f64) + Send + Sync,
{
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Install(format!("failed to download {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::Install(format!(
            "download of {} failed with status {}",
            url,
            response.status()
        )));
    }

    let total = response.content_length().filter(|len| *len > 0);
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    let mut last_reported = -1.0;

    on_progress(0.0);
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| Error::Install(format!("download of {} interrupted: {}", url, e)))?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        if let Some(total) = total {
            let percent = (received as f64 / total as f64 * 100.0).min(100.0).floor();
            if percent > last_reported {
                last_reported = percent;
                on_progress(percent);
            }
        }
    }
    file.flush().await?;

    if received == 0 {
        return Err(Error::Install(format!("download of {} was empty", url)));
    }

    on_progress(100.0);
    tracing::debug!(url, bytes = received, "SteamCMD archive downloaded");
    Ok(())
}

fn is_zip(url: &str) -> bool {
    url.split(['?', '#'])
        .next()
        .is_some_and(|path| path.to_ascii_lowercase().ends_with(".zip"))
}

fn unpack_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let entries = tar
        .entries()
        .map_err(|e| Error::Install(format!("invalid tar.gz archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::Install(format!("invalid tar.gz archive: {}", e)))?;
        // unpack_in refuses entries escaping `dest`
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| Error::Install(format!("failed to unpack archive entry: {}", e)))?;
        if !unpacked {
            let path = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
            tracing::warn!(entry = %path, "Skipped unsafe archive entry");
        }
    }
    Ok(())
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::Install(format!("invalid zip archive: {}", e)))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::Install(format!("invalid zip archive: {}", e)))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(entry = entry.name(), "Skipped unsafe archive entry");
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Ensure the launcher has its executable bits set
fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
