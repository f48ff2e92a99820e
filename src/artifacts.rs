//! Finding downloaded files and turning them into links
//!
//! [`Artifacts`] does not collect anything up front: every iteration walks
//! the install directory again, so the same value can be listed repeatedly
//! and always reflects what is on disk.

use crate::types::ArtifactRef;
use std::path::{Path, PathBuf};
use url::Url;
use walkdir::{DirEntry, FilterEntry, WalkDir};

/// SteamCMD's bookkeeping directory inside every install directory
pub const BOOKKEEPING_DIR: &str = "steamapps";

/// Locates downloaded files under the download root
#[derive(Clone, Debug)]
pub struct ArtifactLocator {
    download_root: PathBuf,
    base_url: String,
}

impl ArtifactLocator {
    /// Create a locator for files under `download_root`, served below
    /// `<base_url>/files/`
    pub fn new(download_root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            download_root: download_root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Root all install directories live under
    pub fn download_root(&self) -> &Path {
        &self.download_root
    }

    /// Files of one install directory (relative to the download root)
    pub fn locate(&self, install_dir: &Path) -> Artifacts {
        Artifacts {
            locator: self.clone(),
            dir: self.download_root.join(install_dir),
        }
    }

    /// Public URL of a file, given its `/`-separated path relative to the
    /// download root
    pub fn file_url(&self, relative_path: &str) -> String {
        match Url::parse(&self.base_url) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments
                        .pop_if_empty()
                        .push("files")
                        .extend(relative_path.split('/').filter(|s| !s.is_empty()));
                }
                url.to_string()
            }
            Err(_) => format!("{}/files/{}", self.base_url, relative_path),
        }
    }

    fn artifact_for(&self, entry: &DirEntry) -> Option<ArtifactRef> {
        let relative = entry.path().strip_prefix(&self.download_root).ok()?;
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size_bytes = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                return None;
            }
        };

        Some(ArtifactRef {
            path: entry.path().to_path_buf(),
            url: self.file_url(&relative_path),
            relative_path,
            size_bytes,
        })
    }
}

/// Lazy, restartable listing of the files in one install directory
#[derive(Clone, Debug)]
pub struct Artifacts {
    locator: ArtifactLocator,
    dir: PathBuf,
}

impl Artifacts {
    /// Directory being listed
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start a fresh walk
    pub fn iter(&self) -> ArtifactIter<'_> {
        let walk = WalkDir::new(&self.dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(not_bookkeeping as fn(&DirEntry) -> bool);
        ArtifactIter {
            locator: &self.locator,
            walk,
        }
    }

    /// Whether the directory currently holds no files
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a Artifacts {
    type Item = ArtifactRef;
    type IntoIter = ArtifactIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One walk over an install directory
pub struct ArtifactIter<'a> {
    locator: &'a ArtifactLocator,
    walk: FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
}

impl Iterator for ArtifactIter<'_> {
    type Item = ArtifactRef;

    fn next(&mut self) -> Option<ArtifactRef> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    // a missing install directory ends up here
                    tracing::debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(artifact) = self.locator.artifact_for(&entry) {
                return Some(artifact);
            }
        }
    }
}

fn not_bookkeeping(entry: &DirEntry) -> bool {
    !(entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == BOOKKEEPING_DIR)
}
