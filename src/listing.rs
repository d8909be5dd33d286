use std::path::PathBuf;

use chrono::{DateTime, Local};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::ListError;
use crate::path::{directory_url, download_url, join_relative, ShareRoot, ValidatedPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed directory.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: EntryKind,
    pub is_directory: bool,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Local>>,
    /// Browse URL for directories, download URL for files.
    pub href: String,
    /// Raw target of a followed symbolic link.
    pub link_target: Option<PathBuf>,
}

/// Lists the direct children of `dir` in enumeration order.
///
/// Entries whose name is not UTF-8 or whose metadata cannot be read are
/// skipped. Symbolic links are skipped unless `follow_symlinks` is set, and
/// even then only links that resolve inside `root` are kept.
pub async fn list(
    dir: &ValidatedPath,
    root: &ShareRoot,
    follow_symlinks: bool,
) -> Result<Vec<DirectoryEntry>, ListError> {
    let mut reader = fs::read_dir(dir.absolute())
        .await
        .map_err(ListError::NotReadable)?;

    let mut entries = Vec::new();

    loop {
        let entry = match reader.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(
                    "Listing of {} stopped early: {}",
                    dir.absolute().display(),
                    e
                );
                break;
            }
        };
        let entry_path = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => {
                warn!(
                    "Skipping entry with non-UTF8 filename in {}",
                    dir.absolute().display()
                );
                continue;
            }
        };

        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to get file type for {}: {}", entry_path.display(), e);
                continue;
            }
        };

        let (metadata, link_target) = if file_type.is_symlink() {
            if !follow_symlinks {
                debug!("Skipping symbolic link {}", entry_path.display());
                continue;
            }
            match fs::canonicalize(&entry_path).await {
                Ok(resolved) if resolved.starts_with(root.as_path()) => {}
                Ok(resolved) => {
                    warn!(
                        "Skipping link {} pointing outside the share root ({})",
                        entry_path.display(),
                        resolved.display()
                    );
                    continue;
                }
                Err(e) => {
                    debug!("Skipping dangling link {}: {}", entry_path.display(), e);
                    continue;
                }
            }
            match fs::metadata(&entry_path).await {
                Ok(metadata) => (metadata, fs::read_link(&entry_path).await.ok()),
                Err(e) => {
                    warn!("Failed to get metadata for {}: {}", entry_path.display(), e);
                    continue;
                }
            }
        } else {
            match entry.metadata().await {
                Ok(metadata) => (metadata, None),
                Err(e) => {
                    warn!("Failed to get metadata for {}: {}", entry_path.display(), e);
                    continue;
                }
            }
        };

        let is_directory = metadata.is_dir();
        let relative = join_relative(dir.relative(), &name);
        let href = if is_directory {
            directory_url(&relative)
        } else {
            download_url(&relative)
        };

        entries.push(DirectoryEntry {
            name,
            kind: if is_directory {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            is_directory,
            size_bytes: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Local>::from),
            href,
            link_target,
        });
    }

    Ok(entries)
}
