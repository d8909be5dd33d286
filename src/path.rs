//! Request path validation.
//!
//! Every filesystem path the server touches comes out of [`validate`]. The
//! pipeline is decode → normalize → join → resolve → contain; each stage is a
//! small function so it can be exercised on its own.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::PathError;

/// The directory tree exposed by the server. Always canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRoot(PathBuf);

impl ShareRoot {
    /// Canonicalizes `dir` and checks that it is an existing directory.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let canonical = std::fs::canonicalize(dir.as_ref())?;
        if !canonical.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("share root '{}' is not a directory", canonical.display()),
            ));
        }
        Ok(Self(canonical))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// A request path that passed validation.
///
/// `relative` is slash-separated with no leading slash and no `.`, `..` or
/// empty segments; the root is `""`. `absolute` lies inside the share root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    relative: String,
    absolute: PathBuf,
}

impl ValidatedPath {
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Last segment of the relative path, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.relative.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Browse URL of this path treated as a directory (`/`, `/a/b/`).
    pub fn browse_url(&self) -> String {
        directory_url(&self.relative)
    }

    pub fn download_url(&self) -> String {
        download_url(&self.relative)
    }

    /// Browse URL of the parent directory, `None` for the root.
    pub fn parent_url(&self) -> Option<String> {
        if self.is_root() {
            return None;
        }
        let parent = self.relative.rsplit_once('/').map_or("", |(parent, _)| parent);
        Some(directory_url(parent))
    }
}

/// Validates `raw` against `root`.
///
/// A path that does not exist yet still validates; callers report "not
/// found" themselves. With `follow_symlinks` unset, any symbolic link on the
/// existing part of the path is refused.
pub fn validate(
    raw: &str,
    root: &ShareRoot,
    follow_symlinks: bool,
) -> Result<ValidatedPath, PathError> {
    let decoded = decode(raw)?;
    let relative = normalize(&decoded).map_err(|e| {
        warn!("Path traversal attempt rejected: {:?}", raw);
        e
    })?;
    let candidate = join(root.as_path(), &relative);
    let absolute = resolve(root.as_path(), &candidate, follow_symlinks)?;
    contain(root.as_path(), &absolute).map_err(|e| {
        warn!(
            "Path '{}' resolved to '{}' which is outside root '{}'",
            relative,
            absolute.display(),
            root.as_path().display()
        );
        e
    })?;
    debug!("Validated '{}' as '{}'", raw, absolute.display());
    Ok(ValidatedPath { relative, absolute })
}

/// Percent-decodes a raw path. NUL bytes are refused along with invalid UTF-8.
pub fn decode(raw: &str) -> Result<String, PathError> {
    let decoded = urlencoding::decode(raw).map_err(|_| PathError::BadEncoding)?;
    if decoded.contains('\0') {
        return Err(PathError::BadEncoding);
    }
    Ok(decoded.into_owned())
}

/// Lexically normalizes a decoded path into a root-relative form.
///
/// Backslashes count as separators. One leading slash is dropped; a second
/// one (`//etc`) or a drive prefix (`C:`) is an absolute path and is refused,
/// as is any `..` that would climb above the root.
pub fn normalize(decoded: &str) -> Result<String, PathError> {
    let unified = decoded.replace('\\', "/");
    let trimmed = unified.strip_prefix('/').unwrap_or(&unified);
    if trimmed.starts_with('/') {
        return Err(PathError::OutsideSandbox);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::OutsideSandbox);
                }
            }
            other if is_drive_prefix(other) => return Err(PathError::OutsideSandbox),
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Joins a normalized relative path onto the root, one segment at a time.
pub fn join(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Resolves the longest existing prefix of `candidate` on disk and re-appends
/// the part that does not exist yet.
fn resolve(root: &Path, candidate: &Path, follow_symlinks: bool) -> Result<PathBuf, PathError> {
    let tail = candidate
        .strip_prefix(root)
        .map_err(|_| PathError::OutsideSandbox)?;

    let mut existing = root.to_path_buf();
    let mut existing_is_dir = true;
    let mut missing = PathBuf::new();
    let mut components = tail.components();

    while let Some(component) = components.next() {
        if !existing_is_dir {
            missing.push(component);
            missing.extend(components);
            break;
        }
        let next = existing.join(component);
        match std::fs::symlink_metadata(&next) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                if !follow_symlinks {
                    warn!("Refusing symbolic link on request path: {}", next.display());
                    return Err(PathError::OutsideSandbox);
                }
                existing_is_dir = std::fs::metadata(&next).map(|m| m.is_dir()).unwrap_or(false);
                existing = next;
            }
            Ok(metadata) => {
                existing_is_dir = metadata.is_dir();
                existing = next;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                missing.push(component);
                missing.extend(components);
                break;
            }
            Err(e) => {
                warn!("Failed to inspect '{}': {}", next.display(), e);
                return Err(PathError::OutsideSandbox);
            }
        }
    }

    let canonical = existing.canonicalize().map_err(|e| {
        // Dangling links land here.
        warn!("Failed to canonicalize '{}': {}", existing.display(), e);
        PathError::OutsideSandbox
    })?;

    if missing.as_os_str().is_empty() {
        Ok(canonical)
    } else {
        Ok(canonical.join(missing))
    }
}

/// Checks that `resolved` is the root or lies below it.
pub fn contain(root: &Path, resolved: &Path) -> Result<(), PathError> {
    match resolved.strip_prefix(root) {
        Ok(rest) if !rest.components().any(|c| matches!(c, Component::ParentDir)) => Ok(()),
        _ => Err(PathError::OutsideSandbox),
    }
}

/// Percent-encodes each segment of a relative path.
pub fn encode_relative(relative: &str) -> String {
    relative
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `/` for the root, `/a/b/` otherwise.
pub fn directory_url(relative: &str) -> String {
    let encoded = encode_relative(relative);
    if encoded.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", encoded)
    }
}

pub fn download_url(relative: &str) -> String {
    format!("/download/{}", encode_relative(relative))
}

/// Appends `name` to a relative directory path.
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
