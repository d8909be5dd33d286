use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{FormError, TransferError};
use crate::path::{self, encode_relative, join_relative, ShareRoot, ValidatedPath};

/// Multipart field name carrying uploaded files. May repeat.
pub const FILE_FIELD: &str = "file";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A validated path that was an existing directory when it was checked.
#[derive(Debug)]
pub struct UploadTarget {
    dir: ValidatedPath,
    root: ShareRoot,
    follow_symlinks: bool,
}

impl UploadTarget {
    pub async fn new(
        dir: ValidatedPath,
        root: &ShareRoot,
        follow_symlinks: bool,
    ) -> Result<Self, TransferError> {
        let metadata = fs::metadata(dir.absolute())
            .await
            .map_err(TransferError::from_io)?;
        if !metadata.is_dir() {
            return Err(TransferError::NotADirectory);
        }
        Ok(Self {
            dir,
            root: root.clone(),
            follow_symlinks,
        })
    }

    pub fn path(&self) -> &ValidatedPath {
        &self.dir
    }

    /// Where a part named `name` (already a base name) will be stored.
    ///
    /// The child path goes through the validator like any request path, and
    /// an existing symbolic link is refused even when links are followed.
    pub async fn destination(&self, name: &str) -> Result<PathBuf, TransferError> {
        let relative = join_relative(self.dir.relative(), name);
        path::validate(&encode_relative(&relative), &self.root, self.follow_symlinks)
            .map_err(|_| TransferError::UnsafeDestination)?;

        // The entry itself, not whatever a followed link resolves to.
        let dest = self.dir.absolute().join(name);
        match fs::symlink_metadata(&dest).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                warn!("Refusing upload onto symbolic link {}", dest.display());
                Err(TransferError::UnsafeDestination)
            }
            Ok(meta) if meta.is_dir() => Err(TransferError::IsDirectory),
            Ok(_) => Ok(dest),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(dest),
            Err(e) => Err(TransferError::Io(e)),
        }
    }
}

/// Failure while reading one chunk of an uploaded part.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("request body exceeds the upload limit")]
    TooLarge,

    #[error("{0}")]
    Read(String),
}

impl From<MultipartError> for ChunkError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ChunkError::TooLarge
        } else {
            ChunkError::Read(err.body_text())
        }
    }
}

impl From<ChunkError> for TransferError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::TooLarge => TransferError::BodyTooLarge,
            ChunkError::Read(msg) => TransferError::Interrupted(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFailure {
    pub name: String,
    pub reason: String,
}

/// Outcome of a multipart upload, part by part.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<PartFailure>,
}

impl fmt::Display for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Upload complete. Succeeded: {}, failed: {}",
            self.succeeded.len(),
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n{}: {}", failure.name, failure.reason)?;
        }
        Ok(())
    }
}

/// Reduces a client-supplied filename to its last path segment.
///
/// Both `/` and `\` count as separators and control characters are dropped.
/// Returns `None` when nothing usable is left.
pub fn base_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    match cleaned.trim() {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// A part being written to a fresh temporary file next to its destination.
///
/// `commit` renames it into place. Otherwise dropping it closes the handle
/// and deletes the temporary file.
struct PartialFile {
    temp: PathBuf,
    dest: PathBuf,
    file: Option<fs::File>,
    committed: bool,
}

impl PartialFile {
    async fn create(dest: &Path) -> io::Result<Self> {
        let temp = temp_path(dest);
        // `create_new` never opens through an existing link.
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .await?;
        Ok(Self {
            temp,
            dest: dest.to_path_buf(),
            file: Some(file),
            committed: false,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(chunk).await,
            None => Err(io::Error::other("file already closed")),
        }
    }

    async fn commit(mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        // Replaces a link that appeared since the check instead of writing through it.
        fs::rename(&self.temp, &self.dest).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        // Handle must be closed before removal.
        drop(self.file.take());
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.temp) {
            Ok(()) => debug!("Removed partial upload {}", self.temp.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove partial upload {}: {}",
                self.temp.display(),
                e
            ),
        }
    }
}

/// Hidden, unique sibling of `dest` used while a part is in flight.
fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(
        ".{}.{}-{}.part",
        name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Streams one part into `target` under its base name.
///
/// Returns the stored name. On any error the partially written file is gone
/// by the time this returns.
pub async fn store_part<S>(
    target: &UploadTarget,
    raw_name: &str,
    chunks: S,
) -> Result<String, TransferError>
where
    S: Stream<Item = Result<Bytes, ChunkError>>,
{
    let name = base_name(raw_name).ok_or(TransferError::InvalidFileName)?;
    let dest = target.destination(&name).await?;
    futures::pin_mut!(chunks);

    let mut partial = PartialFile::create(&dest)
        .await
        .map_err(TransferError::WriteFailed)?;

    let mut written: u64 = 0;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        partial
            .write(&chunk)
            .await
            .map_err(TransferError::WriteFailed)?;
        written += chunk.len() as u64;
    }
    partial.commit().await.map_err(TransferError::WriteFailed)?;

    info!(
        "File uploaded: {} -> {} ({} bytes)",
        raw_name,
        dest.display(),
        written
    );
    Ok(name)
}

/// Stores every `file` field of `multipart` into `target`.
///
/// Parts are independent: a failed part is recorded and the next one is
/// processed. Only an oversized body, or a form that is malformed before its
/// first file part, fails the request.
pub async fn receive(
    target: &UploadTarget,
    mut multipart: Multipart,
) -> Result<UploadReport, FormError> {
    let mut report = UploadReport::default();
    let mut parts = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(FormError::TooLarge)
            }
            // A body cut off after some parts keeps what was stored.
            Err(e) if parts > 0 => {
                warn!("Multipart body ended early: {}", e.body_text());
                break;
            }
            Err(e) => return Err(FormError::BadMultipart(e.body_text())),
        };

        if field.name() != Some(FILE_FIELD) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }
        parts += 1;

        let raw_name = field.file_name().unwrap_or_default().to_string();
        let chunks = field.map(|chunk| chunk.map_err(ChunkError::from));

        match store_part(target, &raw_name, chunks).await {
            Ok(stored) => report.succeeded.push(stored),
            Err(TransferError::BodyTooLarge) => return Err(FormError::TooLarge),
            Err(e) => {
                warn!("Upload of {:?} failed: {}", raw_name, e);
                let name = if raw_name.is_empty() {
                    "(unnamed)".to_string()
                } else {
                    raw_name
                };
                report.failed.push(PartFailure {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }

    if parts == 0 {
        return Err(FormError::NoFiles);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{validate, ShareRoot};
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{header, Request};
    use futures::stream;
    use tempfile::TempDir;

    const BOUNDARY: &str = "lanshare-test-boundary";

    async fn target_in(tmp: &TempDir, rel: &str) -> (ShareRoot, UploadTarget) {
        let root = ShareRoot::new(tmp.path()).unwrap();
        let path = validate(rel, &root, false).unwrap();
        let target = UploadTarget::new(path, &root, false).await.unwrap();
        (root, target)
    }

    fn chunks(
        parts: Vec<Result<&'static str, ChunkError>>,
    ) -> impl Stream<Item = Result<Bytes, ChunkError>> {
        stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| Bytes::from_static(s.as_bytes()))),
        )
    }

    async fn multipart(parts: &[(&str, &str, &str)]) -> Multipart {
        let mut body = String::new();
        for (field, file_name, content) in parts {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        let request = Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("x.txt").as_deref(), Some("x.txt"));
        assert_eq!(base_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(base_name("C:\\Users\\me\\photo.jpg").as_deref(), Some("photo.jpg"));
        assert_eq!(base_name("dir/sub/").as_deref(), None);
        assert_eq!(base_name("..").as_deref(), None);
        assert_eq!(base_name("").as_deref(), None);
        assert_eq!(base_name("bad\u{0}name\n.txt").as_deref(), Some("badname.txt"));
        assert_eq!(base_name("报告.pdf").as_deref(), Some("报告.pdf"));
    }

    #[tokio::test]
    async fn target_must_be_an_existing_directory() {
        let tmp = TempDir::new().unwrap();
        let root = ShareRoot::new(tmp.path()).unwrap();
        std::fs::write(root.as_path().join("f.txt"), "x").unwrap();

        let file = validate("f.txt", &root, false).unwrap();
        assert!(matches!(
            UploadTarget::new(file, &root, false).await,
            Err(TransferError::NotADirectory)
        ));

        let missing = validate("nope", &root, false).unwrap();
        assert!(matches!(
            UploadTarget::new(missing, &root, false).await,
            Err(TransferError::NotFound)
        ));
    }

    #[tokio::test]
    async fn store_part_writes_all_chunks() {
        let tmp = TempDir::new().unwrap();
        let (root, target) = target_in(&tmp, "").await;

        let stored = store_part(&target, "x.txt", chunks(vec![Ok("hello "), Ok("world")]))
            .await
            .unwrap();
        assert_eq!(stored, "x.txt");
        assert_eq!(
            std::fs::read(root.as_path().join("x.txt")).unwrap(),
            b"hello world"
        );
    }

    #[tokio::test]
    async fn store_part_keeps_traversal_names_inside_target() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("d")).unwrap();
        let (root, target) = target_in(&tmp, "d").await;

        let stored = store_part(&target, "../../evil.txt", chunks(vec![Ok("boo")]))
            .await
            .unwrap();
        assert_eq!(stored, "evil.txt");
        assert!(root.as_path().join("d/evil.txt").is_file());
        assert!(!root.as_path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn interrupted_part_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let (root, target) = target_in(&tmp, "").await;

        let err = store_part(
            &target,
            "broken.bin",
            chunks(vec![Ok("partial"), Err(ChunkError::Read("connection reset".into()))]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Interrupted(_)));
        assert!(!root.as_path().join("broken.bin").exists());

        // The next part is unaffected.
        store_part(&target, "fine.bin", chunks(vec![Ok("ok")]))
            .await
            .unwrap();
        assert!(root.as_path().join("fine.bin").is_file());
        assert_eq!(std::fs::read_dir(root.as_path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn oversized_part_is_removed_and_reported() {
        let tmp = TempDir::new().unwrap();
        let (root, target) = target_in(&tmp, "").await;

        let err = store_part(
            &target,
            "big.bin",
            chunks(vec![Ok("0123456789"), Err(ChunkError::TooLarge)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::BodyTooLarge));
        assert!(!root.as_path().join("big.bin").exists());
    }

    #[tokio::test]
    async fn receive_records_failures_and_continues() {
        let tmp = TempDir::new().unwrap();
        // A directory with the upload's name makes creating that file fail.
        std::fs::create_dir(tmp.path().join("taken")).unwrap();
        let (root, target) = target_in(&tmp, "").await;

        let form = multipart(&[
            ("file", "taken", "will not land"),
            ("file", "ok.txt", "landed"),
            ("comment", "ignored.txt", "not a file field"),
        ])
        .await;
        let report = receive(&target, form).await.unwrap();

        assert_eq!(report.succeeded, vec!["ok.txt".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "taken");
        assert!(root.as_path().join("taken").is_dir());
        assert_eq!(
            std::fs::read_to_string(root.as_path().join("ok.txt")).unwrap(),
            "landed"
        );
        assert!(!root.as_path().join("ignored.txt").exists());
        assert!(report
            .to_string()
            .starts_with("Upload complete. Succeeded: 1, failed: 1\ntaken: "));
    }

    #[tokio::test]
    async fn stored_part_replaces_existing_file_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let (root, target) = target_in(&tmp, "").await;
        std::fs::write(root.as_path().join("notes.txt"), "old").unwrap();

        store_part(&target, "notes.txt", chunks(vec![Ok("new")]))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(root.as_path().join("notes.txt")).unwrap(),
            "new"
        );
        let names: Vec<_> = std::fs::read_dir(root.as_path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("notes.txt")]);
    }

    #[tokio::test]
    async fn percent_in_name_is_stored_literally() {
        let tmp = TempDir::new().unwrap();
        let (root, target) = target_in(&tmp, "").await;

        store_part(&target, "a%20b.txt", chunks(vec![Ok("x")]))
            .await
            .unwrap();
        assert!(root.as_path().join("a%20b.txt").is_file());
        assert!(!root.as_path().join("a b.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn upload_never_writes_through_symlink() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("victim.txt");
        std::fs::write(&victim, "original").unwrap();
        symlink(&victim, tmp.path().join("notes.txt")).unwrap();

        for follow_symlinks in [false, true] {
            let root = ShareRoot::new(tmp.path()).unwrap();
            let dir = validate("", &root, follow_symlinks).unwrap();
            let target = UploadTarget::new(dir, &root, follow_symlinks).await.unwrap();

            let err = store_part(&target, "notes.txt", chunks(vec![Ok("overwritten")]))
                .await
                .unwrap_err();
            assert!(matches!(err, TransferError::UnsafeDestination));
            assert_eq!(std::fs::read_to_string(&victim).unwrap(), "original");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inside_symlink_is_refused_when_following() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let root = ShareRoot::new(tmp.path()).unwrap();
        std::fs::write(root.as_path().join("real.txt"), "kept").unwrap();
        symlink(root.as_path().join("real.txt"), root.as_path().join("alias.txt")).unwrap();

        let dir = validate("", &root, true).unwrap();
        let target = UploadTarget::new(dir, &root, true).await.unwrap();
        let err = store_part(&target, "alias.txt", chunks(vec![Ok("changed")]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::UnsafeDestination));
        assert_eq!(
            std::fs::read_to_string(root.as_path().join("real.txt")).unwrap(),
            "kept"
        );
    }

    #[tokio::test]
    async fn receive_without_file_fields_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let (_root, target) = target_in(&tmp, "").await;

        let form = multipart(&[("comment", "a.txt", "text")]).await;
        assert!(matches!(
            receive(&target, form).await,
            Err(FormError::NoFiles)
        ));
    }
}
