use std::path::Path;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::TransferError;
use crate::path::ValidatedPath;

const OCTET_STREAM: &str = "application/octet-stream";

// Extension (lowercase, no dot) to content type.
const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("txt", "text/plain"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("pdf", "application/pdf"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("zip", "application/zip"),
    ("rar", "application/x-rar-compressed"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
];

/// An opened file ready to be streamed as an attachment.
#[derive(Debug)]
pub struct Download {
    file: fs::File,
    len: u64,
    content_type: &'static str,
    file_name: String,
}

impl Download {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Opens a validated path for download. Only regular files qualify.
pub async fn open_download(path: &ValidatedPath) -> Result<Download, TransferError> {
    let metadata = fs::metadata(path.absolute())
        .await
        .map_err(TransferError::from_io)?;

    if metadata.is_dir() {
        return Err(TransferError::IsDirectory);
    }
    if !metadata.is_file() {
        return Err(TransferError::NotFound);
    }

    let file = fs::File::open(path.absolute())
        .await
        .map_err(TransferError::from_io)?;

    let file_name = path.file_name().unwrap_or("download").to_string();
    info!("Serving download: {} ({} bytes)", path.relative(), metadata.len());

    Ok(Download {
        file,
        len: metadata.len(),
        content_type: content_type_for(&file_name),
        file_name,
    })
}

impl IntoResponse for Download {
    fn into_response(self) -> Response {
        let stream = ReaderStream::new(self.file);
        let body = Body::from_stream(stream);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.len));
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&content_disposition(&self.file_name)).unwrap_or_else(|_| {
                HeaderValue::from_static("attachment; filename=\"download\"")
            }),
        );

        (StatusCode::OK, headers, body).into_response()
    }
}

/// Looks up the content type by extension, case-insensitively.
pub fn content_type_for(file_name: &str) -> &'static str {
    let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) else {
        return OCTET_STREAM;
    };
    let ext = ext.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map_or(OCTET_STREAM, |&(_, mime)| mime)
}

/// `Content-Disposition` value with an ASCII `filename` fallback and an
/// RFC 5987 `filename*` carrying the UTF-8 name.
pub fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}
