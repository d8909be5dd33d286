use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::views::error_response;

/// Why a request path was refused by the validator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    #[error("path is not valid percent-encoded UTF-8")]
    BadEncoding,

    #[error("path resolves outside the share root")]
    OutsideSandbox,
}

#[derive(Error, Debug)]
pub enum ListError {
    #[error("directory could not be read: {0}")]
    NotReadable(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("no such file or directory")]
    NotFound,

    #[error("path is a directory")]
    IsDirectory,

    #[error("path is not a directory")]
    NotADirectory,

    #[error("invalid filename")]
    InvalidFileName,

    #[error("destination is a symbolic link or outside the share root")]
    UnsafeDestination,

    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("upload interrupted: {0}")]
    Interrupted(String),

    #[error("request body exceeds the upload limit")]
    BodyTooLarge,

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl TransferError {
    /// Classifies a metadata/open failure.
    pub fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            TransferError::NotFound
        } else {
            TransferError::Io(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum FormError {
    #[error("malformed multipart body: {0}")]
    BadMultipart(String),

    #[error("no files in upload")]
    NoFiles,

    #[error("request body exceeds the upload limit")]
    TooLarge,
}

/// Error type returned by every handler. Converted into a status code and a
/// short message; details stay in the server log.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("upload target rejected: {0}")]
    UploadPath(PathError),

    #[error("empty download path")]
    EmptyPath,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    List(#[from] ListError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Form(#[from] FormError),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Path(PathError::BadEncoding) => (StatusCode::BAD_REQUEST, "Invalid path."),
            AppError::Path(PathError::OutsideSandbox) => (StatusCode::FORBIDDEN, "Access denied."),
            AppError::UploadPath(_) => (StatusCode::BAD_REQUEST, "Invalid upload target."),
            AppError::EmptyPath => (StatusCode::BAD_REQUEST, "Invalid download path."),
            AppError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed."),
            AppError::List(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error reading directory contents.",
            ),
            AppError::Transfer(err) => match err {
                TransferError::NotFound => (StatusCode::NOT_FOUND, "Path not found."),
                TransferError::IsDirectory => {
                    (StatusCode::BAD_REQUEST, "Directories cannot be downloaded.")
                }
                TransferError::NotADirectory => {
                    (StatusCode::BAD_REQUEST, "Upload target must be a directory.")
                }
                TransferError::InvalidFileName => (StatusCode::BAD_REQUEST, "Invalid filename."),
                TransferError::UnsafeDestination => (StatusCode::FORBIDDEN, "Access denied."),
                TransferError::BodyTooLarge => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "Upload exceeds the size limit.")
                }
                TransferError::WriteFailed(_)
                | TransferError::Interrupted(_)
                | TransferError::Io(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
                }
            },
            AppError::Form(err) => match err {
                FormError::BadMultipart(_) => {
                    (StatusCode::BAD_REQUEST, "Could not parse the upload form.")
                }
                FormError::NoFiles => (StatusCode::BAD_REQUEST, "No files found in upload."),
                FormError::TooLarge => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "Upload exceeds the size limit.")
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else if status == StatusCode::FORBIDDEN {
            warn!("Request refused: {}", self);
        } else {
            info!("Request rejected ({}): {}", status, self);
        }
        error_response(status, message)
    }
}
