//! HTTP file server for a trusted local network.
//!
//! Exposes one directory tree for browsing, download and multipart upload,
//! and renders a QR code of the current page so a phone on the same network
//! can open it. Every request path goes through [`path::validate`] before it
//! reaches the filesystem.

pub mod config;
pub mod download;
pub mod error;
pub mod listing;
pub mod path;
pub mod qr;
pub mod routes;
pub mod upload;
pub mod views;

use std::sync::Arc;

pub use config::Config;
pub use error::{AppError, FormError, ListError, PathError, TransferError};
pub use path::{ShareRoot, ValidatedPath};
pub use qr::{QrEncoder, SvgQrEncoder};
pub use routes::app;

pub type SharedState = Arc<AppState>;

/// Immutable state shared by every request.
pub struct AppState {
    /// Directory tree being served
    pub root: ShareRoot,
    pub config: Config,
    pub qr: Box<dyn QrEncoder>,
}

impl AppState {
    pub fn new(root: ShareRoot, config: Config) -> Self {
        Self {
            root,
            config,
            qr: Box::new(SvgQrEncoder::default()),
        }
    }

    /// Replaces the QR encoder.
    pub fn with_qr_encoder(mut self, encoder: impl QrEncoder + 'static) -> Self {
        self.qr = Box::new(encoder);
        self
    }

    /// Validates a raw request path against this server's root.
    pub fn validate(&self, raw: &str) -> Result<ValidatedPath, PathError> {
        path::validate(raw, &self.root, self.config.follow_symlinks)
    }
}
