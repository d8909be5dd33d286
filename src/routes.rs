use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::fs;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::download::{open_download, Download};
use crate::error::{AppError, FormError, TransferError};
use crate::listing;
use crate::upload::{self, UploadTarget};
use crate::views::{browse_page, BrowsePage};
use crate::{AppState, SharedState};

const DOWNLOAD_PREFIX: &str = "/download/";
const UPLOAD_PREFIX: &str = "/upload/";

#[derive(Deserialize, Debug)]
struct QrQuery {
    data: Option<String>,
}

/// Builds the application router around `state`.
pub fn app(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let upload = get(upload_redirect_handler)
        .post(upload_handler)
        .layer(DefaultBodyLimit::max(state.config.upload_limit()));

    // `/*path` does not match an empty suffix, hence the bare-prefix routes.
    Router::new()
        .route("/generate-qrcode", get(qr_handler))
        .route("/download/", get(download_handler))
        .route("/download/*path", get(download_handler))
        .route("/upload/", upload.clone())
        .route("/upload/*path", upload)
        .fallback(browse_handler)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Lists a directory, or redirects a file to its download URL.
async fn browse_handler(
    State(state): State<SharedState>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(AppError::MethodNotAllowed);
    }

    let path = state.validate(uri.path())?;
    let metadata = fs::metadata(path.absolute())
        .await
        .map_err(TransferError::from_io)?;

    if !metadata.is_dir() {
        // Files are never served from the browse route.
        return Ok((
            StatusCode::FOUND,
            [(header::LOCATION, path.download_url())],
        )
            .into_response());
    }

    let entries = listing::list(&path, &state.root, state.config.follow_symlinks).await?;

    let page_url = format!("{}{}", page_base_url(&state, &headers), path.browse_url());
    let qr_data_url = match state.qr.encode(&page_url) {
        Ok(image) => Some(image.to_data_url()),
        Err(e) => {
            warn!("QR code for {} not rendered: {}", page_url, e);
            None
        }
    };

    Ok(browse_page(BrowsePage {
        dir: &path,
        entries,
        page_url,
        qr_data_url,
    })
    .into_response())
}

async fn download_handler(
    State(state): State<SharedState>,
    uri: Uri,
) -> Result<Download, AppError> {
    let raw = uri.path().strip_prefix(DOWNLOAD_PREFIX).unwrap_or_default();
    if raw.is_empty() {
        return Err(AppError::EmptyPath);
    }
    let path = state.validate(raw)?;
    Ok(open_download(&path).await?)
}

/// GET on an upload URL shows the directory it targets.
async fn upload_redirect_handler(
    State(state): State<SharedState>,
    uri: Uri,
) -> Result<Redirect, AppError> {
    let target = upload_target(&state, &uri).await?;
    Ok(Redirect::to(&target.path().browse_url()))
}

async fn upload_handler(
    State(state): State<SharedState>,
    uri: Uri,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let target = upload_target(&state, &uri).await?;
    let multipart = multipart.map_err(|e| FormError::BadMultipart(e.body_text()))?;

    let report = upload::receive(&target, multipart).await?;
    info!(
        "Upload into '/{}' finished: {} succeeded, {} failed",
        target.path().relative(),
        report.succeeded.len(),
        report.failed.len()
    );

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        report.to_string(),
    )
        .into_response())
}

async fn upload_target(state: &AppState, uri: &Uri) -> Result<UploadTarget, AppError> {
    let raw = uri.path().strip_prefix(UPLOAD_PREFIX).unwrap_or_default();
    let path = state.validate(raw).map_err(AppError::UploadPath)?;
    Ok(UploadTarget::new(path, &state.root, state.config.follow_symlinks).await?)
}

/// Returns the QR image for `data` as a `data:` URL.
async fn qr_handler(
    State(state): State<SharedState>,
    Query(query): Query<QrQuery>,
) -> Response {
    let Some(data) = query.data.filter(|d| !d.is_empty()) else {
        info!("QR code requested without data");
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.qr.encode(&data) {
        Ok(image) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            image.to_data_url(),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to generate QR code: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Scheme and authority the QR code should point at.
fn page_base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = state.config.public_base_url() {
        return url.to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}", host)
}
