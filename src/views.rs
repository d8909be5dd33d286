use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use humansize::{format_size, BINARY};
use maud::{html, Markup, PreEscaped, DOCTYPE};

use crate::listing::DirectoryEntry;
use crate::path::{encode_relative, ValidatedPath};

const STYLE: &str = "
body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 0; background: #f8fafc; color: #1e293b; }
.container { max-width: 1000px; margin: 0 auto; padding: 1rem; }
header { display: flex; justify-content: space-between; align-items: center; }
table { width: 100%; border-collapse: collapse; background: #fff; }
td, th { padding: .6rem 1rem; border-bottom: 1px solid #e2e8f0; text-align: left; }
.size, .time { font-family: monospace; color: #64748b; white-space: nowrap; }
.empty { padding: 2rem; text-align: center; color: #64748b; }
.qr img { width: 150px; height: 150px; }
";

/// Everything the listing page shows.
pub struct BrowsePage<'a> {
    pub dir: &'a ValidatedPath,
    pub entries: Vec<DirectoryEntry>,
    /// Absolute URL of this page, encoded in the QR code.
    pub page_url: String,
    /// `data:` URL of the QR image, if encoding worked.
    pub qr_data_url: Option<String>,
}

/// Helper to generate consistent Maud-based error responses.
pub fn error_response(status_code: StatusCode, message: &str) -> Response {
    let markup = html! {
        div style="padding: 10px; border: 1px solid red; color: red; margin: 10px;" {
            h2 { "Error" }
            p { (message) }
        }
    };
    (status_code, markup).into_response()
}

/// Renders a directory listing. Directories come first, then files, each
/// group ordered case-insensitively by name.
pub fn browse_page(page: BrowsePage<'_>) -> Markup {
    let BrowsePage {
        dir,
        mut entries,
        page_url,
        qr_data_url,
    } = page;

    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    let current_display_path = format!("/{}", dir.relative());
    let upload_action = format!("/upload/{}", encode_relative(dir.relative()));

    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "File Server - " (current_display_path) }
                style { (PreEscaped(STYLE)) }
            }
            body {
                div class="container" {
                    header {
                        h1 { "File Server" }
                        @if let Some(src) = &qr_data_url {
                            div class="qr" {
                                img src=(src) alt="QR code for this page";
                                p { (page_url) }
                            }
                        }
                    }

                    div #current-path { "Current: " (current_display_path) }

                    form method="post" action=(upload_action) enctype="multipart/form-data" {
                        input type="file" name="file" multiple;
                        button type="submit" { "Upload" }
                    }

                    @if let Some(parent) = dir.parent_url() {
                        p class="back" { a href=(parent) { "⬆ Parent directory" } }
                    }

                    @if entries.is_empty() {
                        div class="empty" { "This folder is empty" }
                    } @else {
                        table {
                            thead {
                                tr { th { "Name" } th { "Size" } th { "Modified" } }
                            }
                            tbody {
                                @for entry in &entries {
                                    tr {
                                        td {
                                            @if entry.is_directory {
                                                a class="folder" href=(entry.href) { "📁 " (entry.name) "/" }
                                            } @else {
                                                a class="file" href=(entry.href) { "📄 " (entry.name) }
                                            }
                                        }
                                        td class="size" {
                                            @if entry.is_directory { "-" } @else { (format_size(entry.size_bytes, BINARY)) }
                                        }
                                        td class="time" {
                                            @if let Some(modified) = entry.modified_at {
                                                (modified.format("%Y-%m-%d %H:%M:%S").to_string())
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }

                    footer { "lanshare v" (env!("CARGO_PKG_VERSION")) }
                }
            }
        }
    }
}
