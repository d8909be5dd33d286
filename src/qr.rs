use base64::{engine::general_purpose::STANDARD, Engine as _};
use qrcode::{render::svg, EcLevel, QrCode};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("QR encoding failed: {0}")]
pub struct QrError(pub String);

/// An encoded QR symbol.
#[derive(Debug, Clone)]
pub struct QrImage {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl QrImage {
    /// `data:` URL suitable for an `<img src>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

/// Turns a string into a QR image.
pub trait QrEncoder: Send + Sync {
    fn encode(&self, data: &str) -> Result<QrImage, QrError>;
}

/// Renders QR codes as SVG.
#[derive(Debug, Clone)]
pub struct SvgQrEncoder {
    /// Minimum width and height in pixels.
    pub size: u32,
}

impl Default for SvgQrEncoder {
    fn default() -> Self {
        Self { size: 150 }
    }
}

impl QrEncoder for SvgQrEncoder {
    fn encode(&self, data: &str) -> Result<QrImage, QrError> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
            .map_err(|e| QrError(e.to_string()))?;
        let image = code
            .render()
            .min_dimensions(self.size, self.size)
            .quiet_zone(true)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build();
        Ok(QrImage {
            content_type: "image/svg+xml",
            bytes: image.into_bytes(),
        })
    }
}
