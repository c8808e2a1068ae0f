//! QR rendering of pairing connection URLs.

use base64::{engine::general_purpose::STANDARD, Engine};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};

use crate::errors::{TetherError, TetherResult};

/// Rendered edge length in pixels.
const QR_SIZE: u32 = 256;

/// The URL a second device opens to join with `code`.
pub fn connect_url(prefix: &str, code: &str) -> String {
    format!("{prefix}{code}")
}

/// Render `text` as an SVG QR code wrapped in a `data:` URL, ready to drop
/// into an `<img src>`.
pub fn render_data_url(text: &str) -> TetherResult<String> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::M)
        .map_err(|e| TetherError::QrError(e.to_string()))?;

    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(QR_SIZE, QR_SIZE)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .quiet_zone(true)
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}
