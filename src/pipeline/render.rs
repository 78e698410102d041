//! pdfium access: library binding, text-layer extraction and page
//! rasterisation.
//!
//! pdfium is not async-safe, so every entry point here is either a blocking
//! function or an async wrapper that moves the work onto
//! `tokio::task::spawn_blocking`.
//!
//! Binding is explicit and fallible: `PDFIUM_LIB_PATH` (a directory holding
//! the platform library) is tried first, then the system library. When
//! neither is present the pdfium-based strategies report
//! [`ExtractError::PdfiumUnavailable`] and the extractor moves on.

use crate::error::ExtractError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bind to a pdfium shared library.
pub fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        if !dir.is_empty() {
            let lib = Pdfium::pdfium_platform_library_name_at_path(&dir);
            match Pdfium::bind_to_library(&lib) {
                Ok(bindings) => return Ok(Pdfium::new(bindings)),
                Err(e) => warn!("PDFIUM_LIB_PATH={} could not be bound: {:?}", dir, e),
            }
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| ExtractError::PdfiumUnavailable(format!("{:?}", e)))
}

fn parse_error(e: PdfiumError) -> ExtractError {
    ExtractError::Parse {
        strategy: "pdfium",
        detail: format!("{:?}", e),
    }
}

/// Text layer of every page, joined by newlines, plus the page count.
pub fn text_layer_blocking(bytes: &[u8]) -> Result<(String, usize), ExtractError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(parse_error)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let mut text = String::new();

    for (idx, page) in pages.iter().enumerate() {
        match page.text() {
            Ok(page_text) => {
                let s = page_text.all();
                debug!("pdfium page {}: {} chars", idx + 1, s.len());
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&s);
            }
            Err(e) => debug!("pdfium page {} has no text layer: {:?}", idx + 1, e),
        }
    }

    Ok((text, total_pages))
}

/// Number of pages pdfium sees in the document.
pub async fn page_count(bytes: Arc<[u8]>) -> Result<usize, ExtractError> {
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, None)
            .map_err(parse_error)?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| ExtractError::Task(format!("Page count task panicked: {}", e)))?
}

/// Rasterise one page (0-based `index`) with its longest edge capped at
/// `max_pixels`, returned as PNG bytes.
pub async fn render_page_png(
    bytes: Arc<[u8]>,
    index: usize,
    max_pixels: u32,
) -> Result<Vec<u8>, ExtractError> {
    tokio::task::spawn_blocking(move || render_page_png_blocking(&bytes, index, max_pixels))
        .await
        .map_err(|e| ExtractError::Task(format!("Render task panicked: {}", e)))?
}

fn render_page_png_blocking(
    bytes: &[u8],
    index: usize,
    max_pixels: u32,
) -> Result<Vec<u8>, ExtractError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(parse_error)?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let raster_err = |e: PdfiumError| ExtractError::Rasterisation {
        page: index + 1,
        detail: format!("{:?}", e),
    };

    let page = document.pages().get(index as u16).map_err(raster_err)?;
    let bitmap = page.render_with_config(&render_config).map_err(raster_err)?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        index + 1,
        image.width(),
        image.height()
    );

    encode_png(&image).map_err(|e| ExtractError::Rasterisation {
        page: index + 1,
        detail: e.to_string(),
    })
}

/// PNG-encode a rendered page. Lossless keeps glyph edges crisp for OCR.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image_is_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
