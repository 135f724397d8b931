//! Inline images for the transcript
//!
//! Images produced by executed code are embedded as markdown data URIs so the
//! transcript stays a single self-contained string.

use anyhow::{Result, Context};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Composite an image onto an opaque white canvas using its own alpha
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut flat = RgbImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        flat.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    flat
}

/// Decode a base64 PNG, flatten it onto white and return a PNG data URI
pub fn png_data_uri(base64_png: &str) -> Result<String> {
    let bytes = BASE64.decode(base64_png.trim()).context("Image payload is not valid base64")?;
    let image = image::load_from_memory(&bytes).context("Failed to decode image")?;
    let flat = flatten_onto_white(&image);

    let mut encoded = Cursor::new(Vec::new());
    flat.write_to(&mut encoded, ImageFormat::Png).context("Failed to encode PNG")?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(encoded.into_inner())))
}

/// Read an image file verbatim into a data URI typed by its extension
pub fn path_data_uri(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    let ext = path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    Ok(format!("data:image/{};base64,{}", ext, BASE64.encode(bytes)))
}

/// Markdown line embedding a data URI
pub fn markdown_image(data_uri: &str) -> String {
    format!("![Image]({})\n", data_uri)
}
