//! Image encoding: `DynamicImage` → PNG bytes, base64 and data URLs.
//!
//! PNG is lossless, so rasterised text stays crisp for every backend. Cloud
//! APIs take the bytes inline as `data:` URLs; the vision backend wants an
//! edgequake-llm [`ImageData`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:<mime>;base64,<payload>`
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", to_base64(bytes))
}

/// Wrap encoded image bytes for a multimodal chat request.
///
/// `detail: "high"` keeps fine print legible for tiling vision models.
pub fn image_data(mime: &str, bytes: &[u8]) -> ImageData {
    ImageData::new(to_base64(bytes), mime).with_detail("high")
}

/// A 1×1 white PNG, used to smoke-test external commands.
pub fn blank_png() -> Result<Vec<u8>, image::ImageError> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([255, 255, 255])));
    encode_png(&img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert!(png.starts_with(PNG_MAGIC));
    }

    #[test]
    fn data_url_shape() {
        let url = data_url("image/png", b"abc");
        assert_eq!(url, "data:image/png;base64,YWJj");
    }

    #[test]
    fn vision_payload_is_base64_png() {
        let png = blank_png().unwrap();
        let data = image_data("image/png", &png);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, png);
    }
}
