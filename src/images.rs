//! Image helpers for uploads and vision model requests.
//!
//! Sniffs and decodes uploaded bytes, and downsizes images into JPEG
//! thumbnails before they are sent to the language model.

use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image is empty")]
    Empty,

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// MIME type of image bytes, if they are an image at all.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    infer::get(data)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
}

/// Check that uploaded bytes are a decodable image. Returns the MIME type.
pub fn validate_upload(data: &[u8]) -> Result<&'static str, ImageError> {
    if data.is_empty() {
        return Err(ImageError::Empty);
    }

    let mime = match infer::get(data) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => kind.mime_type(),
        Some(kind) => return Err(ImageError::Unsupported(kind.mime_type().to_string())),
        None => return Err(ImageError::Unsupported("unknown".to_string())),
    };

    image::load_from_memory(data)?;
    Ok(mime)
}

/// Scale so the longest side is at most `max_dimension`, keeping aspect ratio.
fn fit_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32, bool) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height, false);
    }
    let scale = (max_dimension as f64) / (width.max(height) as f64);
    let new_w = ((width as f64) * scale).round() as u32;
    let new_h = ((height as f64) * scale).round() as u32;
    (new_w.max(1), new_h.max(1), true)
}

/// Downscale and re-encode as JPEG.
pub fn thumbnail_jpeg(data: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(data)?;

    let (w, h) = img.dimensions();
    let (new_w, new_h, resize) = fit_dimensions(w, h, max_dimension);
    let img = if resize {
        img.resize(new_w, new_h, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(buf)
}

/// `data:` URL for embedding an image in a JSON request.
pub fn data_url(data: &[u8]) -> String {
    let mime = sniff_mime(data).unwrap_or("image/jpeg");
    let b64 = base64::engine::general_purpose::STANDARD.encode(data);
    format!("data:{};base64,{}", mime, b64)
}
