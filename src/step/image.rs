use std::io::Cursor;

use camino::Utf8PathBuf;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageFormat, ImageReader};
use thiserror::Error;

use crate::task::Asset;

/// Quality factor used when re-encoding JPEG files.
const JPEG_QUALITY: u8 = 80;

/// Errors that can occur when optimizing images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// An error occurred during image decoding or encoding.
    #[error("Image processing error in {0}:\n{1}")]
    Image(Utf8PathBuf, image::ImageError),
}

/// Recompress PNG and JPEG files. The result is only kept when it is
/// strictly smaller than the input; other formats pass through untouched.
pub fn optimize(asset: Asset) -> Result<Asset, ImageError> {
    let format = match asset.path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("png") => ImageFormat::Png,
        Some("jpg" | "jpeg") => ImageFormat::Jpeg,
        _ => return Ok(asset),
    };

    let data = recompress(&asset.data, format)
        .map_err(|e| ImageError::Image(asset.source.clone(), e))?;

    if data.len() < asset.data.len() {
        tracing::debug!(
            "optimized {} ({}B -> {}B)",
            asset.path,
            asset.data.len(),
            data.len()
        );
        Ok(Asset { data, ..asset })
    } else {
        Ok(asset)
    }
}

/// Decode, bake the EXIF orientation into the pixels and encode again. The
/// re-encoded file carries no EXIF, so the rotation has to be applied here
/// or viewers would show the raw sensor orientation. ICC profiles are
/// copied over.
fn recompress(buffer: &[u8], format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut decoder = ImageReader::with_format(Cursor::new(buffer), format).into_decoder()?;
    let orientation = decoder.orientation()?;
    let icc = decoder.icc_profile()?;

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    let mut out = Cursor::new(Vec::new());

    match format {
        ImageFormat::Jpeg => {
            // JPEG carries no alpha channel
            let img = DynamicImage::ImageRgb8(img.to_rgb8());
            let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            if let Some(icc) = icc {
                encoder.set_icc_profile(icc).ok();
            }
            img.write_with_encoder(encoder)?;
        }
        _ => {
            let mut encoder =
                PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
            if let Some(icc) = icc {
                encoder.set_icc_profile(icc).ok();
            }
            img.write_with_encoder(encoder)?;
        }
    }

    Ok(out.into_inner())
}
