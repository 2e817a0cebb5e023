use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, RgbImage};
use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::error::ItemError;

/// Quality of every JPEG written by the pipeline.
pub const JPEG_QUALITY: u8 = 85;

/// Decode an image file, trusting its content over its extension.
pub fn open(path: &Path) -> Result<DynamicImage, ItemError> {
    let decode_err = |source| ItemError::Decode {
        origin: path.display().to_string(),
        source,
    };
    ImageReader::open(path)
        .map_err(|e| ItemError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| ItemError::io(path, e))?
        .decode()
        .map_err(decode_err)
}

pub fn decode_bytes(bytes: &[u8], origin: &str) -> Result<DynamicImage, ItemError> {
    image::load_from_memory(bytes).map_err(|source| ItemError::Decode {
        origin: origin.to_string(),
        source,
    })
}

/// Encode as JPEG and write to `path`, replacing any existing file.
///
/// Encoding happens in memory first so a failed encode never truncates the
/// file already on disk.
pub fn write_jpeg(img: &RgbImage, path: &Path) -> Result<(), ItemError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
        .map_err(|source| ItemError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    fs::write(path, buf.into_inner()).map_err(|e| ItemError::io(path, e))
}
