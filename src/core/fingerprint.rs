//! Perceptual fingerprints.
//!
//! A fingerprint is a 64-bit DCT hash (pHash): the image is reduced to
//! grayscale, shrunk to 16x16, transformed with a DCT and the 8x8
//! low-frequency block is thresholded against its median. Re-encoding or
//! mild resizing leaves the low frequencies and therefore the bits
//! unchanged, so equal fingerprints mean "same picture" rather than "same
//! bytes".

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage, imageops};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::fmt;
use std::path::Path;

use crate::core::codec;
use crate::error::ItemError;

/// Fixed-width perceptual hash of an image's pixel content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub(crate) Vec<u8>);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Composite any alpha channel onto opaque white.
///
/// Transparent pixels would otherwise decode as black and drag the hash (and
/// saved JPEGs) toward dark content. Images without alpha pass through.
pub fn flatten_alpha(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return img;
    }
    let (width, height) = img.dimensions();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

pub struct FingerprintEngine {
    hasher: Hasher,
}

impl FingerprintEngine {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_size(8, 8)
            .preproc_dct()
            .hash_alg(HashAlg::Median)
            .to_hasher();
        Self { hasher }
    }

    /// Fingerprint decoded pixels. The input is not modified.
    pub fn fingerprint(&self, img: &DynamicImage) -> Fingerprint {
        let flat = flatten_alpha(img.clone());
        Fingerprint(self.hasher.hash_image(&flat).as_bytes().to_vec())
    }

    pub fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint, ItemError> {
        let img = codec::open(path)?;
        Ok(self.fingerprint(&img))
    }
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    /// 8x8 grid of flat gray cells at pseudo-random levels.
    fn texture(size: u32, seed: u32) -> RgbImage {
        let cell = size / 8;
        ImageBuffer::from_fn(size, size, |x, y| {
            let c = x / cell + (y / cell) * 8;
            let mut h = c
                .wrapping_mul(0x9E37_79B1)
                .wrapping_add(seed.wrapping_mul(0x85EB_CA77));
            h ^= h >> 15;
            h = h.wrapping_mul(0x2C1B_3C6D);
            h ^= h >> 12;
            let v = (h >> 24) as u8;
            Rgb([v, v, v])
        })
    }

    fn save_jpeg(img: &RgbImage, path: &Path, quality: u8) {
        let mut out = fs::File::create(path).unwrap();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
            .unwrap();
    }

    #[test]
    fn test_stable_under_reencoding() {
        let temp_dir = TempDir::new().unwrap();
        let img = texture(256, 5);
        let high = temp_dir.path().join("high.jpg");
        let low = temp_dir.path().join("low.jpg");
        save_jpeg(&img, &high, 95);
        save_jpeg(&img, &low, 70);

        let engine = FingerprintEngine::new();
        let a = engine.fingerprint_file(&high).unwrap();
        let b = engine.fingerprint_file(&low).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), 8);
    }

    #[test]
    fn test_stable_under_resize() {
        let engine = FingerprintEngine::new();
        let big = DynamicImage::ImageRgb8(texture(512, 5));
        let small = big.resize_exact(256, 256, imageops::FilterType::Triangle);
        assert_eq!(engine.fingerprint(&big), engine.fingerprint(&small));
    }

    #[test]
    fn test_different_content_differs() {
        let engine = FingerprintEngine::new();
        let horizontal = DynamicImage::ImageRgb8(ImageBuffer::from_fn(128, 128, |x, _| {
            let v = (x * 2) as u8;
            Rgb([v, v, v])
        }));
        let vertical = DynamicImage::ImageRgb8(ImageBuffer::from_fn(128, 128, |_, y| {
            let v = (y * 2) as u8;
            Rgb([v, v, v])
        }));
        assert_ne!(engine.fingerprint(&horizontal), engine.fingerprint(&vertical));
    }

    #[test]
    fn test_distinct_textures_are_not_duplicates() {
        let engine = FingerprintEngine::new();
        let prints: Vec<Fingerprint> = [5, 21, 26, 30, 38]
            .into_iter()
            .map(|seed| engine.fingerprint(&DynamicImage::ImageRgb8(texture(256, seed))))
            .collect();
        for (i, a) in prints.iter().enumerate() {
            for b in &prints[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_hash_is_not_degenerate() {
        // a DCT hash thresholded on its median sets half of its bits
        let fp = FingerprintEngine::new().fingerprint(&DynamicImage::ImageRgb8(texture(256, 21)));
        let ones: u32 = fp.as_bytes().iter().map(|b| b.count_ones()).sum();
        assert!((24..=40).contains(&ones), "{ones} bits set in {fp}");
    }

    #[test]
    fn test_transparent_pixels_flatten_to_white() {
        let transparent = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            Rgba([0, 0, 0, 0]),
        ));
        let flat = flatten_alpha(transparent);
        assert!(!flat.color().has_alpha());
        assert_eq!(flat.to_rgb8().get_pixel(2, 2), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_opaque_alpha_keeps_colors() {
        let opaque = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            Rgba([10, 20, 30, 255]),
        ));
        assert_eq!(flatten_alpha(opaque).to_rgb8().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_undecodable_file_is_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        fs::write(&path, b"definitely not a jpeg").unwrap();

        let engine = FingerprintEngine::new();
        assert!(matches!(
            engine.fingerprint_file(&path),
            Err(ItemError::Decode { .. })
        ));
    }

    #[test]
    fn test_display_is_hex() {
        let fp = Fingerprint(vec![0x0a, 0xff]);
        assert_eq!(fp.to_string(), "0aff");
    }
}
