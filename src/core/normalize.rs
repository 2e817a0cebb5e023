use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::path::PathBuf;

use crate::batch::{Tally, run_items};
use crate::cancel::CancelToken;
use crate::core::codec;
use crate::core::fingerprint::flatten_alpha;
use crate::error::{ItemError, StageError};
use crate::workdir::ImageRef;

#[derive(Debug, Default)]
pub struct TransformReport {
    /// Files written by the stage
    pub written: Vec<PathBuf>,
    pub skipped: usize,
    pub failed: usize,
}

impl TransformReport {
    fn from_batch(results: Vec<Option<PathBuf>>, tally: Tally) -> Self {
        Self {
            written: results.into_iter().flatten().collect(),
            skipped: tally.skipped,
            failed: tally.failed,
        }
    }
}

/// Pad `img` to a square canvas of `fill`, original centered.
pub fn square_pad(img: &DynamicImage, fill: [u8; 3]) -> RgbImage {
    let (width, height) = img.dimensions();
    let size = width.max(height);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb(fill));
    let x = (size - width) / 2;
    let y = (size - height) / 2;
    imageops::overlay(&mut canvas, &img.to_rgb8(), x as i64, y as i64);
    canvas
}

/// Square-pad, resize and mirror images in place.
pub struct Normalizer {
    dimension: u32,
    fill: [u8; 3],
}

impl Normalizer {
    pub fn new(dimension: u32, fill: [u8; 3]) -> Self {
        Self { dimension, fill }
    }

    /// Make one image a `dimension`² JPEG. Images already at that size are
    /// left untouched and reported as skipped.
    pub fn square_and_resize(&self, item: &ImageRef) -> Result<Option<PathBuf>, ItemError> {
        let img = codec::open(&item.path)?;
        if img.dimensions() == (self.dimension, self.dimension) {
            return Ok(None);
        }

        let padded = square_pad(&flatten_alpha(img), self.fill);
        let resized = imageops::resize(&padded, self.dimension, self.dimension, FilterType::Lanczos3);
        codec::write_jpeg(&resized, &item.path)?;
        Ok(Some(item.path.clone()))
    }

    /// Write a horizontally flipped copy next to a source image.
    ///
    /// Mirrors are never mirrored again, and an existing derivative is kept.
    pub fn mirror(&self, item: &ImageRef) -> Result<Option<PathBuf>, ItemError> {
        if item.is_mirror() {
            return Ok(None);
        }
        let target = item.mirror_path();
        if target.exists() {
            return Ok(None);
        }

        let img = flatten_alpha(codec::open(&item.path)?);
        let flipped = imageops::flip_horizontal(&img.to_rgb8());
        codec::write_jpeg(&flipped, &target)?;
        Ok(Some(target))
    }

    pub fn resize_all(
        &self,
        items: &[ImageRef],
        cancel: &CancelToken,
    ) -> Result<TransformReport, StageError> {
        let out = run_items("Resizing images", items, cancel, |item| self.square_and_resize(item));
        log::info!(
            "Resized {} images ({} already sized, {} failed)",
            out.tally.done,
            out.tally.skipped,
            out.tally.failed
        );
        if out.tally.cancelled {
            return Err(StageError::Interrupted);
        }
        Ok(TransformReport::from_batch(out.results, out.tally))
    }

    pub fn mirror_all(
        &self,
        items: &[ImageRef],
        cancel: &CancelToken,
    ) -> Result<TransformReport, StageError> {
        let out = run_items("Mirroring images", items, cancel, |item| self.mirror(item));
        log::info!(
            "Mirrored {} images ({} skipped, {} failed)",
            out.tally.done,
            out.tally.skipped,
            out.tally.failed
        );
        if out.tally.cancelled {
            return Err(StageError::Interrupted);
        }
        Ok(TransformReport::from_batch(out.results, out.tally))
    }
}
