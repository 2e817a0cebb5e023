use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::StageError;

/// Filename marker of mirror derivatives, kept for on-disk compatibility.
pub const MIRROR_SUFFIX: &str = "-dbflp";

const IMAGE_EXTS: [&str; 2] = ["jpg", "jpeg"];

/// How an image came to exist in the working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Downloaded (or otherwise supplied) image
    Source,
    /// Horizontally flipped copy of a source image
    Mirror,
}

/// One image file in a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: PathBuf,
    pub origin: Origin,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let origin = if Self::stem_of(&path).ends_with(MIRROR_SUFFIX) {
            Origin::Mirror
        } else {
            Origin::Source
        };
        Self { path, origin }
    }

    fn stem_of(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_mirror(&self) -> bool {
        self.origin == Origin::Mirror
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Path of the mirror derivative of this image, next to it.
    pub fn mirror_path(&self) -> PathBuf {
        let name = format!("{}{}.jpg", Self::stem_of(&self.path), MIRROR_SUFFIX);
        self.path.with_file_name(name)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Partition destinations. `ALLOCATION_ORDER` is the fixed fill order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Train,
    Valid,
    Test,
}

impl Bucket {
    pub const ALLOCATION_ORDER: [Bucket; 3] = [Bucket::Valid, Bucket::Test, Bucket::Train];

    pub fn dir_name(self) -> &'static str {
        match self {
            Bucket::Train => "train",
            Bucket::Valid => "valid",
            Bucket::Test => "test",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Root directory holding every image of one query.
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    root: PathBuf,
}

impl WorkingDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_exists(&self) -> Result<(), StageError> {
        std::fs::create_dir_all(&self.root).map_err(|e| StageError::io(&self.root, e))
    }

    pub fn bucket_dir(&self, bucket: Bucket) -> PathBuf {
        self.root.join(bucket.dir_name())
    }

    /// Images directly under the root, sorted by file name.
    pub fn images(&self) -> Result<Vec<ImageRef>, StageError> {
        list_images(&self.root)
    }

    pub fn has_images(&self) -> bool {
        self.images().map(|v| !v.is_empty()).unwrap_or(false)
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Non-recursive listing of the JPEG files in `dir`, sorted by file name so
/// discovery order is stable between runs.
pub fn list_images(dir: &Path) -> Result<Vec<ImageRef>, StageError> {
    if !dir.is_dir() {
        return Err(StageError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let mut images: Vec<ImageRef> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_image_path(e.path()))
        .map(|e| ImageRef::new(e.into_path()))
        .collect();
    images.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(images)
}
