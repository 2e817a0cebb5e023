//! Train/valid/test split.
//!
//! Bucket sizes come from integer arithmetic: `valid = n * valid% / 100` and
//! `test = n * test% / 100` (both floored), train takes whatever is left, so
//! the three always sum to `n`. Items are drawn uniformly without replacement,
//! valid first, then test; the remainder goes to train.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::run_items;
use crate::cancel::CancelToken;
use crate::config::SplitRatios;
use crate::error::{ItemError, StageError};
use crate::workdir::{Bucket, ImageRef, WorkingDirectory, list_images};

/// Target size of each bucket for a given item count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub train: usize,
    pub valid: usize,
    pub test: usize,
}

impl PartitionPlan {
    pub fn new(total: usize, ratios: SplitRatios) -> Self {
        let valid = total * ratios.valid as usize / 100;
        let test = total * ratios.test as usize / 100;
        Self {
            train: total - valid - test,
            valid,
            test,
        }
    }

    pub fn count(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Train => self.train,
            Bucket::Valid => self.valid,
            Bucket::Test => self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train + self.valid + self.test
    }
}

/// Items assigned to buckets; every input item appears exactly once.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub train: Vec<ImageRef>,
    pub valid: Vec<ImageRef>,
    pub test: Vec<ImageRef>,
}

impl Allocation {
    pub fn bucket(&self, bucket: Bucket) -> &[ImageRef] {
        match bucket {
            Bucket::Train => &self.train,
            Bucket::Valid => &self.valid,
            Bucket::Test => &self.test,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Vec<ImageRef> {
        match bucket {
            Bucket::Train => &mut self.train,
            Bucket::Valid => &mut self.valid,
            Bucket::Test => &mut self.test,
        }
    }

    /// (item, destination bucket) pairs in allocation order.
    pub fn moves(&self) -> Vec<(ImageRef, Bucket)> {
        Bucket::ALLOCATION_ORDER
            .iter()
            .flat_map(|&b| self.bucket(b).iter().cloned().map(move |i| (i, b)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MoveReport {
    pub plan: Option<PartitionPlan>,
    pub moved: HashMap<Bucket, usize>,
    pub failed: usize,
}

impl MoveReport {
    pub fn moved_to(&self, bucket: Bucket) -> usize {
        self.moved.get(&bucket).copied().unwrap_or(0)
    }
}

pub struct Partitioner {
    ratios: SplitRatios,
    rng: StdRng,
}

impl Partitioner {
    /// A `seed` makes the draw reproducible; without one it is seeded from the OS.
    pub fn new(ratios: SplitRatios, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { ratios, rng }
    }

    pub fn allocate(&mut self, items: Vec<ImageRef>) -> (PartitionPlan, Allocation) {
        let plan = PartitionPlan::new(items.len(), self.ratios);
        let mut pool = items;
        let mut allocation = Allocation::default();

        for bucket in [Bucket::Valid, Bucket::Test] {
            for _ in 0..plan.count(bucket) {
                let pick = self.rng.gen_range(0..pool.len());
                allocation.bucket_mut(bucket).push(pool.swap_remove(pick));
            }
        }
        allocation.train = pool;
        (plan, allocation)
    }

    /// Allocate the images at the root of `workdir` and move them into
    /// `train/`, `valid/` and `test/`.
    pub fn partition(
        &mut self,
        workdir: &WorkingDirectory,
        cancel: &CancelToken,
    ) -> Result<MoveReport, StageError> {
        for bucket in Bucket::ALLOCATION_ORDER {
            let dir = workdir.bucket_dir(bucket);
            fs::create_dir_all(&dir).map_err(|e| StageError::io(&dir, e))?;
        }

        let items = workdir.images()?;
        let (plan, allocation) = self.allocate(items);
        log::info!(
            "Partition plan: train={} valid={} test={}",
            plan.train,
            plan.valid,
            plan.test
        );

        let moves = allocation.moves();
        let out = run_items("Moving images", &moves, cancel, |(item, bucket)| {
            move_into(item, &workdir.bucket_dir(*bucket)).map(|_| Some(*bucket))
        });

        let mut report = MoveReport {
            plan: Some(plan),
            failed: out.tally.failed,
            ..Default::default()
        };
        for bucket in out.results.into_iter().flatten() {
            *report.moved.entry(bucket).or_default() += 1;
        }

        if out.tally.cancelled {
            return Err(StageError::Interrupted);
        }
        Ok(report)
    }
}

/// Move a file into `dir`, refusing to overwrite.
fn move_into(item: &ImageRef, dir: &Path) -> Result<PathBuf, ItemError> {
    let dest = dir.join(item.file_name());
    if dest.exists() {
        return Err(ItemError::AlreadyExists { path: dest });
    }
    fs::rename(&item.path, &dest).map_err(|e| ItemError::io(&item.path, e))?;
    Ok(dest)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RenameReport {
    pub renamed: usize,
    pub failed: usize,
}

/// Sequential `{label}_({n}).jpg` naming within one directory.
pub struct Renamer {
    label: String,
}

impl Renamer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn final_name(&self, index: usize) -> String {
        format!("{}_({}).jpg", self.label, index)
    }

    /// Renumber every image in `dir` from 1.
    ///
    /// Files are first moved to unique timestamped names so that the final
    /// numbering can never collide with a name already present.
    pub fn rename_dir(&self, dir: &Path, cancel: &CancelToken) -> Result<RenameReport, StageError> {
        let items = list_images(dir)?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S%f").to_string();
        let mut report = RenameReport::default();

        let mut staged = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            cancel.check()?;
            let temp = dir.join(format!("__{stamp}_{i}.jpg"));
            match fs::rename(&item.path, &temp) {
                Ok(()) => staged.push(temp),
                Err(e) => {
                    log::error!("[Renaming] {}", ItemError::io(&item.path, e));
                    report.failed += 1;
                }
            }
        }

        for (i, temp) in staged.iter().enumerate() {
            cancel.check()?;
            let dest = dir.join(self.final_name(i + 1));
            // anything else holding the name stays; the image keeps its temporary name
            if fs::symlink_metadata(&dest).is_ok() {
                log::error!("[Renaming] {}", ItemError::AlreadyExists { path: dest });
                report.failed += 1;
                continue;
            }
            match fs::rename(temp, &dest) {
                Ok(()) => report.renamed += 1,
                Err(e) => {
                    log::error!("[Renaming] {}", ItemError::io(temp, e));
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "Renamed {} images in {} ({} failed)",
            report.renamed,
            dir.display(),
            report.failed
        );
        Ok(report)
    }
}
