use std::collections::HashMap;
use std::path::PathBuf;

use crate::batch::run_items;
use crate::cancel::CancelToken;
use crate::core::fingerprint::{Fingerprint, FingerprintEngine};
use crate::error::{ItemError, StageError};
use crate::history::{self, DedupRecord};
use crate::workdir::ImageRef;

/// Images sharing one fingerprint, in discovery order.
#[derive(Debug, Clone)]
pub struct FingerprintGroup {
    pub fingerprint: Fingerprint,
    pub members: Vec<ImageRef>,
}

impl FingerprintGroup {
    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }
}

/// Group items by fingerprint. Groups appear in the order their first member
/// was seen and members keep input order.
pub fn group_by_fingerprint(
    items: impl IntoIterator<Item = (ImageRef, Fingerprint)>,
) -> Vec<FingerprintGroup> {
    let mut index: HashMap<Fingerprint, usize> = HashMap::new();
    let mut groups: Vec<FingerprintGroup> = Vec::new();

    for (item, fingerprint) in items {
        match index.get(&fingerprint) {
            Some(&i) => groups[i].members.push(item),
            None => {
                index.insert(fingerprint.clone(), groups.len());
                groups.push(FingerprintGroup {
                    fingerprint,
                    members: vec![item],
                });
            }
        }
    }
    groups
}

#[derive(Debug, Default)]
pub struct DedupReport {
    pub retained: Vec<ImageRef>,
    pub removed: Vec<ImageRef>,
    /// Items that could not be hashed or deleted
    pub errors: usize,
    /// Groups with more than one member
    pub duplicate_groups: usize,
}

impl DedupReport {
    pub fn found_duplicates(&self) -> bool {
        self.duplicate_groups > 0
    }
}

/// Keeps the first image of every fingerprint group and deletes the rest.
pub struct Deduplicator {
    engine: FingerprintEngine,
    dry_run: bool,
    record_history: bool,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            engine: FingerprintEngine::new(),
            dry_run: false,
            record_history: true,
        }
    }

    /// Report what would be removed without touching any file.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn record_history(mut self, record: bool) -> Self {
        self.record_history = record;
        self
    }

    pub fn run(&self, items: &[ImageRef], cancel: &CancelToken) -> Result<DedupReport, StageError> {
        let hashed = run_items("Computing hashes", items, cancel, |item| {
            self.engine.fingerprint_file(&item.path).map(Some)
        });
        if hashed.tally.cancelled {
            return Err(StageError::Interrupted);
        }

        let groups = group_by_fingerprint(
            items
                .iter()
                .cloned()
                .zip(hashed.results)
                .filter_map(|(item, fp)| fp.map(|fp| (item, fp))),
        );

        let mut report = DedupReport {
            errors: hashed.tally.failed,
            ..Default::default()
        };

        let mut doomed: Vec<(usize, ImageRef)> = Vec::new();
        for (group_idx, group) in groups.iter().enumerate() {
            let mut members = group.members.iter();
            if let Some(first) = members.next() {
                report.retained.push(first.clone());
            }
            if group.is_duplicate() {
                report.duplicate_groups += 1;
                doomed.extend(members.map(|m| (group_idx, m.clone())));
            }
        }

        if self.dry_run {
            report.removed = doomed.into_iter().map(|(_, item)| item).collect();
            return Ok(report);
        }

        let deleted = run_items("Deleting duplicates", &doomed, cancel, |(_, item)| {
            std::fs::remove_file(&item.path)
                .map(Some)
                .map_err(|e| ItemError::io(&item.path, e))
        });
        report.errors += deleted.tally.failed;

        let mut culled_by_group: HashMap<usize, Vec<PathBuf>> = HashMap::new();
        for ((group_idx, item), outcome) in doomed.into_iter().zip(deleted.results) {
            if outcome.is_some() {
                log::info!("Deleted duplicate {}", item);
                culled_by_group
                    .entry(group_idx)
                    .or_default()
                    .push(item.path.clone());
                report.removed.push(item);
            }
        }

        if self.record_history {
            self.write_history(&groups, &culled_by_group);
        }

        if deleted.tally.cancelled {
            return Err(StageError::Interrupted);
        }
        Ok(report)
    }

    fn write_history(&self, groups: &[FingerprintGroup], culled: &HashMap<usize, Vec<PathBuf>>) {
        let mut indices: Vec<usize> = culled.keys().copied().collect();
        indices.sort_unstable();

        for i in indices {
            let group = &groups[i];
            let Some(first) = group.members.first() else {
                continue;
            };
            let Some(dir) = first.path.parent() else {
                continue;
            };
            let record = DedupRecord::deleted(group.fingerprint.to_string(), &first.path, &culled[&i]);
            if let Err(e) = history::append(dir, &[record]) {
                log::warn!("Could not record duplicate history: {e:#}");
            }
        }
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// 8x8 grid of flat gray cells at pseudo-random levels.
    fn texture(seed: u32) -> RgbImage {
        ImageBuffer::from_fn(128, 128, |x, y| {
            let c = x / 16 + (y / 16) * 8;
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

    fn save(dir: &Path, name: &str, img: &RgbImage) -> ImageRef {
        let path = dir.join(name);
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();
        ImageRef::new(path)
    }

    #[test]
    fn test_group_preserves_discovery_order() {
        let fp = |b: u8| Fingerprint(vec![b]);
        let groups = group_by_fingerprint(vec![
            (ImageRef::new("c.jpg"), fp(2)),
            (ImageRef::new("a.jpg"), fp(1)),
            (ImageRef::new("b.jpg"), fp(2)),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].fingerprint, fp(2));
        assert_eq!(
            groups[0].members,
            vec![ImageRef::new("c.jpg"), ImageRef::new("b.jpg")]
        );
        assert!(groups[0].is_duplicate());
        assert!(!groups[1].is_duplicate());
    }

    #[test]
    fn test_three_copies_among_five() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let items = vec![
            save(dir, "1.jpg", &texture(5)),
            save(dir, "2.jpg", &texture(21)),
            save(dir, "3.jpg", &texture(5)),
            save(dir, "4.jpg", &texture(26)),
            save(dir, "5.jpg", &texture(5)),
        ];

        let report = Deduplicator::new()
            .run(&items, &CancelToken::new())
            .unwrap();

        assert_eq!(report.retained.len(), 3);
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.errors, 0);
        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.retained[0], items[0]);
        assert!(items[0].path.exists());
        assert!(items[1].path.exists());
        assert!(!items[2].path.exists());
        assert!(items[3].path.exists());
        assert!(!items[4].path.exists());

        let history = history::read(dir).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].culled.len(), 2);
    }

    #[test]
    fn test_counts_cover_every_item() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let broken = dir.join("0.jpg");
        fs::write(&broken, b"garbage").unwrap();
        let items = vec![
            ImageRef::new(broken),
            save(dir, "1.jpg", &texture(21)),
            save(dir, "2.jpg", &texture(21)),
            save(dir, "3.jpg", &texture(26)),
        ];

        let report = Deduplicator::new()
            .run(&items, &CancelToken::new())
            .unwrap();

        assert_eq!(report.errors, 1);
        assert_eq!(
            report.retained.len() + report.removed.len() + report.errors,
            items.len()
        );
        assert!(items[0].path.exists());
    }

    #[test]
    fn test_no_duplicates_is_distinct_success() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let items = vec![
            save(dir, "1.jpg", &texture(5)),
            save(dir, "2.jpg", &texture(21)),
        ];

        let report = Deduplicator::new()
            .run(&items, &CancelToken::new())
            .unwrap();

        assert!(!report.found_duplicates());
        assert_eq!(report.retained.len(), 2);
        assert!(report.removed.is_empty());
        assert!(!history::history_path(dir).exists());
    }

    #[test]
    fn test_dry_run_keeps_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let items = vec![
            save(dir, "1.jpg", &texture(26)),
            save(dir, "2.jpg", &texture(26)),
        ];

        let report = Deduplicator::new()
            .dry_run(true)
            .run(&items, &CancelToken::new())
            .unwrap();

        assert_eq!(report.removed, vec![items[1].clone()]);
        assert!(items[1].path.exists());
        assert!(!history::history_path(dir).exists());
    }

    #[test]
    fn test_interrupt_is_propagated() {
        let temp_dir = TempDir::new().unwrap();
        let items = vec![save(temp_dir.path(), "1.jpg", &texture(26))];
        let token = CancelToken::new();
        token.cancel();

        let result = Deduplicator::new().run(&items, &token);
        assert!(matches!(result, Err(StageError::Interrupted)));
        assert!(items[0].path.exists());
    }
}
