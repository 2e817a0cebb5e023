//! Stage sequencing for one dataset run.
//!
//! Stages run in a fixed order, each gated by its feature flag, and each
//! re-reads the working directory from disk. A `StageError` is logged as a
//! major error and the run moves on with whatever is on disk; an interrupt
//! ends the run immediately.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::core::dedup::{DedupReport, Deduplicator};
use crate::core::download::{Downloader, Fetcher};
use crate::core::harvest::{Harvester, SearchPage};
use crate::core::normalize::{Normalizer, TransformReport};
use crate::core::partition::{MoveReport, Partitioner, Renamer};
use crate::core::review::{ReviewTool, ToolOutcome};
use crate::error::{Interrupted, StageError};
use crate::workdir::{Bucket, WorkingDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Harvest,
    Download,
    Dedup,
    Clean,
    Resize,
    Mirror,
    Move,
    Rename,
    Label,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Harvest => "harvest",
            Stage::Download => "download",
            Stage::Dedup => "dedup",
            Stage::Clean => "clean",
            Stage::Resize => "resize",
            Stage::Mirror => "mirror",
            Stage::Move => "move",
            Stage::Rename => "rename",
            Stage::Label => "label",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Skipped,
    Aborted(String),
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub workdir: PathBuf,
    pub stages: Vec<(Stage, StageStatus)>,
    pub urls_harvested: usize,
    pub downloaded: usize,
    /// The working directory held no images after downloading
    pub nothing_to_process: bool,
    pub dedup: Option<DedupReport>,
    pub clean: Option<ToolOutcome>,
    pub resize: Option<TransformReport>,
    pub mirror: Option<TransformReport>,
    pub partition: Option<MoveReport>,
    pub renamed: usize,
    pub labeled: Vec<ToolOutcome>,
}

impl PipelineReport {
    pub fn status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages
            .iter()
            .rev()
            .find(|(s, _)| *s == stage)
            .map(|(_, status)| status)
    }

    pub fn aborted_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|(_, status)| matches!(status, StageStatus::Aborted(_)))
            .map(|(stage, _)| *stage)
            .collect()
    }

    fn skip(&mut self, stage: Stage) {
        self.stages.push((stage, StageStatus::Skipped));
    }

    /// Record a stage result. Stage failures are logged and swallowed;
    /// an interrupt is passed up.
    fn settle<T>(&mut self, stage: Stage, result: Result<T, StageError>) -> Result<Option<T>, Interrupted> {
        match result {
            Ok(value) => {
                self.stages.push((stage, StageStatus::Completed));
                Ok(Some(value))
            }
            Err(StageError::Interrupted) => {
                log::warn!("Run interrupted during {stage} stage");
                Err(Interrupted)
            }
            Err(e) => {
                log::error!("[MAJOR] {stage} stage aborted: {e}");
                self.stages.push((stage, StageStatus::Aborted(e.to_string())));
                Ok(None)
            }
        }
    }
}

/// Called after the clean stage so a person can inspect the working directory.
pub type ReviewGate<'a> = Box<dyn Fn(&Path) + 'a>;

pub struct Pipeline<'a> {
    config: &'a Config,
    cancel: CancelToken,
    page: Option<&'a mut dyn SearchPage>,
    fetcher: Option<&'a dyn Fetcher>,
    review_gate: Option<ReviewGate<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, cancel: CancelToken) -> Self {
        Self {
            config,
            cancel,
            page: None,
            fetcher: None,
            review_gate: None,
        }
    }

    pub fn with_search(mut self, page: &'a mut dyn SearchPage, fetcher: &'a dyn Fetcher) -> Self {
        self.page = Some(page);
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_review_gate(mut self, gate: ReviewGate<'a>) -> Self {
        self.review_gate = Some(gate);
        self
    }

    fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Run every enabled stage for `keywords`. The first keyword names the
    /// working directory and the rename label.
    pub fn run(&mut self, keywords: &[String]) -> Result<PipelineReport, Interrupted> {
        let mut report = PipelineReport::default();
        let Some(label) = keywords.first() else {
            log::warn!("No search terms given; nothing to do");
            report.nothing_to_process = true;
            return Ok(report);
        };
        let config = self.config;
        let features = config.features;
        let workdir = WorkingDirectory::new(config.working_dir(label));
        report.workdir = workdir.root().to_path_buf();
        log::info!("Working directory: {}", workdir.root().display());

        if features.download {
            self.download(keywords, &workdir, &mut report)?;
        } else {
            report.skip(Stage::Harvest);
            report.skip(Stage::Download);
        }

        self.checkpoint()?;
        if !workdir.has_images() {
            log::warn!("No images to process in {}", workdir.root().display());
            report.nothing_to_process = true;
            return Ok(report);
        }

        if features.dedup {
            let result = workdir
                .images()
                .and_then(|items| Deduplicator::new().run(&items, &self.cancel));
            report.dedup = report.settle(Stage::Dedup, result)?;
        } else {
            report.skip(Stage::Dedup);
        }

        self.checkpoint()?;
        if features.clean {
            let cleaner = ReviewTool::new("cleaner", config.cleaner.clone());
            report.clean = report.settle(Stage::Clean, cleaner.run(workdir.root()))?;
            if let Some(gate) = &self.review_gate {
                gate(workdir.root());
            }
        } else {
            report.skip(Stage::Clean);
        }

        let normalizer = Normalizer::new(config.image_dimension, config.fill_color);

        self.checkpoint()?;
        if features.resize {
            let result = workdir
                .images()
                .and_then(|items| normalizer.resize_all(&items, &self.cancel));
            report.resize = report.settle(Stage::Resize, result)?;
        } else {
            report.skip(Stage::Resize);
        }

        self.checkpoint()?;
        if features.mirror {
            let result = workdir
                .images()
                .and_then(|items| normalizer.mirror_all(&items, &self.cancel));
            report.mirror = report.settle(Stage::Mirror, result)?;
        } else {
            report.skip(Stage::Mirror);
        }

        self.checkpoint()?;
        if features.partition {
            let mut partitioner = Partitioner::new(config.split_ratios, config.seed);
            let result = partitioner.partition(&workdir, &self.cancel);
            report.partition = report.settle(Stage::Move, result)?;
        } else {
            report.skip(Stage::Move);
        }

        let output_dirs = output_dirs(&workdir, features.partition);

        self.checkpoint()?;
        if features.rename {
            let renamer = Renamer::new(label.as_str());
            for dir in &output_dirs {
                if let Some(r) = report.settle(Stage::Rename, renamer.rename_dir(dir, &self.cancel))? {
                    report.renamed += r.renamed;
                }
            }
        } else {
            report.skip(Stage::Rename);
        }

        self.checkpoint()?;
        if features.label {
            let labeler = ReviewTool::new("labeler", config.labeler.clone());
            for dir in &output_dirs {
                if let Some(outcome) = report.settle(Stage::Label, labeler.run(dir))? {
                    report.labeled.push(outcome);
                }
            }
        } else {
            report.skip(Stage::Label);
        }

        Ok(report)
    }

    fn download(
        &mut self,
        keywords: &[String],
        workdir: &WorkingDirectory,
        report: &mut PipelineReport,
    ) -> Result<(), Interrupted> {
        let (Some(page), Some(fetcher)) = (self.page.as_deref_mut(), self.fetcher) else {
            log::warn!("No search source configured; skipping download");
            report.skip(Stage::Harvest);
            report.skip(Stage::Download);
            return Ok(());
        };
        if report.settle(Stage::Download, workdir.ensure_exists())?.is_none() {
            return Ok(());
        }

        let harvester = Harvester::new(self.config.target_image_count);
        let downloader = Downloader::new(fetcher);
        for keyword in keywords {
            if self.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            log::info!("Harvesting {keyword:?}");
            let Some(harvest) = report.settle(Stage::Harvest, harvester.harvest(keyword, page, &self.cancel))? else {
                continue;
            };
            report.urls_harvested += harvest.urls.len();

            let mut urls: Vec<String> = harvest.urls.into_iter().collect();
            urls.sort();
            let result = downloader.download_all(&urls, workdir.root(), &self.cancel);
            if let Some(d) = report.settle(Stage::Download, result)? {
                report.downloaded += d.saved.len();
            }
        }
        Ok(())
    }
}

/// Directories holding the final images: the non-empty buckets after a
/// partition, or the working directory itself.
fn output_dirs(workdir: &WorkingDirectory, partitioned: bool) -> Vec<PathBuf> {
    if !partitioned {
        return vec![workdir.root().to_path_buf()];
    }
    Bucket::ALLOCATION_ORDER
        .iter()
        .map(|&b| workdir.bucket_dir(b))
        .filter(|d| d.is_dir())
        .collect()
}
