//! Image URL harvesting from an infinite-scroll search results page.
//!
//! The page itself (browser, DOM, selectors) sits behind [`SearchPage`]. The
//! harvester only paginates until enough thumbnails are loaded and then walks
//! them in order, collecting full-size URLs until it has `target` unique ones.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::batch::{progress_bar, spinner};
use crate::cancel::CancelToken;
use crate::error::StageError;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Search page could not be loaded for {query:?}: {message}")]
    Load { query: String, message: String },

    #[error("Page interaction failed: {0}")]
    Interaction(String),

    #[error("No thumbnail at index {0}")]
    NoSuchThumbnail(usize),

    #[error("Could not read recorded results {path:?}: {message}")]
    Recording { path: String, message: String },
}

/// Capability over one search results page. Calls mutate page state
/// (scroll position, opened previews) so they are made one at a time.
pub trait SearchPage {
    fn load_search(&mut self, query: &str) -> Result<(), PageError>;

    fn count_thumbnails(&mut self) -> Result<usize, PageError>;

    /// Scroll or press "more results"; `false` once the source is exhausted.
    fn expand_more(&mut self) -> Result<bool, PageError>;

    /// Full-size URLs revealed by opening thumbnail `index`.
    fn extract_full_image_urls(&mut self, index: usize) -> Result<Vec<String>, PageError>;
}

/// Inline images are never worth downloading.
pub fn is_data_url(url: &str) -> bool {
    url.get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:image"))
}

#[derive(Debug, Default)]
pub struct HarvestReport {
    pub urls: HashSet<String>,
    /// Thumbnails whose extraction failed
    pub failures: usize,
    /// The source ran out before `target` thumbnails were loaded
    pub exhausted: bool,
    pub thumbnails_seen: usize,
}

pub struct Harvester {
    target: usize,
}

impl Harvester {
    pub fn new(target: usize) -> Self {
        Self { target }
    }

    /// Collect up to `target` unique full-size image URLs for `query`.
    ///
    /// Exhaustion is not an error: the available thumbnail count becomes the
    /// target. Failures while loading or paginating end the session with a
    /// `StageError`; failures on individual thumbnails are counted.
    pub fn harvest(
        &self,
        query: &str,
        page: &mut dyn SearchPage,
        cancel: &CancelToken,
    ) -> Result<HarvestReport, StageError> {
        let mut report = HarvestReport::default();
        page.load_search(query)?;

        let spin = spinner("Loading thumbnails…");
        let mut available = page.count_thumbnails()?;
        log::info!("Thumbnails found: {available}");

        while available < self.target {
            cancel.check()?;
            if !page.expand_more()? {
                report.exhausted = true;
                log::info!("Results exhausted at {available} thumbnails");
                break;
            }
            available = page.count_thumbnails()?;
            spin.set_message(format!("Loading thumbnails… {available}"));
            log::info!("Thumbnails found: {available}");
        }
        spin.finish_and_clear();

        let effective_target = self.target.min(available);
        let bar = progress_bar(effective_target, "Extracting image links");

        for index in 0..available {
            if report.urls.len() >= effective_target {
                break;
            }
            cancel.check()?;
            report.thumbnails_seen += 1;

            match page.extract_full_image_urls(index) {
                Ok(urls) => {
                    for url in urls.into_iter().filter(|u| !u.is_empty() && !is_data_url(u)) {
                        report.urls.insert(url);
                    }
                    bar.set_position(report.urls.len().min(effective_target) as u64);
                }
                Err(e) => {
                    log::error!("[Harvest] thumbnail {index}: {e}");
                    report.failures += 1;
                    bar.set_message(format!("{} failed", report.failures));
                }
            }
        }
        bar.finish();

        log::info!(
            "Image links extracted for {query:?}: {} ({} failed)",
            report.urls.len(),
            report.failures
        );
        Ok(report)
    }
}

/// Captured search results: query → result batches → thumbnails → URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recording {
    pub queries: HashMap<String, Vec<Vec<Vec<String>>>>,
}

/// A [`SearchPage`] that replays captured results instead of driving a browser.
/// Each `expand_more` reveals the next recorded batch.
#[derive(Debug, Clone, Default)]
pub struct RecordedSearch {
    recording: Recording,
    batches: Vec<Vec<Vec<String>>>,
    revealed: usize,
}

impl RecordedSearch {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, PageError> {
        let recording_err = |message: String| PageError::Recording {
            path: path.display().to_string(),
            message,
        };
        let file = std::fs::File::open(path).map_err(|e| recording_err(e.to_string()))?;
        let recording: Recording =
            serde_json::from_reader(file).map_err(|e| recording_err(e.to_string()))?;
        Ok(Self::new(recording))
    }

    fn visible(&self) -> impl Iterator<Item = &Vec<String>> {
        self.batches.iter().take(self.revealed).flatten()
    }
}

impl SearchPage for RecordedSearch {
    fn load_search(&mut self, query: &str) -> Result<(), PageError> {
        let batches = self
            .recording
            .queries
            .get(query)
            .cloned()
            .ok_or_else(|| PageError::Load {
                query: query.to_string(),
                message: "no recorded results".to_string(),
            })?;
        self.batches = batches;
        self.revealed = self.batches.len().min(1);
        Ok(())
    }

    fn count_thumbnails(&mut self) -> Result<usize, PageError> {
        Ok(self.visible().count())
    }

    fn expand_more(&mut self) -> Result<bool, PageError> {
        if self.revealed < self.batches.len() {
            self.revealed += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn extract_full_image_urls(&mut self, index: usize) -> Result<Vec<String>, PageError> {
        self.visible()
            .nth(index)
            .cloned()
            .ok_or(PageError::NoSuchThumbnail(index))
    }
}
