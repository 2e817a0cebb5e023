use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::run_items;
use crate::cancel::CancelToken;
use crate::core::codec;
use crate::core::fingerprint::flatten_alpha;
use crate::error::{ItemError, StageError};

/// Retrieves the raw bytes behind a URL.
pub trait Fetcher: Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ItemError>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, StageError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(StageError::Client)?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ItemError> {
        let fetch_err = |source| ItemError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?;
        let bytes = response.bytes().map_err(fetch_err)?;
        Ok(bytes.to_vec())
    }
}

/// File name derived from the downloaded content, so the same bytes fetched
/// from two URLs land on one file.
pub fn content_file_name(bytes: &[u8]) -> String {
    let hex = blake3::hash(bytes).to_hex();
    format!("{}.jpg", &hex.as_str()[..10])
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    pub failed: usize,
}

pub struct Downloader<'a> {
    fetcher: &'a dyn Fetcher,
}

impl<'a> Downloader<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self { fetcher }
    }

    /// Fetch, decode and store one URL as an RGB JPEG in `dir`.
    pub fn save(&self, url: &str, dir: &Path) -> Result<PathBuf, ItemError> {
        let bytes = self.fetcher.fetch(url)?;
        let img = flatten_alpha(codec::decode_bytes(&bytes, url)?);
        let path = dir.join(content_file_name(&bytes));
        codec::write_jpeg(&img.to_rgb8(), &path)?;
        Ok(path)
    }

    pub fn download_all(
        &self,
        urls: &[String],
        dir: &Path,
        cancel: &CancelToken,
    ) -> Result<DownloadReport, StageError> {
        std::fs::create_dir_all(dir).map_err(|e| StageError::io(dir, e))?;

        let out = run_items("Downloading images", urls, cancel, |url| {
            self.save(url, dir).map(Some)
        });
        log::info!(
            "Images downloaded: {} ({} failed)",
            out.tally.done,
            out.tally.failed
        );
        if out.tally.cancelled {
            return Err(StageError::Interrupted);
        }

        let mut saved: Vec<PathBuf> = out.results.into_iter().flatten().collect();
        saved.sort();
        saved.dedup();
        Ok(DownloadReport {
            saved,
            failed: out.tally.failed,
        })
    }
}
