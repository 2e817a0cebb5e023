//! Per-item parallel execution shared by the stages.
//!
//! Every item runs independently on the rayon pool. A failing item is logged
//! and counted; it never stops its siblings. Once the cancel token is set the
//! remaining items are skipped without being started.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::ItemError;

/// Counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Output of a batch. `results[i]` is `Some` only when item `i` completed.
#[derive(Debug)]
pub struct BatchOutput<R> {
    pub results: Vec<Option<R>>,
    pub tally: Tally,
}

pub fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("##-"));
    }
    bar.set_prefix(label.to_string());
    bar
}

pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Run `f` over `items` in parallel.
///
/// `f` returns `Ok(Some(r))` when the item was processed, `Ok(None)` when it
/// was deliberately skipped and `Err` on failure. Input order is preserved in
/// `results`.
pub fn run_items<T, R, F>(label: &str, items: &[T], cancel: &CancelToken, f: F) -> BatchOutput<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<Option<R>, ItemError> + Sync,
{
    let bar = progress_bar(items.len(), label);
    let done = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let results: Vec<Option<R>> = items
        .par_iter()
        .map(|item| {
            if cancel.is_cancelled() {
                return None;
            }
            let outcome = match f(item) {
                Ok(Some(r)) => {
                    done.fetch_add(1, Ordering::Relaxed);
                    Some(r)
                }
                Ok(None) => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Err(e) => {
                    log::error!("[{label}] {e}");
                    let n = failed.fetch_add(1, Ordering::Relaxed) + 1;
                    bar.set_message(format!("{n} failed"));
                    None
                }
            };
            bar.inc(1);
            outcome
        })
        .collect();

    let tally = Tally {
        done: done.into_inner(),
        skipped: skipped.into_inner(),
        failed: failed.into_inner(),
        cancelled: cancel.is_cancelled(),
    };

    if tally.cancelled {
        bar.abandon_with_message(format!("interrupted, {} failed", tally.failed));
    } else if tally.failed > 0 {
        bar.finish_with_message(format!("{} failed", tally.failed));
    } else {
        bar.finish();
    }

    BatchOutput { results, tally }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fail(n: u32) -> ItemError {
        ItemError::AlreadyExists {
            path: PathBuf::from(n.to_string()),
        }
    }

    #[test]
    fn test_failures_are_isolated() {
        let items: Vec<u32> = (0..20).collect();
        let out = run_items("test", &items, &CancelToken::new(), |n| match n % 4 {
            0 => Err(fail(*n)),
            1 => Ok(None),
            _ => Ok(Some(n * 10)),
        });

        assert_eq!(out.tally.failed, 5);
        assert_eq!(out.tally.skipped, 5);
        assert_eq!(out.tally.done, 10);
        assert!(!out.tally.cancelled);
        assert_eq!(out.results.len(), 20);
        assert_eq!(out.results[2], Some(20));
        assert_eq!(out.results[0], None);
    }

    #[test]
    fn test_cancelled_batch_skips_all_work() {
        let token = CancelToken::new();
        token.cancel();

        let items: Vec<u32> = (0..8).collect();
        let out = run_items("test", &items, &token, |n| Ok(Some(*n)));

        assert!(out.tally.cancelled);
        assert_eq!(out.tally.done, 0);
        assert!(out.results.iter().all(Option::is_none));
    }
}
