use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use dialoguer::Input;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use datasetrs::config::SETTINGS_FILE;
use datasetrs::core::dedup::Deduplicator;
use datasetrs::core::download::HttpFetcher;
use datasetrs::core::harvest::RecordedSearch;
use datasetrs::core::normalize::Normalizer;
use datasetrs::core::partition::{Partitioner, Renamer};
use datasetrs::core::review::ToolOutcome;
use datasetrs::pipeline::{Pipeline, PipelineReport, StageStatus};
use datasetrs::workdir::list_images;
use datasetrs::{
    Bucket, CancelToken, Config, Interrupted, SplitRatios, StageError, WorkingDirectory, history,
    logging,
};

#[derive(Parser, Debug)]
#[command(name = "datasetrs", version, about = "Build image datasets from web search results")]
struct Cli {
    /// Settings file (default: ./settings.json, then the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline for one or more search terms
    Run {
        /// Search terms; the first names the dataset directory
        terms: Vec<String>,
        /// Recorded search results to harvest from
        #[arg(long, value_name = "FILE")]
        results: Option<PathBuf>,
        /// Do not pause for manual review after cleaning
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete perceptual duplicates, keeping the first of each group
    Dedup {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Only show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Square-pad and resize images in place
    Resize {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Side of the output square (default: image_dimension setting)
        #[arg(long)]
        size: Option<u32>,
    },

    /// Add a horizontally flipped copy of every image
    Mirror {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Move images into train/valid/test
    Split {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Percentages as train/valid/test, e.g. 70/15/15
        #[arg(long)]
        ratios: Option<SplitRatios>,
        /// Seed for a reproducible split
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Renumber images as `<label>_(n).jpg`
    Rename {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        #[arg(short, long)]
        label: String,
    },

    /// List duplicate removal history
    History {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Manage the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Write a settings file with default values
    Init {
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,
    },
}

fn main() {
    let start = Instant::now();
    let result = run_cli();

    let code = match &result {
        Ok(()) => 0,
        Err(e) if is_interrupt(e) => {
            println!("\n⚠️  Interrupted");
            log::info!("Run interrupted by user");
            130
        }
        Err(e) => {
            eprintln!("\n❌ {e:#}");
            log::error!("{e:#}");
            1
        }
    };

    println!("⏱ Finished in {:.2?}", start.elapsed());
    std::process::exit(code);
}

fn is_interrupt(e: &anyhow::Error) -> bool {
    e.downcast_ref::<Interrupted>().is_some()
        || e.downcast_ref::<StageError>().is_some_and(StageError::is_interrupt)
}

fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config {
        command: ConfigCmd::Init { path },
    } = &cli.command
    {
        return init_config(path.as_deref());
    }

    let (config, source) = Config::load(cli.config.as_deref())?;
    config.validate()?;

    if config.logging {
        if let Err(e) = logging::init_logger(&config.log_dir) {
            eprintln!("⚠️  Logging disabled: {e}");
        }
    }
    match &source {
        Some(path) => log::info!("Settings read from {}", path.display()),
        None => log::info!("No settings file found; using defaults"),
    }

    if config.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build_global()
            .context("Failed to configure worker pool")?;
    }

    let cancel = CancelToken::new();
    cancel
        .install_ctrlc_handler()
        .context("Failed to install Ctrl+C handler")?;

    match cli.command {
        Commands::Run { terms, results, yes } => run_pipeline(&config, cancel, terms, results, yes),

        Commands::Dedup { path, dry_run } => {
            println!("▶ Removing duplicates in: {}", path.display());
            let items = list_images(&path)?;
            let report = Deduplicator::new().dry_run(dry_run).run(&items, &cancel)?;

            if !report.found_duplicates() {
                println!("No duplicates found.");
            } else if dry_run {
                for item in &report.removed {
                    println!("   🗑️  [dry-run] DELETE {item}");
                }
                println!("\n⚠️  Dry-run only; no files were changed.");
            } else {
                println!(
                    "✨ {} duplicate group(s), {} file(s) deleted",
                    report.duplicate_groups,
                    report.removed.len()
                );
                println!(
                    "✅ Recorded history in {}",
                    history::history_path(&path).display()
                );
            }
            if report.errors > 0 {
                println!("⚠️  {} image(s) could not be processed", report.errors);
            }
            Ok(())
        }

        Commands::Resize { path, size } => {
            let size = size.unwrap_or(config.image_dimension);
            println!("▶ Resizing images in {} to {size}x{size}", path.display());
            let normalizer = Normalizer::new(size, config.fill_color);
            let report = normalizer.resize_all(&list_images(&path)?, &cancel)?;
            println!(
                "✅ Resized {} ({} already sized, {} failed)",
                report.written.len(),
                report.skipped,
                report.failed
            );
            Ok(())
        }

        Commands::Mirror { path } => {
            println!("▶ Mirroring images in {}", path.display());
            let normalizer = Normalizer::new(config.image_dimension, config.fill_color);
            let report = normalizer.mirror_all(&list_images(&path)?, &cancel)?;
            println!(
                "✅ Mirrored {} ({} skipped, {} failed)",
                report.written.len(),
                report.skipped,
                report.failed
            );
            Ok(())
        }

        Commands::Split { path, ratios, seed } => {
            let ratios = ratios.unwrap_or(config.split_ratios);
            println!("▶ Splitting {} as {ratios}", path.display());
            let mut partitioner = Partitioner::new(ratios, seed.or(config.seed));
            let report = partitioner.partition(&WorkingDirectory::new(&path), &cancel)?;
            for bucket in Bucket::ALLOCATION_ORDER {
                println!("   📦 {bucket}: {}", report.moved_to(bucket));
            }
            if report.failed > 0 {
                println!("⚠️  {} image(s) could not be moved", report.failed);
            }
            Ok(())
        }

        Commands::Rename { path, label } => {
            let report = Renamer::new(label).rename_dir(&path, &cancel)?;
            println!("✅ Renamed {} ({} failed)", report.renamed, report.failed);
            Ok(())
        }

        Commands::History { path } => {
            let records = history::read(&path)?;
            println!("🗂️  Duplicate History:");
            for (i, rec) in records.iter().enumerate() {
                println!(
                    "[{}] {}\n     fingerprint: {}\n     kept: {}\n     culled: {:?}\n     action: {}\n",
                    i, rec.timestamp, rec.fingerprint, rec.retained, rec.culled, rec.action
                );
            }
            Ok(())
        }

        Commands::Config { .. } => Ok(()),
    }
}

fn init_config(path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(Path::new(SETTINGS_FILE));
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    Config::default().save_to_file(path)?;
    println!("✅ Wrote default settings to {}", path.display());
    Ok(())
}

fn run_pipeline(
    config: &Config,
    cancel: CancelToken,
    mut terms: Vec<String>,
    results: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    print_banner(config);

    if terms.is_empty() {
        terms = prompt_terms()?;
    }
    if terms.is_empty() {
        bail!("No search terms given");
    }
    log::info!("Search terms: {terms:?}");

    let fetcher = HttpFetcher::new(
        &config.user_agent,
        Duration::from_secs(config.fetch_timeout_secs),
    )?;
    let mut page = match &results {
        Some(path) => Some(RecordedSearch::from_file(path)?),
        None => None,
    };

    let mut pipeline = Pipeline::new(config, cancel);
    match page.as_mut() {
        Some(page) => pipeline = pipeline.with_search(page, &fetcher),
        None if config.features.download => {
            println!("⚠️  No --results file given; skipping download");
        }
        None => {}
    }
    if config.features.clean && !yes {
        pipeline = pipeline.with_review_gate(Box::new(|dir: &Path| {
            println!("\n🔍 Review the images in {} and remove any outliers.", dir.display());
            wait_for_review(
                Input::<String>::new()
                    .with_prompt("Press Enter to continue")
                    .allow_empty(true)
                    .interact_text(),
            );
        }));
    }

    let report = pipeline.run(&terms)?;
    print_summary(&report);
    Ok(())
}

/// Returns false when the pause prompt could not be read; the run continues either way.
fn wait_for_review(prompt: dialoguer::Result<String>) -> bool {
    match prompt {
        Ok(_) => true,
        Err(e) => {
            log::warn!("Review prompt failed, continuing without a pause: {e}");
            false
        }
    }
}

fn prompt_terms() -> Result<Vec<String>> {
    println!("Enter search terms, one per line. Finish with an empty line or `...`");
    let mut terms = Vec::new();
    loop {
        let term: String = Input::new()
            .with_prompt(format!("Term {}", terms.len() + 1))
            .allow_empty(true)
            .interact_text()
            .context("Failed to read search term")?;
        let term = term.trim();
        if term.is_empty() || term == "..." {
            break;
        }
        terms.push(term.to_string());
    }
    Ok(terms)
}

fn print_banner(config: &Config) {
    let f = &config.features;
    let agent: String = if config.user_agent.chars().count() > 46 {
        format!("{}..", config.user_agent.chars().take(44).collect::<String>())
    } else {
        config.user_agent.clone()
    };
    println!(
        "
                              datasetrs v{}
 ==============================================================================
 {}
 ==============================================================================

 Current Preferences:
 User Agent :                    {agent}
 Runtime logging :               {}
 No of Images :                  {}
 Image Size :                    {}x{}px
 Split :                         {}
 Download Images :               {}
 Remove Duplicates :             {}
 Clean Images :                  {}
 Resize Images :                 {}
 Mirror Images :                 {}
 Move Images :                   {}
 Rename Images :                 {}
 Label Images :                  {}

 Preferences can be changed via the settings.json file
",
        env!("CARGO_PKG_VERSION"),
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        config.logging,
        config.target_image_count,
        config.image_dimension,
        config.image_dimension,
        config.split_ratios,
        f.download,
        f.dedup,
        f.clean,
        f.resize,
        f.mirror,
        f.partition,
        f.rename,
        f.label,
    );
}

fn print_summary(report: &PipelineReport) {
    if report.nothing_to_process {
        println!("⚠️  No images to process in {}", report.workdir.display());
        return;
    }

    println!("\n📊 Summary for {}", report.workdir.display());
    if report.urls_harvested > 0 {
        println!(
            "   🔗 {} links harvested, {} images downloaded",
            report.urls_harvested, report.downloaded
        );
    }
    if let Some(dedup) = &report.dedup {
        if dedup.found_duplicates() {
            println!("   🗑️  {} duplicates removed", dedup.removed.len());
        } else {
            println!("   ✨ No duplicates found");
        }
    }
    match &report.clean {
        Some(ToolOutcome::Completed) => println!("   🧹 Cleaner finished"),
        Some(ToolOutcome::NoOutliers) => println!("   🧹 No outliers detected"),
        Some(ToolOutcome::Warning(code)) => println!("   ⚠️  Cleaner exited with {code:?}"),
        None => {}
    }
    if let Some(resize) = &report.resize {
        println!("   📐 {} resized, {} failed", resize.written.len(), resize.failed);
    }
    if let Some(mirror) = &report.mirror {
        println!("   🪞 {} mirrored, {} failed", mirror.written.len(), mirror.failed);
    }
    if let Some(moves) = &report.partition {
        for bucket in Bucket::ALLOCATION_ORDER {
            println!("   📦 {bucket}: {}", moves.moved_to(bucket));
        }
    }
    if report.renamed > 0 {
        println!("   🏷️  {} renamed", report.renamed);
    }
    for (stage, status) in &report.stages {
        if let StageStatus::Aborted(message) = status {
            println!("   ❌ {stage} stage aborted: {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_review_prompt_does_not_stop_run() {
        let closed = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stdin closed");
        assert!(!wait_for_review(Err(dialoguer::Error::IO(closed))));
        assert!(wait_for_review(Ok(String::new())));
    }
}
