use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = ".history.jsonl";

/// One fingerprint group whose extra members were removed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub timestamp: String,
    pub fingerprint: String,
    pub retained: String,
    pub culled: Vec<String>,
    pub action: String,
}

impl DedupRecord {
    pub fn deleted(fingerprint: String, retained: &Path, culled: &[PathBuf]) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            fingerprint,
            retained: retained.to_string_lossy().into_owned(),
            culled: culled
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            action: "deleted".to_string(),
        }
    }
}

pub fn history_path(dir: &Path) -> PathBuf {
    dir.join(HISTORY_FILE)
}

/// Append records to `<dir>/.history.jsonl`.
pub fn append(dir: &Path, records: &[DedupRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let history_file = history_path(dir);
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&history_file)
        .with_context(|| format!("Failed to open history file {:?}", history_file))?;

    for record in records {
        writeln!(out, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

/// Read every well-formed record; malformed lines are reported and skipped.
pub fn read(dir: &Path) -> Result<Vec<DedupRecord>> {
    let history_file = history_path(dir);
    let f = File::open(&history_file)
        .with_context(|| format!("Could not open history file {:?}", history_file))?;

    let mut records = Vec::new();
    for (i, line) in BufReader::new(f).lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<DedupRecord>(&line) {
            Ok(rec) => records.push(rec),
            Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(records)
}
