use std::path::Path;
use std::process::Command;

use crate::config::ToolCommand;
use crate::error::StageError;

const DIR_PLACEHOLDER: &str = "{dir}";

/// How an external review tool finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Completed,
    /// The tool refused to run because there was nothing to review
    NoOutliers,
    /// Non-zero exit; `None` when the process was killed by a signal
    Warning(Option<i32>),
}

/// Classify a finished tool run from its exit code and stderr.
pub fn classify(code: Option<i32>, stderr: &str, sentinel: Option<&str>) -> ToolOutcome {
    if code == Some(0) {
        return ToolOutcome::Completed;
    }
    let last_line = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty());
    match (last_line, sentinel) {
        (Some(line), Some(sentinel)) if line == sentinel => ToolOutcome::NoOutliers,
        _ => ToolOutcome::Warning(code),
    }
}

/// An external GUI or script run to completion over one directory.
pub struct ReviewTool {
    name: String,
    command: ToolCommand,
}

impl ReviewTool {
    pub fn new(name: impl Into<String>, command: ToolCommand) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn args_for(&self, dir: &Path) -> Vec<String> {
        let dir = dir.display().to_string();
        self.command
            .args
            .iter()
            .map(|a| a.replace(DIR_PLACEHOLDER, &dir))
            .collect()
    }

    /// Block until the tool exits. Only a failure to start it is an error.
    pub fn run(&self, dir: &Path) -> Result<ToolOutcome, StageError> {
        // The tool may run from its own directory, so hand it an absolute path.
        let dir = std::path::absolute(dir).map_err(|e| StageError::io(dir, e))?;

        let mut command = Command::new(&self.command.program);
        command.args(self.args_for(&dir));
        if let Some(cwd) = &self.command.working_dir {
            command.current_dir(cwd);
        }

        log::info!("Launching {} on {}", self.name, dir.display());
        let output = command.output().map_err(|source| StageError::ToolLaunch {
            tool: self.name.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            log::info!(target: "review", "[{}] {}", self.name, line);
        }
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            log::warn!(target: "review", "[{}] {}", self.name, line);
        }

        let outcome = classify(
            output.status.code(),
            &stderr,
            self.command.benign_sentinel.as_deref(),
        );
        match &outcome {
            ToolOutcome::Completed => log::info!("{} finished", self.name),
            ToolOutcome::NoOutliers => log::info!("{}: no outliers detected", self.name),
            ToolOutcome::Warning(code) => log::warn!("{} exited with status {code:?}", self.name),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SENTINEL: &str = "AssertionError: No outlier detected in the directory.";

    #[test]
    fn test_classify() {
        assert_eq!(classify(Some(0), "noise", Some(SENTINEL)), ToolOutcome::Completed);
        assert_eq!(
            classify(Some(1), &format!("Traceback...\n{SENTINEL}\n"), Some(SENTINEL)),
            ToolOutcome::NoOutliers
        );
        assert_eq!(
            classify(Some(1), "ValueError: bad image", Some(SENTINEL)),
            ToolOutcome::Warning(Some(1))
        );
        assert_eq!(classify(Some(2), SENTINEL, None), ToolOutcome::Warning(Some(2)));
        assert_eq!(classify(None, "", Some(SENTINEL)), ToolOutcome::Warning(None));
    }

    #[test]
    fn test_dir_placeholder_is_substituted() {
        let tool = ReviewTool::new("cleaner", ToolCommand::default_cleaner());
        let args = tool.args_for(Path::new("/data/cats"));
        assert_eq!(args, vec!["image_set_cleaner.py", "--image_dir=/data/cats"]);
    }

    #[test]
    fn test_missing_program_is_stage_error() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ReviewTool::new(
            "ghost",
            ToolCommand {
                program: "datasetrs-no-such-program".to_string(),
                args: vec![],
                working_dir: None,
                benign_sentinel: None,
            },
        );
        assert!(matches!(
            tool.run(temp_dir.path()),
            Err(StageError::ToolLaunch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_sentinel_exit_reports_no_outliers() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ReviewTool::new(
            "cleaner",
            ToolCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), format!("echo '{SENTINEL}' >&2; exit 1")],
                working_dir: None,
                benign_sentinel: Some(SENTINEL.to_string()),
            },
        );
        assert_eq!(tool.run(temp_dir.path()).unwrap(), ToolOutcome::NoOutliers);
    }

    #[cfg(unix)]
    #[test]
    fn test_other_failure_is_warning() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ReviewTool::new(
            "labeler",
            ToolCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "test -d {dir} && exit 3".to_string()],
                working_dir: None,
                benign_sentinel: None,
            },
        );
        assert_eq!(tool.run(temp_dir.path()).unwrap(), ToolOutcome::Warning(Some(3)));
    }
}
