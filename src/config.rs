use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

pub const SETTINGS_FILE: &str = "settings.json";

/// Train/valid/test percentages. Always sums to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SplitRatios {
    pub train: u32,
    pub valid: u32,
    pub test: u32,
}

impl SplitRatios {
    pub fn new(train: u32, valid: u32, test: u32) -> Result<Self, ConfigError> {
        if train.checked_add(valid).and_then(|s| s.checked_add(test)) != Some(100) {
            return Err(ConfigError::Ratios(format!("{train}/{valid}/{test}")));
        }
        Ok(Self { train, valid, test })
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 70,
            valid: 15,
            test: 15,
        }
    }
}

impl FromStr for SplitRatios {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split('/')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| ConfigError::Ratios(s.to_string()))?;

        match parts.as_slice() {
            [train, valid, test] => {
                Self::new(*train, *valid, *test).map_err(|_| ConfigError::Ratios(s.to_string()))
            }
            _ => Err(ConfigError::Ratios(s.to_string())),
        }
    }
}

impl TryFrom<String> for SplitRatios {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SplitRatios> for String {
    fn from(r: SplitRatios) -> Self {
        r.to_string()
    }
}

impl fmt::Display for SplitRatios {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.train, self.valid, self.test)
    }
}

/// Per-stage on/off switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub download: bool,
    pub dedup: bool,
    /// External outlier cleaner (off by default)
    pub clean: bool,
    pub resize: bool,
    pub mirror: bool,
    #[serde(rename = "move")]
    pub partition: bool,
    pub rename: bool,
    /// External labeling tool (off by default)
    pub label: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            download: true,
            dedup: true,
            clean: false,
            resize: true,
            mirror: true,
            partition: true,
            rename: true,
            label: false,
        }
    }
}

/// How to launch an external review tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    /// `{dir}` is replaced by the directory under review
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Last stderr line that means "nothing to do" rather than failure
    pub benign_sentinel: Option<String>,
}

impl ToolCommand {
    pub fn default_cleaner() -> Self {
        Self {
            program: "python".to_string(),
            args: vec![
                "image_set_cleaner.py".to_string(),
                "--image_dir={dir}".to_string(),
            ],
            working_dir: Some(PathBuf::from("ImageSetCleaner")),
            benign_sentinel: Some(
                "AssertionError: No outlier detected in the directory.".to_string(),
            ),
        }
    }

    pub fn default_labeler() -> Self {
        Self {
            program: "labelImg".to_string(),
            args: vec!["{dir}".to_string()],
            working_dir: None,
            benign_sentinel: None,
        }
    }
}

/// Run configuration. Built once at startup and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unique images to collect per search term
    pub target_image_count: usize,

    /// Side of the square output images, in pixels
    pub image_dimension: u32,

    pub split_ratios: SplitRatios,

    /// Padding color used when squaring images
    pub fill_color: [u8; 3],

    /// Parent of the per-query working directories
    pub dataset_root: PathBuf,

    pub logging: bool,
    pub log_dir: PathBuf,

    pub user_agent: String,
    pub fetch_timeout_secs: u64,

    /// Worker threads for per-item stages (0 = one per CPU)
    pub workers: usize,

    /// Fixed seed for the partition draw; unseeded when absent
    pub seed: Option<u64>,

    pub features: Features,
    pub cleaner: ToolCommand,
    pub labeler: ToolCommand,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_image_count: 10,
            image_dimension: 416,
            split_ratios: SplitRatios::default(),
            fill_color: [255, 255, 255],
            dataset_root: PathBuf::from("dataset"),
            logging: true,
            log_dir: PathBuf::from("logs"),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:78.0) Gecko/20100101 Firefox/78.0"
                .to_string(),
            fetch_timeout_secs: 30,
            workers: 0,
            seed: None,
            features: Features::default(),
            cleaner: ToolCommand::default_cleaner(),
            labeler: ToolCommand::default_labeler(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_reader(file).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve and load settings. An explicit path must exist; otherwise the
    /// first `settings.json` found in the current or user config directory is
    /// used, falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in Self::search_paths() {
            if candidate.is_file() {
                let config = Self::from_file(&candidate)?;
                return Ok((config, Some(candidate)));
            }
        }

        Ok((Self::default(), None))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(SETTINGS_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("datasetrs").join(SETTINGS_FILE));
        }
        paths
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::create(path).map_err(write_err)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_dimension == 0 {
            return Err(ConfigError::Invalid(
                "image_dimension must be greater than 0".to_string(),
            ));
        }
        if self.target_image_count == 0 {
            return Err(ConfigError::Invalid(
                "target_image_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Working directory for a query
    pub fn working_dir(&self, query: &str) -> PathBuf {
        self.dataset_root.join(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ratios() {
        let r: SplitRatios = "70/15/15".parse().unwrap();
        assert_eq!(r, SplitRatios::new(70, 15, 15).unwrap());
        assert_eq!(r.to_string(), "70/15/15");

        let r: SplitRatios = " 80 / 10 / 10 ".parse().unwrap();
        assert_eq!((r.train, r.valid, r.test), (80, 10, 10));
    }

    #[test]
    fn test_reject_bad_ratios() {
        assert!("70/15/10".parse::<SplitRatios>().is_err());
        assert!("70/30".parse::<SplitRatios>().is_err());
        assert!("a/b/c".parse::<SplitRatios>().is_err());
        assert!("50/25/25/0".parse::<SplitRatios>().is_err());
    }

    #[test]
    fn test_ratios_that_wrap_around_are_rejected() {
        assert!(matches!(
            "4294967295/1/100".parse::<SplitRatios>(),
            Err(ConfigError::Ratios(_))
        ));
        assert!(SplitRatios::new(u32::MAX, u32::MAX, 102).is_err());

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"split_ratios": "4294967295/1/100"}"#).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_defaults_disable_external_tools() {
        let f = Features::default();
        assert!(f.download && f.dedup && f.resize && f.mirror && f.partition && f.rename);
        assert!(!f.clean);
        assert!(!f.label);
    }

    #[test]
    fn test_partial_settings_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"{"target_image_count": 50, "split_ratios": "80/10/10", "features": {"move": false}}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.target_image_count, 50);
        assert_eq!(config.split_ratios, SplitRatios::new(80, 10, 10).unwrap());
        assert!(!config.features.partition);
        assert!(config.features.mirror);
        assert_eq!(config.image_dimension, 416);
    }

    #[test]
    fn test_malformed_settings_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);

        std::fs::write(&path, r#"{"target_image_count": 50,}"#).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));

        std::fs::write(&path, r#"{"split_ratios": "90/15/15"}"#).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.json");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);

        let mut config = Config::default();
        config.seed = Some(7);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.seed, Some(7));
        assert_eq!(loaded.split_ratios, config.split_ratios);
        assert_eq!(loaded.cleaner, config.cleaner);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.image_dimension = 0;
        assert!(config.validate().is_err());
    }
}
