//! Run settings: command-line flags over an optional YAML file over defaults.
//!
//! ```yaml
//! data_dir: /srv/datasets
//! asset_dir: /srv/datasets/pdfs
//! timeout_secs: 30
//! retries: 2
//! retry_base_delay_ms: 1000
//! user_agent: "gov_scrape (ops@example.org)"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::cli::GlobalOpts;
use crate::error::ScrapeError;
use crate::http::DEFAULT_TIMEOUT;

const DEFAULT_RETRIES: usize = 2;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Contents of the YAML config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub asset_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<usize>,
    pub retry_base_delay_ms: Option<u64>,
    pub user_agent: Option<String>,
}

impl FileConfig {
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ScrapeError> {
        // an empty file deserializes to null
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
            .map_err(|e| ScrapeError::Config(format!("{}: {e}", path.display())))
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, ScrapeError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScrapeError::io(path, e))?;
        let config = Self::from_yaml(&text, path)?;
        debug!(?config, "Loaded config file");
        Ok(config)
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub asset_dir: PathBuf,
    pub timeout: Duration,
    pub retries: usize,
    pub retry_base_delay: Duration,
    pub user_agent: Option<String>,
    pub summary_out: Option<PathBuf>,
}

impl Settings {
    /// Load the config file named by `--config`, if any, and merge.
    pub async fn resolve(opts: &GlobalOpts) -> Result<Self, ScrapeError> {
        let file = match &opts.config {
            Some(path) => FileConfig::load(path).await?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(opts, file))
    }

    pub fn merge(opts: &GlobalOpts, file: FileConfig) -> Self {
        let data_dir = opts
            .data_dir
            .clone()
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let asset_dir = file.asset_dir.unwrap_or_else(|| data_dir.join("pdfs"));

        Self {
            asset_dir,
            timeout: opts
                .timeout_secs
                .or(file.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            retries: opts.retries.or(file.retries).unwrap_or(DEFAULT_RETRIES),
            retry_base_delay: file
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY),
            user_agent: file.user_agent,
            summary_out: opts.summary_out.clone(),
            data_dir,
        }
    }

    pub fn dataset_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }
}
