use std::fs::canonicalize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config as Layers, ConfigError, Environment, File, FileFormat, FileSourceFile};
use error_stack::{Report, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::chain::ChainMetadata;
use crate::contracts::KnownContract;
use crate::finality::Thresholds;
use crate::recovery::SettleDelays;

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub search_api: Url,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub retry_max_attempts: u64,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub coordination_chain: String,
    pub environment: String,
    pub thresholds: Thresholds,
    pub recovery: SettleDelays,
    pub chains: Vec<ChainMetadata>,
    pub contracts: Vec<KnownContract>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_api: Url::parse("https://api.gmp.axelarscan.io")
                .unwrap_or_else(|_| unreachable!("default search api url is valid")),
            request_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            retry_max_attempts: 3,
            poll_interval: Duration::from_secs(30),
            coordination_chain: "axelarnet".to_string(),
            environment: "mainnet".to_string(),
            thresholds: Thresholds::default(),
            recovery: SettleDelays::default(),
            chains: vec![],
            contracts: vec![],
        }
    }
}

impl Config {
    /// Merges the config files that exist among `paths`, in order, then applies
    /// `GMP_TRACKER__*` environment overrides.
    pub fn load(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        Layers::builder()
            .add_source(existing_files(paths))
            .add_source(Environment::with_prefix("GMP_TRACKER").separator("__"))
            .build()?
            .try_deserialize::<Config>()
            .map_err(Report::from)
    }
}

fn existing_files(paths: &[PathBuf]) -> Vec<File<FileSourceFile, FileFormat>> {
    let files: Vec<_> = paths
        .iter()
        .map(expand_home_dir)
        .filter_map(|path| canonicalize(path).ok())
        .inspect(|path| info!(path = %path.display(), "found config file"))
        .map(File::from)
        .collect();

    if files.is_empty() {
        info!("found no config files to load");
    }

    files
}

pub fn expand_home_dir(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(home_subfolder) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    dirs::home_dir().map_or(path.to_path_buf(), |home| home.join(home_subfolder))
}
