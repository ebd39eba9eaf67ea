use failure::Fail;
use log::LevelFilter;
use serde::Deserialize;
use std::{collections::HashMap, fs, path::PathBuf};
use toml;

use crate::utils::SingleInit;

static CONFIG: SingleInit<Config> = SingleInit::uninit();

pub fn load() -> crate::Result<&'static Config> {
    CONFIG.get_or_try_init(|| {
        let data = fs::read("config.toml").map_err(ReadConfigurationError)?;
        toml::from_slice(&data).map_err(|e| ConfigurationError(e).into())
    })
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database: Option<Database>,
    pub storage: Storage,
    #[serde(default)]
    pub typecheck: Typecheck,
    pub mail: crate::mail::Config,
    #[serde(default)]
    pub submission: Submission,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Database {
    /// Database connection URL.
    pub url: String,
}

/// Locations used by the workspace engine.
#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    /// Root of the permanent archive.
    pub archive: PathBuf,
    /// Directory holding per-workspace staging areas.
    pub workspaces: PathBuf,
    /// Directory holding per-workspace orphaned files left behind by
    /// interrupted operations.
    pub orphans: PathBuf,
    /// Retention area for deleted file content.
    pub trash: PathBuf,
    /// Retention area for replaced file content.
    pub versions: PathBuf,
}

impl Storage {
    /// Staging directory of a single workspace.
    pub fn workspace_dir(&self, workspace: i32) -> PathBuf {
        self.workspaces.join(workspace.to_string())
    }

    /// Orphan directory of a single workspace.
    pub fn orphan_dir(&self, workspace: i32) -> PathBuf {
        self.orphans.join(workspace.to_string())
    }
}

/// Resource type-checking policy.
#[derive(Clone, Debug, Deserialize)]
pub struct Typecheck {
    /// Archived on-site resources larger than this many bytes are not checked
    /// again during import.
    #[serde(default = "default_recheck_limit")]
    pub recheck_limit: u64,
    /// First-time checks of files larger than this many bytes are logged.
    #[serde(default = "default_warn_limit")]
    pub warn_limit: u64,
    /// Media type marking a file as a metadata document.
    #[serde(default = "default_metadata_mime")]
    pub metadata_mime: String,
    /// Judgements accepted for archiving, keyed by top-level archive area.
    /// The `"*"` key provides the default policy.
    #[serde(default)]
    pub accept: HashMap<String, Vec<crate::services::Judgement>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Submission {
    /// Seconds between two runs of the submission completion poller.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

/// Logging configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Logging {
    /// Default logging level.
    #[serde(default = "default_level_filter")]
    pub level: LevelFilter,
    /// Custom filters.
    #[serde(default)]
    pub filters: HashMap<String, LevelFilter>,
}

#[derive(Debug, Fail)]
#[fail(display = "Cannot read configuration file")]
pub struct ReadConfigurationError(#[fail(cause)] std::io::Error);

#[derive(Debug, Fail)]
#[fail(display = "Invalid configuration: {}", _0)]
pub struct ConfigurationError(#[fail(cause)] toml::de::Error);

/// Default re-check limit (8 MiB).
fn default_recheck_limit() -> u64 {
    8 * 1024 * 1024
}

/// Default large-check warning limit (1 MiB).
fn default_warn_limit() -> u64 {
    1024 * 1024
}

fn default_metadata_mime() -> String {
    "application/x-record+xml".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_level_filter() -> LevelFilter {
    LevelFilter::Info
}

impl Default for Typecheck {
    fn default() -> Self {
        Typecheck {
            recheck_limit: default_recheck_limit(),
            warn_limit: default_warn_limit(),
            metadata_mime: default_metadata_mime(),
            accept: HashMap::new(),
        }
    }
}

impl Default for Submission {
    fn default() -> Self {
        Submission {
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: default_level_filter(),
            filters: HashMap::new(),
        }
    }
}
