use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use time::UtcOffset;

use crate::repository::MAX_LIST_LIMIT;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "NurtureNote";
const APP_NAME: &str = "nurturenote";

const MAX_RANGE_DAYS: u32 = 90;
const MAX_OFFSET_MINUTES: i32 = 23 * 60 + 59;
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover(overrides: &PathOverrides) -> Result<Self> {
        let paths = ConfigPaths::discover(overrides)?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
        Ok(())
    }
}

/// Command-line overrides; they win over `NURTURENOTE_CONFIG` / `NURTURENOTE_DATA`.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover(overrides: &PathOverrides) -> Result<Self> {
        let override_config = overrides
            .config
            .clone()
            .or_else(|| env::var("NURTURENOTE_CONFIG").ok().map(PathBuf::from));
        let override_data = overrides
            .data_dir
            .clone()
            .or_else(|| env::var("NURTURENOTE_DATA").ok().map(PathBuf::from));

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::rooted(config_dir, config_file, data_root, state_dir))
    }

    /// Layout under explicit roots, used by tests and by `discover`.
    pub fn rooted(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            config_dir,
            config_file,
            database_path: data_dir.join("entries.db"),
            data_dir,
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Http,
    Local,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub server: ServerOptions,
    pub polling: PollingOptions,
    pub entries: EntryOptions,
    pub calendar: CalendarOptions,
    pub analysis: AnalysisOptions,
    pub storage: StorageOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.polling.sanitize();
        let limit = self.entries.list_limit.clamp(1, MAX_LIST_LIMIT);
        if limit != self.entries.list_limit {
            tracing::warn!(
                configured = self.entries.list_limit,
                used = limit,
                "entries.list_limit out of range, clamping"
            );
            self.entries.list_limit = limit;
        }
        let range = self.analysis.default_range_days.clamp(1, MAX_RANGE_DAYS);
        if range != self.analysis.default_range_days {
            tracing::warn!(
                configured = self.analysis.default_range_days,
                used = range,
                "analysis.default_range_days out of range, clamping"
            );
            self.analysis.default_range_days = range;
        }
        if let Some(minutes) = self.calendar.utc_offset_minutes {
            if minutes.abs() > MAX_OFFSET_MINUTES {
                tracing::warn!(minutes, "calendar.utc_offset_minutes invalid, using local offset");
                self.calendar.utc_offset_minutes = None;
            }
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub base_url: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            timeout: Duration::from_millis(10_000),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingOptions {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "list_interval_ms")]
    pub list_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "tracked_interval_ms")]
    pub tracked_interval: Duration,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            list_interval: Duration::from_millis(5_000),
            tracked_interval: Duration::from_millis(3_000),
        }
    }
}

impl PollingOptions {
    fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.list_interval.is_zero() {
            tracing::warn!("polling.list_interval_ms is zero, falling back to default");
            self.list_interval = defaults.list_interval;
        }
        if self.tracked_interval.is_zero() {
            tracing::warn!("polling.tracked_interval_ms is zero, falling back to default");
            self.tracked_interval = defaults.tracked_interval;
        }
        if self.list_interval > MAX_POLL_INTERVAL {
            tracing::warn!("polling.list_interval_ms exceeds one hour, clamping");
            self.list_interval = MAX_POLL_INTERVAL;
        }
        if self.tracked_interval > MAX_POLL_INTERVAL {
            tracing::warn!("polling.tracked_interval_ms exceeds one hour, clamping");
            self.tracked_interval = MAX_POLL_INTERVAL;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryOptions {
    pub list_limit: usize,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            list_limit: MAX_LIST_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarOptions {
    /// Offset used to decide which day an entry belongs to. Unset means the
    /// system's local offset (UTC if that cannot be determined).
    pub utc_offset_minutes: Option<i32>,
}

impl CalendarOptions {
    pub fn offset(&self) -> UtcOffset {
        match self.utc_offset_minutes {
            Some(minutes) => UtcOffset::from_whole_seconds(minutes * 60).unwrap_or(UtcOffset::UTC),
            None => UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub default_range_days: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            default_range_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}
