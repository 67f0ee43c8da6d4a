//! Configuration types for place-harvest

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration
///
/// Every field has a default, so an empty JSON object is a valid config file.
/// Sub-configs:
/// - [`persistence`](PersistenceConfig): task store location
/// - [`identities`](IdentityConfig): proxy list and client signatures
/// - [`scrape`](ScrapeConfig): Stage A (place pages)
/// - [`images`](ImageConfig): Stage B (image downloads)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Egress identity settings
    #[serde(default)]
    pub identities: IdentityConfig,

    /// Stage A settings
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Stage B settings
    #[serde(default)]
    pub images: ImageConfig,
}

impl Config {
    /// Load a JSON config file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Reject settings the runner cannot work with
    pub fn validate(&self) -> Result<()> {
        self.scrape.stage.validate("scrape")?;
        self.images.stage.validate("images")?;

        if self.images.default_extension.trim().is_empty() {
            return Err(Error::config(
                "images.default_extension",
                "default image extension must not be empty",
            ));
        }
        Ok(())
    }

    /// Settings for the given stage
    pub fn stage(&self, stage: crate::types::Stage) -> &StageConfig {
        match stage {
            crate::types::Stage::Scrape => &self.scrape.stage,
            crate::types::Stage::Images => &self.images.stage,
        }
    }
}

/// Task store location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "place-harvest.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Egress identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Proxy list, one `host:port:user:password` per line (default: "proxies.txt")
    #[serde(default = "default_proxy_file")]
    pub proxy_file: PathBuf,

    /// Client signatures paired with proxies in rotation order
    ///
    /// Identity `i` uses `user_agents[i % len]`. Empty means the built-in default.
    #[serde(default)]
    pub user_agents: Vec<String>,

    /// Route requests through the identity's proxy (default: true)
    ///
    /// Turning this off keeps user-agent rotation but connects directly, which is
    /// only useful when debugging extraction against a local target.
    #[serde(default = "default_true")]
    pub use_proxy: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            proxy_file: default_proxy_file(),
            user_agents: Vec::new(),
            use_proxy: true,
        }
    }
}

/// Batch runner settings shared by both stages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Tasks fetched and attempted concurrently per batch
    ///
    /// This is also the fan-out bound; size it to the available proxies and sockets.
    pub batch_size: usize,

    /// Attempts per task before it is excluded from selection
    pub max_retries: u32,

    /// Upper bound on one network attempt
    #[serde(rename = "timeout_secs", with = "duration_serde")]
    pub timeout: Duration,

    /// Pause after every batch
    #[serde(rename = "batch_delay_secs", with = "duration_serde")]
    pub batch_delay: Duration,

    /// Stretch each pause by a random factor between 1x and 2x (default: false)
    #[serde(default)]
    pub delay_jitter: bool,
}

impl StageConfig {
    fn validate(&self, prefix: &str) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config(
                format!("{prefix}.batch_size"),
                "batch size must be greater than zero",
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::config(
                format!("{prefix}.max_retries"),
                "max retries must be greater than zero",
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::config(
                format!("{prefix}.timeout_secs"),
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Stage A configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Runner settings (default: batch 20, 10 retries, 15s timeout, 10s delay)
    #[serde(default = "default_scrape_stage")]
    pub stage: StageConfig,

    /// Page titles that mean a challenge page was served instead of the place
    #[serde(default = "default_blocked_titles")]
    pub blocked_titles: Vec<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            stage: default_scrape_stage(),
            blocked_titles: default_blocked_titles(),
        }
    }
}

/// How downloaded images are named on disk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageNaming {
    /// Random v4 UUID (default)
    #[default]
    Uuid,
    /// SHA-256 of the image bytes, so identical images share one file
    ContentHash,
}

/// Stage B configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Runner settings (default: batch 100, 8 retries, 15s timeout, no delay)
    #[serde(default = "default_images_stage")]
    pub stage: StageConfig,

    /// Directory downloaded images are written to (default: "images")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File naming scheme
    #[serde(default)]
    pub naming: ImageNaming,

    /// Extension used when none can be recovered from the URL (default: "jpg")
    #[serde(default = "default_extension")]
    pub default_extension: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            stage: default_images_stage(),
            output_dir: default_output_dir(),
            naming: ImageNaming::default(),
            default_extension: default_extension(),
        }
    }
}

/// User agent used when no signatures are configured
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("place-harvest.db")
}

fn default_proxy_file() -> PathBuf {
    PathBuf::from("proxies.txt")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_extension() -> String {
    "jpg".into()
}

fn default_true() -> bool {
    true
}

fn default_blocked_titles() -> Vec<String> {
    vec!["Google Maps".into()]
}

fn default_scrape_stage() -> StageConfig {
    StageConfig {
        batch_size: 20,
        max_retries: 10,
        timeout: Duration::from_secs(15),
        batch_delay: Duration::from_secs(10),
        delay_jitter: false,
    }
}

fn default_images_stage() -> StageConfig {
    StageConfig {
        batch_size: 100,
        max_retries: 8,
        timeout: Duration::from_secs(15),
        batch_delay: Duration::ZERO,
        delay_jitter: false,
    }
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;

    #[test]
    fn empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.persistence.database_path, PathBuf::from("place-harvest.db"));
        assert_eq!(config.identities.proxy_file, PathBuf::from("proxies.txt"));
        assert!(config.identities.use_proxy);
        assert_eq!(config.scrape.stage.batch_size, 20);
        assert_eq!(config.scrape.stage.max_retries, 10);
        assert_eq!(config.scrape.stage.batch_delay, Duration::from_secs(10));
        assert_eq!(config.scrape.blocked_titles, vec!["Google Maps".to_string()]);
        assert_eq!(config.images.stage.batch_size, 100);
        assert_eq!(config.images.stage.max_retries, 8);
        assert_eq!(config.images.stage.batch_delay, Duration::ZERO);
        assert_eq!(config.images.naming, ImageNaming::Uuid);
        assert_eq!(config.images.default_extension, "jpg");
        config.validate().unwrap();
    }

    #[test]
    fn stage_durations_are_whole_seconds() {
        let json = r#"{
            "scrape": {
                "stage": {
                    "batch_size": 5,
                    "max_retries": 3,
                    "timeout_secs": 30,
                    "batch_delay_secs": 2,
                    "delay_jitter": true
                }
            },
            "images": { "naming": "content_hash" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        let scrape = config.stage(Stage::Scrape);
        assert_eq!(scrape.batch_size, 5);
        assert_eq!(scrape.max_retries, 3);
        assert_eq!(scrape.timeout, Duration::from_secs(30));
        assert_eq!(scrape.batch_delay, Duration::from_secs(2));
        assert!(scrape.delay_jitter);
        // blocked titles keep their default when the section is partially given
        assert_eq!(config.scrape.blocked_titles.len(), 1);
        assert_eq!(config.images.naming, ImageNaming::ContentHash);

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["scrape"]["stage"]["timeout_secs"], 30);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.images.stage.batch_size = 0;

        match config.validate().unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("images.batch_size")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_retries_and_timeout() {
        let mut config = Config::default();
        config.scrape.stage.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scrape.stage.timeout = Duration::ZERO;
        match config.validate().unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("scrape.timeout_secs")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn from_file_reports_missing_file_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(&dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"persistence": {"database_path": "/data/tasks.db"}}"#)
            .await
            .unwrap();

        let config = Config::from_file(&path).await.unwrap();
        assert_eq!(config.persistence.database_path, PathBuf::from("/data/tasks.db"));
    }
}
