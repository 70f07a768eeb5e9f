use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: String,
    pub max_file_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: "data".to_string(),
            max_file_size: 2 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key the snapshot is persisted under.
    pub namespace: String,
    /// When false the store lives in memory only.
    pub persist: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "paloa-videos".to_string(),
            persist: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub upload_step: u8,
    pub upload_interval_ms: u64,
    /// Progress at which uploading hands over to processing.
    pub midpoint: u8,
    pub processing_step: u8,
    pub processing_interval_ms: u64,
    pub total_shots: u32,
    pub made_probability: f64,
    pub seed: Option<u64>,
    pub max_concurrent_runs: Option<usize>, // None = auto-detect
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_step: 5,
            upload_interval_ms: 100,
            midpoint: 60,
            processing_step: 2,
            processing_interval_ms: 150,
            total_shots: 24,
            made_probability: 0.625,
            seed: None,
            max_concurrent_runs: None,
        }
    }
}

impl PipelineConfig {
    pub fn upload_interval(&self) -> Duration {
        Duration::from_millis(self.upload_interval_ms)
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }

    pub fn concurrent_runs(&self) -> usize {
        self.max_concurrent_runs
            .filter(|&v| v > 0)
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1).clamp(2, 8))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub reply_delay_ms: u64,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: 1500,
        }
    }
}

impl CoachConfig {
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub job_retention_seconds: u64,
    pub job_reap_interval_seconds: u64,
    /// Idle time after which a coach conversation is dropped.
    pub conversation_retention_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            job_retention_seconds: 600,
            job_reap_interval_seconds: 60,
            conversation_retention_seconds: 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub coach: CoachConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_file_size: u64,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub coach: CoachConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        // Try to load config file
        let config_path = base_dir.join("config.toml");
        let file = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<ConfigFile>(&content)?
        } else {
            ConfigFile::default()
        };

        Ok(Self::from_file(file, &base_dir).with_env_overrides(&base_dir))
    }

    // Falls back to defaults when config.toml is unreadable
    pub fn from_env() -> Self {
        Self::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_file(file: ConfigFile, base_dir: &std::path::Path) -> Self {
        Self {
            port: file.server.port,
            data_dir: resolve_dir(base_dir, &file.server.data_dir),
            max_file_size: file.server.max_file_size,
            store: file.store,
            pipeline: file.pipeline,
            coach: file.coach,
            limits: file.limits,
            logging: file.logging,
        }
    }

    /// Env vars override the config file.
    fn with_env_overrides(mut self, base_dir: &std::path::Path) -> Self {
        if let Some(port) = env_parse("PORT") {
            self.port = port;
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            self.data_dir = resolve_dir(base_dir, &dir);
        }
        if let Some(max) = env_parse("MAX_FILE_SIZE") {
            self.max_file_size = max;
        }
        if let Ok(namespace) = std::env::var("STORE_NAMESPACE") {
            self.store.namespace = namespace;
        }
        if let Some(seed) = env_parse("PIPELINE_SEED") {
            self.pipeline.seed = Some(seed);
        }
        if let Some(runs) = env_parse("MAX_CONCURRENT_RUNS") {
            self.pipeline.max_concurrent_runs = Some(runs);
        }
        if let Some(delay) = env_parse("COACH_REPLY_DELAY_MS") {
            self.coach.reply_delay_ms = delay;
        }
        self
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.store.namespace))
    }
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_file(ConfigFile::default(), &base_dir)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn resolve_dir(base_dir: &std::path::Path, dir: &str) -> PathBuf {
    if dir.starts_with('/') {
        PathBuf::from(dir)
    } else {
        base_dir.join(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            port = 8080

            [pipeline]
            seed = 7
            upload_interval_ms = 10
            "#,
        )
        .unwrap();

        let config = Config::from_file(file, std::path::Path::new("/srv/app"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.data_dir, PathBuf::from("/srv/app/data"));
        assert_eq!(config.pipeline.seed, Some(7));
        assert_eq!(config.pipeline.upload_interval(), Duration::from_millis(10));
        assert_eq!(config.pipeline.midpoint, 60);
        assert_eq!(config.pipeline.total_shots, 24);
        assert_eq!(config.coach.reply_delay(), Duration::from_millis(1500));
        assert_eq!(config.store.namespace, "paloa-videos");
    }

    #[test]
    fn absolute_data_dir_is_kept() {
        let file: ConfigFile = toml::from_str("[server]\ndata_dir = \"/var/lib/paloa\"").unwrap();
        let config = Config::from_file(file, std::path::Path::new("/srv/app"));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/paloa"));
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/paloa/paloa-videos.json")
        );
    }

    #[test]
    fn concurrent_runs_ignores_zero() {
        let pipeline = PipelineConfig {
            max_concurrent_runs: Some(0),
            ..PipelineConfig::default()
        };
        assert!(pipeline.concurrent_runs() >= 2);

        let pipeline = PipelineConfig {
            max_concurrent_runs: Some(3),
            ..PipelineConfig::default()
        };
        assert_eq!(pipeline.concurrent_runs(), 3);
    }
}
