use headlines_cache::{CachePolicy, PrefillConfig, WarmerConfig};
use headlines_resilience::{BreakerConfig, RetryPolicy};
use headlines_storage::WindowQuery;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache TTLs and recency capacity
    #[serde(default)]
    pub cache: CacheConfig,
    /// Background cache warmer
    #[serde(default)]
    pub warmer: WarmerSettings,
    /// Profanity check dependency
    #[serde(default)]
    pub profanity: ProfanityConfig,
}

// Default derived via field defaults

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Redis validation
        if self.redis.enabled && self.redis.url.is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        // Cache validation
        if self.cache.recency_capacity == 0 {
            return Err("cache.recency_capacity must be > 0".into());
        }
        if self.cache.entity_ttl_secs == 0 || self.cache.list_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        // Warmer validation
        if self.warmer.period_secs == 0 {
            return Err("warmer.period_secs must be > 0".into());
        }
        if self.warmer.ttl_secs <= self.warmer.period_secs {
            return Err("warmer.ttl_secs must be greater than warmer.period_secs".into());
        }
        if self.warmer.windows.is_empty() {
            return Err("warmer.windows must not be empty".into());
        }
        if self.warmer.windows.contains(&0) {
            return Err("warmer.windows sizes must be > 0".into());
        }
        if !(1..=MAX_SINCE_DAYS).contains(&self.warmer.since_days) {
            return Err(format!("warmer.since_days must be between 1 and {MAX_SINCE_DAYS}"));
        }
        if self.warmer.prefill_entities && self.warmer.prefill_period_secs == 0 {
            return Err("warmer.prefill_period_secs must be > 0".into());
        }
        // Profanity validation
        if self.profanity.timeout_ms == 0 {
            return Err("profanity.timeout_ms must be > 0".into());
        }
        if self.profanity.failure_threshold == 0 {
            return Err("profanity.failure_threshold must be > 0".into());
        }
        if self.profanity.half_open_probes == 0 {
            return Err("profanity.half_open_probes must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis configuration for horizontal scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (single instance, in-process cache)
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Single-entity TTL in seconds
    #[serde(default = "default_entity_ttl_secs")]
    pub entity_ttl_secs: u64,

    /// List window TTL in seconds
    #[serde(default = "default_list_ttl_secs")]
    pub list_ttl_secs: u64,

    /// Extra lifetime of stale copies; 0 disables stale fallback
    #[serde(default)]
    pub stale_ttl_secs: u64,

    /// Soft bound on tracked keys per namespace
    #[serde(default = "default_recency_capacity")]
    pub recency_capacity: usize,

    /// How often the local backend drops expired values
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_entity_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_list_ttl_secs() -> u64 {
    300
}

fn default_recency_capacity() -> usize {
    headlines_cache::DEFAULT_CAPACITY
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_ttl_secs: default_entity_ttl_secs(),
            list_ttl_secs: default_list_ttl_secs(),
            stale_ttl_secs: 0,
            recency_capacity: default_recency_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn entity_policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_secs(self.entity_ttl_secs))
            .with_stale(Duration::from_secs(self.stale_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn list_policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_secs(self.list_ttl_secs))
            .with_stale(Duration::from_secs(self.stale_ttl_secs))
    }
}

/// Cache warmer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_warmer_initial_delay_secs")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_warmer_period_secs")]
    pub period_secs: u64,

    /// TTL of warmed lists; must exceed the period
    #[serde(default = "default_warmer_ttl_secs")]
    pub ttl_secs: u64,

    /// Sizes of the "latest N" windows kept warm
    #[serde(default = "default_warmer_windows")]
    pub windows: Vec<usize>,

    /// Lookback of warmed windows in days
    #[serde(default = "default_warmer_since_days")]
    pub since_days: i64,

    /// Also cache every entity of the lookback under its own key
    #[serde(default)]
    pub prefill_entities: bool,

    #[serde(default = "default_prefill_ttl_secs")]
    pub prefill_ttl_secs: u64,

    /// Time between prefill passes
    #[serde(default = "default_prefill_period_secs")]
    pub prefill_period_secs: u64,
}

/// Longest accepted lookback (100 years).
const MAX_SINCE_DAYS: i64 = 36_500;

fn default_true() -> bool {
    true
}
fn default_warmer_initial_delay_secs() -> u64 {
    5
}
fn default_warmer_period_secs() -> u64 {
    120
}
fn default_warmer_ttl_secs() -> u64 {
    1800
}
fn default_warmer_windows() -> Vec<usize> {
    vec![5, 10, 20]
}
fn default_warmer_since_days() -> i64 {
    14
}
fn default_prefill_ttl_secs() -> u64 {
    14 * 24 * 3600
}
fn default_prefill_period_secs() -> u64 {
    600
}

impl Default for WarmerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_secs: default_warmer_initial_delay_secs(),
            period_secs: default_warmer_period_secs(),
            ttl_secs: default_warmer_ttl_secs(),
            windows: default_warmer_windows(),
            since_days: default_warmer_since_days(),
            prefill_entities: false,
            prefill_ttl_secs: default_prefill_ttl_secs(),
            prefill_period_secs: default_prefill_period_secs(),
        }
    }
}

impl WarmerSettings {
    /// Window shape of a warmed "latest N" list. Request handlers use the same
    /// shape so they read what the warmer writes.
    pub fn latest_window(&self, top: usize) -> WindowQuery {
        WindowQuery::top(top).with_since(time::Duration::days(self.since_days))
    }

    pub fn to_warmer_config(&self) -> WarmerConfig {
        WarmerConfig {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            period: Duration::from_secs(self.period_secs),
            ttl: Duration::from_secs(self.ttl_secs),
            windows: self
                .windows
                .iter()
                .map(|&top| self.latest_window(top))
                .collect(),
            prefill: self.prefill_entities.then(|| PrefillConfig {
                window: WindowQuery::new().with_since(time::Duration::days(self.since_days)),
                ttl: Duration::from_secs(self.prefill_ttl_secs),
                period: Duration::from_secs(self.prefill_period_secs),
            }),
        }
    }
}

/// What to do when the profanity service is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Check against the last known word list
    #[default]
    LocalList,
    /// Fail the request
    Reject,
    /// Treat the text as clean
    Allow,
}

/// Profanity service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfanityConfig {
    #[serde(default = "default_profanity_base_url")]
    pub base_url: String,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_profanity_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_profanity_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_profanity_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_profanity_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_profanity_cool_down_secs")]
    pub cool_down_secs: u64,

    #[serde(default = "default_profanity_half_open_probes")]
    pub half_open_probes: u32,

    #[serde(default)]
    pub fallback: FallbackPolicy,

    /// Comma-separated seed for the local word list
    #[serde(default = "default_profanity_fallback_words")]
    pub fallback_words: String,
}

fn default_profanity_base_url() -> String {
    "http://profanity-service:8080".into()
}
fn default_profanity_timeout_ms() -> u64 {
    2000
}
fn default_profanity_max_retries() -> u32 {
    3
}
fn default_profanity_backoff_base_ms() -> u64 {
    100
}
fn default_profanity_failure_threshold() -> u32 {
    3
}
fn default_profanity_cool_down_secs() -> u64 {
    20
}
fn default_profanity_half_open_probes() -> u32 {
    1
}
fn default_profanity_fallback_words() -> String {
    "bad,ugly,stupid".into()
}

impl Default for ProfanityConfig {
    fn default() -> Self {
        Self {
            base_url: default_profanity_base_url(),
            timeout_ms: default_profanity_timeout_ms(),
            max_retries: default_profanity_max_retries(),
            backoff_base_ms: default_profanity_backoff_base_ms(),
            failure_threshold: default_profanity_failure_threshold(),
            cool_down_secs: default_profanity_cool_down_secs(),
            half_open_probes: default_profanity_half_open_probes(),
            fallback: FallbackPolicy::default(),
            fallback_words: default_profanity_fallback_words(),
        }
    }
}

impl ProfanityConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_base_ms))
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cool_down: Duration::from_secs(self.cool_down_secs),
            half_open_probes: self.half_open_probes,
        }
    }

    pub fn seed_words(&self) -> Vec<String> {
        self.fallback_words
            .split(',')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File, FileFormat};
    use std::path::PathBuf;

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "headlines.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., HEADLINES__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("HEADLINES")
                .try_parsing(true)
                .separator("__"),
        );
        finish(builder)
    }

    /// Parses a TOML document without consulting the environment.
    pub fn load_config_from_str(toml: &str) -> Result<AppConfig, String> {
        finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<AppConfig, String> {
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::loader::load_config_from_str;
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cache.recency_capacity, 30);
        assert_eq!(cfg.warmer.windows, vec![5, 10, 20]);
        assert_eq!(cfg.profanity.fallback, FallbackPolicy::LocalList);
        assert_eq!(cfg.profanity.seed_words(), vec!["bad", "ugly", "stupid"]);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert!(!cfg.redis.enabled);
        assert_eq!(cfg.cache.entity_ttl_secs, 600);
    }

    #[test]
    fn test_sections_parse() {
        let cfg = load_config_from_str(
            r#"
[server]
port = 9090

[cache]
stale_ttl_secs = 3600
recency_capacity = 100

[warmer]
windows = [3, 7]
since_days = 7
prefill_entities = true

[profanity]
fallback = "reject"
max_retries = 1
"#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.cache.recency_capacity, 100);
        assert_eq!(
            cfg.cache.entity_policy().stale_ttl,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(cfg.profanity.fallback, FallbackPolicy::Reject);
        assert_eq!(cfg.profanity.retry_policy().attempts(), 2);

        let warmer = cfg.warmer.to_warmer_config();
        assert_eq!(warmer.windows.len(), 2);
        assert_eq!(warmer.windows[0].top, Some(3));
        assert_eq!(warmer.windows[0].since, Some(time::Duration::days(7)));
        let prefill = warmer.prefill.expect("prefill enabled");
        assert_eq!(prefill.period, Duration::from_secs(600));
    }

    #[test]
    fn test_validation_errors() {
        let err = load_config_from_str("[warmer]\nperiod_secs = 600\nttl_secs = 300\n").unwrap_err();
        assert!(err.contains("warmer.ttl_secs"));

        let err = load_config_from_str("[cache]\nrecency_capacity = 0\n").unwrap_err();
        assert!(err.contains("recency_capacity"));

        let err = load_config_from_str("[logging]\nlevel = \"loud\"\n").unwrap_err();
        assert!(err.contains("logging.level"));

        let err = load_config_from_str("[warmer]\nwindows = []\n").unwrap_err();
        assert!(err.contains("warmer.windows"));

        let err = load_config_from_str("[warmer]\nsince_days = 5000000\n").unwrap_err();
        assert!(err.contains("warmer.since_days"));

        let err = load_config_from_str("[warmer]\nsince_days = 0\n").unwrap_err();
        assert!(err.contains("warmer.since_days"));

        let err = load_config_from_str("[cache]\nsweep_interval_secs = 0\n").unwrap_err();
        assert!(err.contains("sweep_interval_secs"));
    }

    #[test]
    fn test_zero_stale_ttl_disables_stale() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.entity_policy().stale_ttl, None);
        assert_eq!(cfg.list_policy().ttl, Duration::from_secs(300));
    }
}
