//! Configuration loading, config file resolution and validation
//!
//! Configuration is a single TOML file. Every section is optional; a gate
//! whose settings are absent (or zero) is disabled. The file is validated
//! once at startup so that bad windows or negative limits are reported
//! immediately instead of surfacing mid-pipeline.
//!
//! ```toml
//! [queue]
//! capacity = 16
//! drop_policy = "lowest"
//!
//! [quiet_hours]
//! windows = [{ start = "22:00", end = "07:00" }]
//!
//! [events.stop]
//! cooldown_secs = 5
//! burst = { limit = 3, window_secs = 10, lockout_secs = 15 }
//! dedup_window_secs = 2
//! ```

use crate::{Error, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::time::secs_to_duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CHIME_CONFIG";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub player: PlayerConfig,
    pub queue: QueueConfig,
    pub quiet_hours: QuietHoursConfig,
    pub global: GlobalLimits,
    /// Policy for event types without their own `[events.<type>]` entry
    pub defaults: EventPolicy,
    /// Per-type policies; an entry replaces `defaults` entirely
    pub events: HashMap<String, EventPolicy>,
    /// Interval of the aggregation/dedup sweeper
    pub sweep_interval_ms: u64,
    /// Audit bus buffer size
    pub audit_capacity: usize,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            player: PlayerConfig::default(),
            queue: QueueConfig::default(),
            quiet_hours: QuietHoursConfig::default(),
            global: GlobalLimits::default(),
            defaults: EventPolicy::default(),
            events: HashMap::new(),
            sweep_interval_ms: 250,
            audit_capacity: 1024,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5741,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Quota persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `<data dir>/chime/chime.db`
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("chime").join("chime.db"))
            .unwrap_or_else(|| PathBuf::from("./chime_data/chime.db"))
    }
}

/// External player command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Program to run for each sound
    pub command: String,
    /// Arguments; `{path}` and `{volume}` are substituted
    pub args: Vec<String>,
    /// Directory holding `bundled:` sounds
    pub sounds_dir: Option<PathBuf>,
    /// Kill the player process when its dispatch is abandoned
    pub kill_on_timeout: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let (command, args) = if cfg!(target_os = "macos") {
            ("afplay", vec!["-v", "{volume}", "{path}"])
        } else if cfg!(target_os = "windows") {
            ("powershell", vec!["-c", "(New-Object Media.SoundPlayer '{path}').PlaySync()"])
        } else {
            ("paplay", vec!["{path}"])
        };
        Self {
            command: command.to_string(),
            args: args.into_iter().map(String::from).collect(),
            sounds_dir: None,
            kill_on_timeout: false,
        }
    }
}

impl PlayerConfig {
    pub fn resolved_sounds_dir(&self) -> PathBuf {
        if let Some(dir) = &self.sounds_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("chime").join("sounds"))
            .unwrap_or_else(|| PathBuf::from("./sounds"))
    }
}

/// Queue-full drop policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    /// Evict the longest-waiting item
    #[default]
    Oldest,
    /// Evict the lowest-priority item, oldest first among equals
    Lowest,
    /// Refuse the incoming item
    RejectNew,
}

impl std::fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropPolicy::Oldest => write!(f, "oldest"),
            DropPolicy::Lowest => write!(f, "lowest"),
            DropPolicy::RejectNew => write!(f, "reject-new"),
        }
    }
}

/// What a Critical arrival does to a lower-priority dispatch in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreemptionMode {
    /// Critical items simply sort first
    Off,
    /// Skip the post-dispatch gap so the Critical item plays next
    #[default]
    Queue,
    /// Also abandon the in-flight play call
    Interrupt,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub drop_policy: DropPolicy,
    pub dispatch_timeout_secs: f64,
    /// Pause between consecutive sounds
    pub gap_ms: u64,
    pub preemption: PreemptionMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            drop_policy: DropPolicy::Oldest,
            dispatch_timeout_secs: 30.0,
            gap_ms: 0,
            preemption: PreemptionMode::Queue,
        }
    }
}

impl QueueConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        secs_to_duration(self.dispatch_timeout_secs)
    }

    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.gap_ms)
    }
}

/// One local-time suppression window, `HH:MM` to `HH:MM`
///
/// A window whose end is earlier than its start wraps over midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    pub start: String,
    pub end: String,
}

impl QuietWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn parse(&self) -> Result<(NaiveTime, NaiveTime)> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| {
                Error::Config(format!("invalid quiet-hours time '{}': {}", s, e))
            })
        };
        Ok((parse(&self.start)?, parse(&self.end)?))
    }
}

/// Quiet hours configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHoursConfig {
    pub windows: Vec<QuietWindow>,
    /// Let Critical events through during quiet hours
    pub critical_override: bool,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            critical_override: true,
        }
    }
}

/// Token bucket parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

/// Burst detection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Maximum arrivals inside the trailing window
    pub limit: u32,
    pub window_secs: f64,
    /// Lockout entered once the limit is exceeded
    pub lockout_secs: f64,
}

impl BurstConfig {
    pub fn window(&self) -> Duration {
        secs_to_duration(self.window_secs)
    }

    pub fn lockout(&self) -> Duration {
        secs_to_duration(self.lockout_secs)
    }
}

/// Per-period caps; `None` means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
    pub weekly: Option<u32>,
}

impl QuotaConfig {
    pub fn is_unlimited(&self) -> bool {
        self.hourly.is_none() && self.daily.is_none() && self.weekly.is_none()
    }
}

/// Aggregation (coalescing) parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Flush once this many events are buffered
    pub max_count: usize,
    /// Flush this long after the most recent buffered arrival
    pub flush_after_secs: f64,
}

impl AggregationConfig {
    pub fn flush_after(&self) -> Duration {
        secs_to_duration(self.flush_after_secs)
    }
}

/// Admission policy for one event type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPolicy {
    pub cooldown_secs: f64,
    pub burst: Option<BurstConfig>,
    pub rate_limit: Option<TokenBucketConfig>,
    pub quota: QuotaConfig,
    pub dedup_window_secs: f64,
    pub aggregation: Option<AggregationConfig>,
}

impl EventPolicy {
    pub fn cooldown(&self) -> Duration {
        secs_to_duration(self.cooldown_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        secs_to_duration(self.dedup_window_secs)
    }

    fn validate(&self, scope: &str) -> Result<()> {
        check_secs(scope, "cooldown_secs", self.cooldown_secs)?;
        check_secs(scope, "dedup_window_secs", self.dedup_window_secs)?;

        if let Some(burst) = &self.burst {
            if burst.limit == 0 {
                return Err(config_err(scope, "burst.limit must be at least 1"));
            }
            check_secs(scope, "burst.window_secs", burst.window_secs)?;
            check_secs(scope, "burst.lockout_secs", burst.lockout_secs)?;
            if burst.window_secs <= 0.0 {
                return Err(config_err(scope, "burst.window_secs must be positive"));
            }
        }

        if let Some(bucket) = &self.rate_limit {
            validate_bucket(scope, bucket)?;
        }

        if let Some(agg) = &self.aggregation {
            if agg.max_count == 0 {
                return Err(config_err(scope, "aggregation.max_count must be at least 1"));
            }
            check_secs(scope, "aggregation.flush_after_secs", agg.flush_after_secs)?;
        }

        Ok(())
    }
}

/// Limits shared by every event type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLimits {
    pub rate_limit: Option<TokenBucketConfig>,
    pub quota: QuotaConfig,
}

fn config_err(scope: &str, msg: &str) -> Error {
    Error::Config(format!("{}: {}", scope, msg))
}

fn check_secs(scope: &str, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(config_err(
            scope,
            &format!("{} must be a non-negative number, got {}", field, value),
        ));
    }
    Ok(())
}

fn validate_bucket(scope: &str, bucket: &TokenBucketConfig) -> Result<()> {
    if bucket.capacity == 0 {
        return Err(config_err(scope, "rate_limit.capacity must be at least 1"));
    }
    check_secs(scope, "rate_limit.refill_per_sec", bucket.refill_per_sec)
}

impl ChimeConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ChimeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to built-in defaults
    ///
    /// Resolution order:
    /// 1. Explicit path (command line)
    /// 2. `CHIME_CONFIG` environment variable
    /// 3. `<user config dir>/chime/config.toml`
    /// 4. `/etc/chime/config.toml`
    /// 5. Built-in defaults
    ///
    /// An explicitly named file that does not exist is an error; a missing
    /// file found by search is not.
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        if let Some(path) = explicit {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            info!("Loading configuration from {}", path.display());
            return Ok((Self::from_toml_str(&text)?, Some(path)));
        }

        for candidate in default_config_locations() {
            if candidate.exists() {
                info!("Loading configuration from {}", candidate.display());
                let text = std::fs::read_to_string(&candidate)?;
                return Ok((Self::from_toml_str(&text)?, Some(candidate)));
            }
        }

        warn!("No configuration file found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok((config, None))
    }

    /// Policy in force for `event_type`
    pub fn policy_for(&self, event_type: &str) -> &EventPolicy {
        self.events.get(event_type).unwrap_or(&self.defaults)
    }

    /// Check every limit and window once, up front
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(Error::Config("queue.capacity must be at least 1".to_string()));
        }
        check_secs("queue", "dispatch_timeout_secs", self.queue.dispatch_timeout_secs)?;
        if self.queue.dispatch_timeout_secs <= 0.0 {
            return Err(Error::Config(
                "queue.dispatch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::Config("sweep_interval_ms must be positive".to_string()));
        }
        if self.audit_capacity == 0 {
            return Err(Error::Config("audit_capacity must be at least 1".to_string()));
        }

        for window in &self.quiet_hours.windows {
            let (start, end) = window.parse()?;
            if start == end {
                return Err(Error::Config(format!(
                    "quiet-hours window {}-{} is empty",
                    window.start, window.end
                )));
            }
        }

        if let Some(bucket) = &self.global.rate_limit {
            validate_bucket("global", bucket)?;
        }

        self.defaults.validate("defaults")?;
        for (event_type, policy) in &self.events {
            if event_type.trim().is_empty() {
                return Err(Error::Config("event type names cannot be empty".to_string()));
            }
            policy.validate(&format!("events.{}", event_type))?;
        }

        Ok(())
    }
}

/// Platform config file search path
fn default_config_locations() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("chime").join("config.toml"));
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/etc/chime/config.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const SAMPLE: &str = r#"
sweep_interval_ms = 100

[queue]
capacity = 4
drop_policy = "reject-new"
dispatch_timeout_secs = 10
preemption = "interrupt"

[quiet_hours]
windows = [{ start = "22:00", end = "07:00" }]
critical_override = false

[global]
rate_limit = { capacity = 10, refill_per_sec = 0.5 }
quota = { daily = 200 }

[defaults]
cooldown_secs = 1

[events.stop]
cooldown_secs = 5
burst = { limit = 3, window_secs = 10, lockout_secs = 15 }
dedup_window_secs = 2

[events.build]
aggregation = { max_count = 5, flush_after_secs = 3 }
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = ChimeConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.queue.capacity, 4);
        assert_eq!(config.queue.drop_policy, DropPolicy::RejectNew);
        assert_eq!(config.queue.preemption, PreemptionMode::Interrupt);
        assert!(!config.quiet_hours.critical_override);
        assert_eq!(config.global.quota.daily, Some(200));
        assert_eq!(config.global.rate_limit.unwrap().capacity, 10);

        let stop = config.policy_for("stop");
        assert_eq!(stop.cooldown(), Duration::from_secs(5));
        assert_eq!(stop.burst.unwrap().limit, 3);
        assert_eq!(stop.dedup_window(), Duration::from_secs(2));

        let build = config.policy_for("build");
        assert_eq!(build.aggregation.unwrap().max_count, 5);
    }

    #[test]
    fn test_unknown_event_type_uses_defaults() {
        let config = ChimeConfig::from_toml_str(SAMPLE).unwrap();
        let policy = config.policy_for("permission_prompt");
        assert_eq!(policy.cooldown(), Duration::from_secs(1));
        assert!(policy.burst.is_none());
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = ChimeConfig::from_toml_str("").unwrap();
        assert_eq!(config.queue.capacity, 32);
        assert_eq!(config.queue.drop_policy, DropPolicy::Oldest);
        assert!(config.quiet_hours.windows.is_empty());
        assert!(config.defaults.quota.is_unlimited());
    }

    #[test]
    fn test_rejects_negative_cooldown() {
        let err = ChimeConfig::from_toml_str("[events.stop]\ncooldown_secs = -1").unwrap_err();
        assert!(err.to_string().contains("events.stop"));
    }

    #[test]
    fn test_rejects_zero_burst_limit() {
        let text = "[defaults]\nburst = { limit = 0, window_secs = 10, lockout_secs = 5 }";
        assert!(ChimeConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_rejects_bad_quiet_hours() {
        let text = "[quiet_hours]\nwindows = [{ start = \"25:00\", end = \"07:00\" }]";
        assert!(ChimeConfig::from_toml_str(text).is_err());

        let text = "[quiet_hours]\nwindows = [{ start = \"07:00\", end = \"07:00\" }]";
        assert!(ChimeConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_rejects_zero_capacity_queue_and_bucket() {
        assert!(ChimeConfig::from_toml_str("[queue]\ncapacity = 0").is_err());
        let text = "[global]\nrate_limit = { capacity = 0, refill_per_sec = 1 }";
        assert!(ChimeConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_rejects_unknown_drop_policy() {
        assert!(ChimeConfig::from_toml_str("[queue]\ndrop_policy = \"random\"").is_err());
    }

    #[test]
    #[serial]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let (config, path) = ChimeConfig::load(Some(file.path())).unwrap();
        assert_eq!(path.as_deref(), Some(file.path()));
        assert_eq!(config.queue.capacity, 4);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_path_is_error() {
        let result = ChimeConfig::load(Some(Path::new("/nonexistent/chime.toml")));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env_var() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[queue]\ncapacity = 7\n").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, file.path());
        let result = ChimeConfig::load(None);
        std::env::remove_var(CONFIG_ENV_VAR);

        let (config, _) = result.unwrap();
        assert_eq!(config.queue.capacity, 7);
    }
}
