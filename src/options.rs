//! Compile-time defaults and the optional stage configuration file.
//!
//! All tunables have hardcoded defaults so a stage can be built with no
//! configuration at all. A versioned YAML file can override them; the
//! version field is probed first so newer files fail loudly instead of
//! silently misparsing.

use std::time::Duration;

use serde::Deserialize;

/// Stage name used when neither the environment nor the config names one.
pub const DEFAULT_STAGE_NAME: &str = "flowgate-stage";

/// Environment variable overriding the stage name.
pub const ENV_STAGE_NAME: &str = "FLOWGATE_STAGE_NAME";

/// Environment variable carrying the optional stage environment string.
pub const ENV_STAGE_ENV: &str = "FLOWGATE_STAGE_ENV";

/// Seed applied to every differentiation token hash.
pub const DEFAULT_TOKEN_SEED: u32 = 42;

/// Default channel differentiation classifiers: route by workflow only.
pub const DEFAULT_CHANNEL_CLASSIFIERS: (bool, bool, bool) = (true, false, false);

/// Default enforcement-object differentiation classifiers: none, so a
/// channel's default object catches every request.
pub const DEFAULT_OBJECT_CLASSIFIERS: (bool, bool) = (false, false);

/// Bounded wait used by completion-queue dequeues and worker loops before
/// re-checking the running/shutdown flags.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(2);

/// A waiting dequeue logs at debug level every this many timed-out retries.
pub const DEQUEUE_RETRY_LOG_INTERVAL: u32 = 64;

/// Capacity of a token bucket's statistics ring.
pub const DEFAULT_MAX_STATISTICS: usize = 100;

/// Sliding window applied by the statistics garbage collector.
pub const DEFAULT_GC_SLIDING_WINDOW_US: u64 = 5_000_000;

/// Statistic collection at rate limiters is disabled unless asked for.
pub const DEFAULT_COLLECT_STATISTICS: bool = false;

/// Default per-request token cost multiplier.
pub const DEFAULT_COST_PER_REQUEST: f64 = 1.0;

/// Default token-bucket refill period.
pub const DEFAULT_REFILL_PERIOD_US: u64 = 1_000_000;

/// Default token-bucket rate (tokens per refill period).
pub const DEFAULT_RATE: f64 = 10_000.0;

/// Default control-plane unix socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/flowgate.sock";

/// Default control-plane inet address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Default control-plane inet port.
pub const DEFAULT_PORT: i32 = 9860;

/// How long the southbound handler blocks on a header read before
/// re-checking the shutdown flag.
pub const SOUTHBOUND_READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub version: Option<i16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1 {
    pub stage_name: Option<String>,
    pub channels: Option<i64>,
    pub create_default_objects: Option<bool>,
    pub connection_type: Option<String>,
    pub connection_address: Option<String>,
    pub connection_port: Option<i32>,
    pub housekeeping_rules_file: Option<String>,
    pub differentiation_rules_file: Option<String>,
    pub enforcement_rules_file: Option<String>,
    #[serde(with = "humantime_serde", default)]
    pub southbound_read_timeout: Option<Duration>,
    pub debug: Option<bool>,
}

// Internal configuration used by the rest of the stage, decoupled from the
// on-disk layout so the file format can evolve without breaking callers.
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub stage_name: Option<String>,
    pub channels: i64,
    pub create_default_objects: bool,
    pub connection_type: Option<String>,
    pub connection_address: Option<String>,
    pub connection_port: Option<i32>,
    pub housekeeping_rules_file: Option<String>,
    pub differentiation_rules_file: Option<String>,
    pub enforcement_rules_file: Option<String>,
    pub southbound_read_timeout: Duration,
    pub debug: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        StageOptions {
            stage_name: None,
            channels: 0,
            create_default_objects: false,
            connection_type: None,
            connection_address: None,
            connection_port: None,
            housekeeping_rules_file: None,
            differentiation_rules_file: None,
            enforcement_rules_file: None,
            southbound_read_timeout: SOUTHBOUND_READ_TIMEOUT,
            debug: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported configuration version {0}")]
    UnsupportedVersion(i16),
}

impl StageOptions {
    /// Load options from a YAML file, falling back to defaults for every
    /// field the file leaves unset.
    pub fn from_file(path: &std::path::Path) -> Result<StageOptions, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let version: Version = serde_yaml::from_str(&raw)?;
        match version.version.unwrap_or(1) {
            1 => {
                let parsed: V1 = serde_yaml::from_str(&raw)?;
                let defaults = StageOptions::default();
                Ok(StageOptions {
                    stage_name: parsed.stage_name,
                    channels: parsed.channels.unwrap_or(defaults.channels),
                    create_default_objects: parsed
                        .create_default_objects
                        .unwrap_or(defaults.create_default_objects),
                    connection_type: parsed.connection_type,
                    connection_address: parsed.connection_address,
                    connection_port: parsed.connection_port,
                    housekeeping_rules_file: parsed.housekeeping_rules_file,
                    differentiation_rules_file: parsed.differentiation_rules_file,
                    enforcement_rules_file: parsed.enforcement_rules_file,
                    southbound_read_timeout: parsed
                        .southbound_read_timeout
                        .unwrap_or(defaults.southbound_read_timeout),
                    debug: parsed.debug.unwrap_or(defaults.debug),
                })
            }
            other => Err(ConfigError::UnsupportedVersion(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("flowgate-options-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write temp config");
        path
    }

    #[test]
    fn defaults_are_applied() {
        let path = write_temp("minimal", "version: 1\nstageName: bench\n");
        let options = StageOptions::from_file(&path).expect("parse config");
        assert_eq!(options.stage_name.as_deref(), Some("bench"));
        assert_eq!(options.channels, 0);
        assert_eq!(options.southbound_read_timeout, SOUTHBOUND_READ_TIMEOUT);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn durations_parse_humantime() {
        let path = write_temp("durations", "version: 1\nsouthboundReadTimeout: 250ms\n");
        let options = StageOptions::from_file(&path).expect("parse config");
        assert_eq!(options.southbound_read_timeout, Duration::from_millis(250));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn unknown_version_is_rejected() {
        let path = write_temp("badversion", "version: 9\n");
        assert!(matches!(
            StageOptions::from_file(&path),
            Err(ConfigError::UnsupportedVersion(9))
        ));
        std::fs::remove_file(path).ok();
    }
}
