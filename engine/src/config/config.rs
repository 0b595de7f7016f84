use crate::identity::KeyIdentity;
use serde::Deserialize;
use shared::constants::DEFAULT_FLUSH_SECONDS;
use shared::errors::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full overlay configuration, loaded from TOML.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Hive files backing the overlay
    pub hives: HivesConfig,
    /// Periodic save of the Diff hive
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Hive section `[hives]`.
#[derive(Debug, Deserialize, Clone)]
pub struct HivesConfig {
    /// Mutable hive, created on first use
    pub diff: PathBuf,
    /// Optional read-only snapshot; a missing file means no base store
    pub base: Option<PathBuf>,
}

/// Flush section `[flush]`.
#[derive(Debug, Deserialize, Clone)]
pub struct FlushConfig {
    /// Humantime duration between saves, e.g. `"30s"` or `"2m"`
    pub interval: String,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: format!("{DEFAULT_FLUSH_SECONDS}s"),
        }
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.interval).map_err(|e| {
            ConfigError::Validation(format!("flush.interval `{}`: {e}", self.interval))
        })
    }
}

/// Log verbosity (lowercase in TOML).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Logging section `[logging]`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Append-mode log file; stderr when absent
    pub file: Option<PathBuf>,
}

/// Policy section `[policy]`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyConfig {
    /// Extra key prefixes forced to the live registry, e.g. `HKCU\Software\Policies`
    #[serde(default)]
    pub system_keys: Vec<String>,
}

impl PolicyConfig {
    pub fn system_key_identities(&self) -> Result<Vec<KeyIdentity>, ConfigError> {
        self.system_keys
            .iter()
            .map(|path| KeyIdentity::parse(path).ok_or_else(|| ConfigError::KeyPath(path.clone())))
            .collect()
    }
}

impl Config {
    /// Load, parse, and validate a `Config` from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&s)
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hives.diff.as_os_str().is_empty() {
            return Err(ConfigError::Validation("hives.diff must not be empty".into()));
        }
        if self.hives.base.as_ref() == Some(&self.hives.diff) {
            return Err(ConfigError::Validation(
                "hives.base and hives.diff must be different files".into(),
            ));
        }
        if self.flush.interval()?.is_zero() {
            return Err(ConfigError::Validation("flush.interval must be > 0".into()));
        }
        self.policy.system_key_identities()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    [hives]
    diff = "sandbox/diff.hive"
    base = "sandbox/base.hive"

    [flush]
    interval = "2m"

    [logging]
    level = "debug"
    file  = "logs/regoverlay.log"

    [policy]
    system_keys = ["HKEY_CURRENT_USER\\Software\\Policies", "HKLM\\SOFTWARE\\Policies"]
    "#;

    #[test]
    fn parse_full_config() {
        let cfg = Config::parse(SAMPLE).expect("should parse full sample");

        assert_eq!(cfg.hives.diff, PathBuf::from("sandbox/diff.hive"));
        assert_eq!(cfg.hives.base, Some(PathBuf::from("sandbox/base.hive")));
        assert_eq!(cfg.flush.interval().unwrap(), Duration::from_secs(120));
        assert_eq!(cfg.logging.level, LogLevel::Debug);
        assert_eq!(cfg.logging.file, Some(PathBuf::from("logs/regoverlay.log")));

        let keys = cfg.policy.system_key_identities().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], KeyIdentity::parse(r"HKCU\Software\Policies").unwrap());
    }

    #[test]
    fn defaults_apply_to_optional_sections() {
        let cfg = Config::parse("[hives]\ndiff = \"diff.hive\"\n").unwrap();
        assert!(cfg.hives.base.is_none());
        assert_eq!(
            cfg.flush.interval().unwrap(),
            Duration::from_secs(DEFAULT_FLUSH_SECONDS)
        );
        assert_eq!(cfg.logging.level, LogLevel::Info);
        assert!(cfg.policy.system_keys.is_empty());
    }

    #[test]
    fn missing_hives_section() {
        assert!(matches!(
            Config::parse("[flush]\ninterval = \"1s\"\n").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn invalid_log_level() {
        let toml = "[hives]\ndiff = \"d.hive\"\n[logging]\nlevel = \"loud\"\n";
        assert!(matches!(Config::parse(toml).unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn same_file_for_both_hives() {
        let toml = "[hives]\ndiff = \"x.hive\"\nbase = \"x.hive\"\n";
        assert!(matches!(Config::parse(toml).unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn zero_or_garbage_interval() {
        let zero = "[hives]\ndiff = \"d.hive\"\n[flush]\ninterval = \"0s\"\n";
        assert!(matches!(Config::parse(zero).unwrap_err(), ConfigError::Validation(_)));
        let garbage = "[hives]\ndiff = \"d.hive\"\n[flush]\ninterval = \"soon\"\n";
        assert!(matches!(Config::parse(garbage).unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn empty_diff_path() {
        let toml = "[hives]\ndiff = \"\"\n";
        assert!(matches!(Config::parse(toml).unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn unknown_root_in_system_keys() {
        let toml = "[hives]\ndiff = \"d.hive\"\n[policy]\nsystem_keys = [\"HKEY_NOWHERE\\\\X\"]\n";
        assert!(matches!(Config::parse(toml).unwrap_err(), ConfigError::KeyPath(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
