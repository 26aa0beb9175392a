use crate::constants::ENV_PREFIX;
use crate::errors::SettingsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

type Result<T> = std::result::Result<T, SettingsError>;

/// Keys accepted in the settings file and as `PUNTGUN_<KEY>` variables.
pub const SETTINGS_KEYS: &[&str] = &[
    "log_level",
    "log_rotation",
    "block_following",
    "block_follower",
    "max_slow_fan_out",
    "api_base",
    "report_directory",
    PASSWORD_PROMPT_KEY,
];

/// Only meaningful for ciphered secrets, which this build does not read.
/// Still accepted so existing settings files load.
const PASSWORD_PROMPT_KEY: &str = "read_password_from_stdin";

/// Verbosity of the tool's own logs.
///
/// Feeds the default `EnvFilter` directive; `RUST_LOG` still wins when set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = SettingsError;

    fn try_from(value: String) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(invalid("log_level", &value, "expected trace|debug|info|warn|error")),
        }
    }
}

/// Log rotation policy.
///
/// Rotation itself is handled outside the tool; the value is validated and
/// carried into the report meta so a run documents how it was configured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

impl TryFrom<String> for LogRotation {
    type Error = SettingsError;

    fn try_from(value: String) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "never" | "none" => Ok(Self::Never),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            _ => Err(invalid("log_rotation", &value, "expected never|hourly|daily")),
        }
    }
}

/// Upper bound on concurrently running slow filters inside one rule set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlowFanOut(usize);

impl Default for SlowFanOut {
    fn default() -> Self {
        Self(8)
    }
}

impl TryFrom<String> for SlowFanOut {
    type Error = SettingsError;

    fn try_from(value: String) -> Result<Self> {
        let size = value
            .trim()
            .parse::<usize>()
            .map_err(|e| invalid("max_slow_fan_out", &value, &e.to_string()))?;

        if size == 0 {
            return Err(invalid("max_slow_fan_out", &value, "must be greater than 0"));
        }

        Ok(Self(size))
    }
}

impl AsRef<usize> for SlowFanOut {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

/// Run-wide settings.
///
/// Precedence, lowest to highest: built-in defaults, the YAML settings file,
/// `PUNTGUN_`-prefixed environment variables.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Settings {
    pub log_level: LogLevel,
    pub log_rotation: LogRotation,
    /// Allow blocking accounts the authenticated account follows.
    pub block_following: bool,
    /// Allow blocking accounts that follow the authenticated account.
    pub block_follower: bool,
    pub max_slow_fan_out: SlowFanOut,
    pub api_base: String,
    pub report_directory: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_rotation: LogRotation::default(),
            block_following: false,
            block_follower: true,
            max_slow_fan_out: SlowFanOut::default(),
            api_base: "https://api.twitter.com/2".to_string(),
            report_directory: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| SettingsError::Unreadable {
                        path: path.display().to_string(),
                        details: e.to_string(),
                    })?;
                Some((path.display().to_string(), content))
            }
            None => None,
        };

        let env: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();

        Self::from_sources(
            file.as_ref().map(|(path, content)| (path.as_str(), content.as_str())),
            &env,
        )
    }

    /// Build settings from already-read sources.
    ///
    /// `file` is `(display path, YAML text)`. `env` maps full variable names
    /// (`PUNTGUN_LOG_LEVEL`) to values; unrelated variables are ignored.
    pub fn from_sources(file: Option<(&str, &str)>, env: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some((path, content)) = file {
            let values: HashMap<String, serde_yml::Value> = if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_yml::from_str(content).map_err(|e| SettingsError::Malformed {
                    path: path.to_string(),
                    details: e.to_string(),
                })?
            };

            for (key, value) in values {
                let text = scalar_to_string(&key, &value)?;
                settings.set(&key, text)?;
            }
        }

        for key in SETTINGS_KEYS {
            let variable = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Some(value) = env.get(&variable) {
                settings.set(key, value.clone())?;
            }
        }

        Ok(settings)
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "log_level" => self.log_level = LogLevel::try_from(value)?,
            "log_rotation" => self.log_rotation = LogRotation::try_from(value)?,
            "block_following" => self.block_following = parse_bool(key, &value)?,
            "block_follower" => self.block_follower = parse_bool(key, &value)?,
            "max_slow_fan_out" => self.max_slow_fan_out = SlowFanOut::try_from(value)?,
            "api_base" => {
                let trimmed = value.trim().trim_end_matches('/');
                if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                    return Err(invalid(key, &value, "must be an http(s) URL"));
                }
                self.api_base = trimmed.to_string();
            }
            "report_directory" => self.report_directory = PathBuf::from(value),
            PASSWORD_PROMPT_KEY => {
                parse_bool(key, &value)?;
                warn!(key, "Setting has no effect: only plain secrets are supported");
            }
            _ => {
                return Err(SettingsError::UnknownKey {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Default settings rendered as a YAML document, for `gen config`.
    pub fn default_yaml() -> String {
        serde_yml::to_string(&Self::default()).unwrap_or_default()
    }
}

fn scalar_to_string(key: &str, value: &serde_yml::Value) -> Result<String> {
    match value {
        serde_yml::Value::String(s) => Ok(s.clone()),
        serde_yml::Value::Bool(b) => Ok(b.to_string()),
        serde_yml::Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid(key, &format!("{:?}", other), "expected a scalar value")),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn invalid(key: &str, value: &str, details: &str) -> SettingsError {
    SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        details: details.to_string(),
    }
}

/// Retrieves the tool version from compile-time environment variables.
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(SettingsError::VersionNotAvailable)
}
