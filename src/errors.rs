use std::fmt;

use thiserror::Error;

/// A single configuration problem found while walking a plan document.
///
/// The parser never stops at the first problem; it collects one of these per
/// offending node and keeps going so the user sees everything in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub path: String,
    pub message: String,
}

impl ParseError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error-puntgun-parse-1 {}: {}", self.path, self.message)
    }
}

impl std::error::Error for ParseError {}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("error-puntgun-settings-1 Settings file could not be read: {path}: {details}")]
    Unreadable { path: String, details: String },

    #[error("error-puntgun-settings-2 Settings file is not valid YAML: {path}: {details}")]
    Malformed { path: String, details: String },

    #[error("error-puntgun-settings-3 Invalid value for {key}: {value}: {details}")]
    InvalidValue {
        key: String,
        value: String,
        details: String,
    },

    #[error("error-puntgun-settings-4 Unknown settings key: {key}")]
    UnknownKey { key: String },

    #[error("error-puntgun-settings-5 Version not available")]
    VersionNotAvailable,
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("error-puntgun-secret-1 Secrets file could not be read: {path}: {details}")]
    Unreadable { path: String, details: String },

    #[error("error-puntgun-secret-2 Secrets file is not valid YAML: {path}: {details}")]
    Malformed { path: String, details: String },

    #[error("error-puntgun-secret-3 Missing secret: {name}")]
    Missing { name: String },
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// A caller broke an operation's contract, e.g. passed more than 100 ids.
    #[error("error-puntgun-client-1 Invalid argument for {operation}: {details}")]
    InvalidArgument { operation: String, details: String },

    /// Unrecoverable transport or protocol failure. Fatal for the run.
    #[error("error-puntgun-client-2 Platform call failed: {operation}: {details}")]
    Failure { operation: String, details: String },

    #[error("error-puntgun-client-3 Platform response could not be decoded: {operation}: {details}")]
    Decode { operation: String, details: String },
}

impl ClientError {
    pub(crate) fn failure(operation: &str, details: impl fmt::Display) -> Self {
        Self::Failure {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("error-puntgun-registry-1 Keyword registered twice in {family} rules: {keyword}")]
    KeywordCollision { family: String, keyword: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// A rule's own evaluation logic failed. Surfaced as a false result.
    #[error("error-puntgun-engine-1 Rule evaluation failed: {keyword} at {path}: {details}")]
    RuleFailed {
        keyword: String,
        path: String,
        details: String,
    },

    /// The platform client failed underneath a rule. Fatal for the run.
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("error-puntgun-report-1 Report I/O failed: {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error-puntgun-report-2 Record serialization failed: {data_type}: {source}")]
    Serialize {
        data_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("error-puntgun-report-3 Record has type {actual}, expected {expected}")]
    RecordTypeMismatch { expected: String, actual: String },

    #[error("error-puntgun-report-4 Record data could not be decoded: {data_type}: {source}")]
    Deserialize {
        data_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("error-puntgun-report-5 Report could not be loaded: {}", .attempts.join("; "))]
    Unloadable { attempts: Vec<String> },

    #[error("error-puntgun-report-6 Report writer is already closed")]
    Closed,
}

/// Fatal outcomes of a run. Every variant maps to a non-zero exit code.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("error-puntgun-run-1 Plan configuration has {} error(s)", .0.len())]
    Config(Vec<ParseError>),

    #[error("error-puntgun-run-2 Plan file could not be read: {path}: {details}")]
    PlanFile { path: String, details: String },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("error-puntgun-run-3 Interrupted by user")]
    Interrupted,
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::PlanFile { .. } => 1,
            RunError::Interrupted => 130,
            _ => 2,
        }
    }
}
