//! Domain error types.

use chrono::NaiveDate;

/// One missing or invalid configuration key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{section}] {key}: {reason}")]
pub struct ConfigIssue {
    pub section: String,
    pub key: String,
    pub reason: String,
}

impl ConfigIssue {
    pub fn missing(section: &str, key: &str) -> Self {
        Self {
            section: section.to_string(),
            key: key.to_string(),
            reason: "missing".to_string(),
        }
    }

    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        Self {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// All problems found while validating a configuration, reported together.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} config problem(s){}", .issues.len(), fmt_issues(.issues))]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

fn fmt_issues(issues: &[ConfigIssue]) -> String {
    issues.iter().map(|issue| format!("; {issue}")).collect()
}

impl ConfigError {
    pub fn single(issue: ConfigIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }

    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.section == section && i.key == key)
    }
}

/// Top-level error type for alphadesk.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("data error for {instrument}{}: {reason}", fmt_date(.date))]
    Data {
        instrument: String,
        date: Option<NaiveDate>,
        reason: String,
    },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("computation unavailable for {indicator}: {reason}")]
    Computation { indicator: String, reason: String },

    #[error("invalid engine state: {reason}")]
    InvalidState { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_date(date: &Option<NaiveDate>) -> String {
    match date {
        Some(d) => format!(" at {d}"),
        None => String::new(),
    }
}

impl CoreError {
    pub fn data(instrument: &str, date: Option<NaiveDate>, reason: impl Into<String>) -> Self {
        CoreError::Data {
            instrument: instrument.to_string(),
            date,
            reason: reason.into(),
        }
    }

    /// True for the run-level failures that abort a backtest.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::Computation { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<&CoreError> for std::process::ExitCode {
    fn from(err: &CoreError) -> Self {
        let code: u8 = match err {
            CoreError::Io(_) | CoreError::Serialization { .. } => 1,
            CoreError::Config(_) => 2,
            CoreError::Data { .. } => 5,
            CoreError::Computation { .. } | CoreError::InvalidState { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
