//! Error taxonomy
//!
//! Validation and storage failures are typed so the HTTP layer can map each
//! one to a status code and a structured body. Configuration problems have
//! their own type because they only ever surface at startup.

use serde::Serialize;
use thiserror::Error;

/// Failures a request can run into
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("missing message")]
    MissingMessage,

    #[error("missing field: {field}")]
    MissingField { field: String },

    #[error("field `{field}` must be numeric")]
    NonNumeric { field: String },

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdvisorError {
    pub fn missing(field: impl Into<String>) -> Self {
        AdvisorError::MissingField { field: field.into() }
    }

    pub fn non_numeric(field: impl Into<String>) -> Self {
        AdvisorError::NonNumeric { field: field.into() }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AdvisorError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for caller mistakes (4xx), false for internal faults
    pub fn is_validation(&self) -> bool {
        !matches!(self, AdvisorError::Store(_))
    }

    /// The offending input field, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            AdvisorError::MissingMessage => Some("message"),
            AdvisorError::MissingField { field }
            | AdvisorError::NonNumeric { field }
            | AdvisorError::InvalidField { field, .. } => Some(field),
            AdvisorError::Store(_) => None,
        }
    }

    /// User-presentable body. Storage details stay in the logs.
    pub fn to_body(&self) -> ErrorBody {
        let error = match self {
            AdvisorError::Store(_) => "storage failure".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error,
            field: self.field().map(String::from),
        }
    }
}

/// Structured error object returned to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Failures inside a user store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt stored state: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Problems found while validating configuration at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("topic `{0}` has no response templates")]
    EmptyTemplates(String),

    #[error("intent rule for `{0}` has no keywords")]
    EmptyKeywords(String),

    #[error("feature `{0}` is declared more than once")]
    DuplicateFeature(String),

    #[error("{context} references unknown feature `{feature}`")]
    UnknownFeature { context: String, feature: String },

    #[error("model file not found: {0}")]
    ModelMissing(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("could not parse configuration: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_message_body() {
        let body = AdvisorError::MissingMessage.to_body();
        assert_eq!(body.error, "missing message");
        assert_eq!(body.field.as_deref(), Some("message"));
    }

    #[test]
    fn test_field_errors_name_the_field() {
        let err = AdvisorError::non_numeric("stress_level");
        assert!(err.is_validation());
        assert_eq!(err.field(), Some("stress_level"));
        assert_eq!(err.to_string(), "field `stress_level` must be numeric");
    }

    #[test]
    fn test_store_errors_hide_details() {
        let err = AdvisorError::from(StoreError::Corrupt("row 7: bad json".into()));
        assert!(!err.is_validation());
        let body = err.to_body();
        assert_eq!(body.error, "storage failure");
        assert!(body.field.is_none());
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"storage failure"}"#);
    }
}
