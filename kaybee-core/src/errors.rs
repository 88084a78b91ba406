//! Crate-wide error taxonomy. One enum, one `error_code()` per variant, the
//! same shape used throughout this codebase's storage and workspace error types.

use crate::model::Violation;

#[derive(Debug, thiserror::Error)]
pub enum KaybeeError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("type in use, cannot remove: {0}")]
    TypeInUse(String),

    #[error("store mode mismatch: opened as {requested}, store was created as {stamped}")]
    ModeMismatch { requested: String, stamped: String },

    #[error("validation failed with {} violation(s)", .0.len())]
    Validation(Vec<Violation>),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("json encode/decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KaybeeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::IllegalArgument(_) => "ILLEGAL_ARGUMENT",
            Self::TypeInUse(_) => "TYPE_IN_USE",
            Self::ModeMismatch { .. } => "MODE_MISMATCH",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::ConfigParse(_) => "CONFIG_PARSE_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    pub fn validation(violations: Vec<Violation>) -> Self {
        Self::Validation(violations)
    }
}

pub type KaybeeResult<T> = Result<T, KaybeeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_carries_all_violations() {
        let violations = vec![
            Violation { node: "a".into(), rule: "r1".into(), message: "m1".into() },
            Violation { node: "a".into(), rule: "r2".into(), message: "m2".into() },
        ];
        let err = KaybeeError::validation(violations);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        match err {
            KaybeeError::Validation(v) => assert_eq!(v.len(), 2),
            _ => panic!("expected Validation variant"),
        }
    }
}
