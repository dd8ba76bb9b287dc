use std::{fmt, io, path::StripPrefixError};

use http::status::StatusCode;
use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use thiserror::Error;
use tokio::{sync::mpsc::error::SendError as TokioSendError, task::JoinError};
use url::ParseError as UrlParseError;

#[cfg(feature = "service")]
use sqlx::Error as SqlxError;

use crate::event::BatchEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum TrellisError {
    #[error("Content cache error: {0}")]
    Cache(String),
    #[error("Markup codec software error: {0}")]
    Codec(String),
    #[error("Invalid Command: {0}")]
    Command(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Link store error: {0}")]
    Store(String),
    #[error("Deadline elapsed: {0}")]
    Timeout(String),
    #[error("Worker failure: {0}")]
    Worker(String),
}

impl TrellisError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TrellisError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrellisError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrellisError::Command(_) => StatusCode::BAD_REQUEST,
            TrellisError::Custom(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrellisError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrellisError::NotFound(_) => StatusCode::NOT_FOUND,
            TrellisError::PermissionDenied => StatusCode::FORBIDDEN,
            TrellisError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrellisError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrellisError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TrellisError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failures worth another attempt inside a batch run. Input-shaped errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TrellisError::Worker(_) | TrellisError::Io(_) | TrellisError::Store(_)
        )
    }
}

impl From<StripPrefixError> for TrellisError {
    fn from(src: StripPrefixError) -> TrellisError {
        TrellisError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for TrellisError {
    fn from(src: toml::de::Error) -> TrellisError {
        TrellisError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for TrellisError {
    fn from(src: toml::ser::Error) -> TrellisError {
        TrellisError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for TrellisError {
    fn from(src: JsonError) -> TrellisError {
        TrellisError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<YamlError> for TrellisError {
    fn from(src: YamlError) -> TrellisError {
        TrellisError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<UrlParseError> for TrellisError {
    fn from(src: UrlParseError) -> TrellisError {
        TrellisError::Serialization(format!("Invalid URL: {src}"))
    }
}

impl From<io::Error> for TrellisError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => TrellisError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => TrellisError::PermissionDenied,
            _ => TrellisError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<walkdir::Error> for TrellisError {
    fn from(x: walkdir::Error) -> Self {
        match x.into_io_error() {
            Some(io_err) => TrellisError::from(io_err),
            None => TrellisError::Io("directory walk hit a filesystem loop".to_string()),
        }
    }
}

impl From<fmt::Error> for TrellisError {
    fn from(x: fmt::Error) -> Self {
        TrellisError::Codec(format!("{x}"))
    }
}

impl From<RegexError> for TrellisError {
    fn from(x: RegexError) -> Self {
        TrellisError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<JoinError> for TrellisError {
    fn from(x: JoinError) -> Self {
        if x.is_panic() {
            TrellisError::Worker(format!("worker panicked: {x}"))
        } else {
            TrellisError::Worker(format!("worker cancelled: {x}"))
        }
    }
}

impl From<TokioSendError<BatchEvent>> for TrellisError {
    fn from(x: TokioSendError<BatchEvent>) -> Self {
        TrellisError::Io(format!(
            "Channel update send Error, could not transmit batch event {:?}",
            x.0
        ))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for TrellisError {
    fn from(db_error: SqlxError) -> Self {
        match db_error {
            SqlxError::RowNotFound => TrellisError::NotFound("database row not found".to_string()),
            other => TrellisError::Store(format!("database error: {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn io_errors_map_by_kind() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(TrellisError::from(missing), TrellisError::NotFound(_)));
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(TrellisError::from(denied), TrellisError::PermissionDenied);
        let other = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(TrellisError::from(other).is_transient());
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            TrellisError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TrellisError::Command("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert!(!TrellisError::Command("x".into()).is_transient());
    }
}
