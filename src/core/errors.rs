// src/core/errors.rs

//! Defines the primary error type for the entire toolkit.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnvilError>;

/// Classification of a connectivity failure, derived by matching the
/// driver error's message against a fixed set of substrings (§4.A step 4).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    #[error("no route to host")]
    RouteUnreachable,
    #[error("no password supplied")]
    NoPasswordSupplied,
    #[error("password authentication failed")]
    PasswordRejected,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("name resolution failure")]
    NameResolutionFailure,
    #[error("peer advertises a mismatched Anvil version")]
    VersionMismatch,
    #[error("generic connection error")]
    Generic,
}

impl ConnectErrorKind {
    /// Classifies a driver error message by exact substring match, per §4.A step 4.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("no route to host") {
            Self::RouteUnreachable
        } else if lower.contains("no password supplied") {
            Self::NoPasswordSupplied
        } else if lower.contains("password authentication failed") {
            Self::PasswordRejected
        } else if lower.contains("connection refused") {
            Self::ConnectionRefused
        } else if lower.contains("could not translate host name")
            || lower.contains("name or service not known")
            || lower.contains("temporary failure in name resolution")
        {
            Self::NameResolutionFailure
        } else {
            Self::Generic
        }
    }
}

/// The main error enum, representing all possible failures within the toolkit.
#[derive(Error, Debug, Clone)]
pub enum AnvilError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("database error: {0}")]
    Db(Arc<sqlx::Error>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("failed to connect to peer '{peer}': {kind}")]
    Connect { peer: Uuid, kind: ConnectErrorKind },

    #[error("schema bootstrap failed for peer '{peer}'")]
    SchemaBootstrapFailed { peer: Uuid },

    #[error("no row found in '{table}' for uuid '{uuid}'")]
    RowNotFound { table: String, uuid: Uuid },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("no live peers remain in the connection pool")]
    NoLivePeers,

    #[error("lock error: {0}")]
    Lock(String),

    #[error("job error: {0}")]
    Job(String),

    #[error("collaborator command failed: {0}")]
    Collaborator(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AnvilError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<sqlx::Error> for AnvilError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(Arc::new(e))
    }
}

impl From<uuid::Error> for AnvilError {
    fn from(e: uuid::Error) -> Self {
        Self::InvalidUuid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_refused() {
        assert_eq!(
            ConnectErrorKind::classify("Connection refused (os error 111)"),
            ConnectErrorKind::ConnectionRefused
        );
    }

    #[test]
    fn classifies_password_rejected() {
        assert_eq!(
            ConnectErrorKind::classify("password authentication failed for user \"anvil\""),
            ConnectErrorKind::PasswordRejected
        );
    }

    #[test]
    fn classifies_name_resolution_failure() {
        assert_eq!(
            ConnectErrorKind::classify("could not translate host name \"bogus\" to address"),
            ConnectErrorKind::NameResolutionFailure
        );
    }

    #[test]
    fn falls_back_to_generic() {
        assert_eq!(
            ConnectErrorKind::classify("something unexpected happened"),
            ConnectErrorKind::Generic
        );
    }
}
