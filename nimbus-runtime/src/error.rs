//! Runtime error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::retry::ErrorKind;

/// Boxed cause coming from a cloud client or other collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// External operation that failed, used to label provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
    ListKeys,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::ListKeys => "list keys of",
        };
        f.write_str(s)
    }
}

/// Errors returned by connecters, external clients, configurators and the
/// reconcilers driving them.
#[derive(Debug, Error)]
pub enum Error {
    /// A record of the wrong kind was handed to a component. Always a wiring bug.
    #[error("expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A record is absent from the store.
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Optimistic concurrency or uniqueness conflict in the store.
    #[error("conflict on {key}: {reason}")]
    Conflict { key: String, reason: String },

    /// A claim asks for something the provider cannot satisfy.
    #[error("unsupported {option} {value:?}, only {supported} is supported")]
    UnsupportedOption {
        option: &'static str,
        value: String,
        supported: String,
    },

    /// The cloud client could not be built from the resolved credentials.
    #[error("cannot create new {kind} client: {source}")]
    ClientConstruction {
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    /// A record needed to resolve credentials or bind a claim is unavailable.
    #[error("cannot get {what} {key}: {source}")]
    Lookup {
        what: &'static str,
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// A cloud call failed for a reason other than the resource being absent.
    #[error("cannot {op} {kind} {name}: {source}")]
    Provider {
        op: Operation,
        kind: &'static str,
        name: String,
        #[source]
        source: BoxError,
    },

    /// A record is malformed or in a state the reconciler cannot act on.
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),

    #[error("reconcile cancelled")]
    Cancelled,
}

impl Error {
    pub fn type_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Error::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn not_found(kind: impl fmt::Display, name: impl fmt::Display) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn provider(
        op: Operation,
        kind: &'static str,
        name: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Provider {
            op,
            kind,
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn lookup(what: &'static str, key: impl fmt::Display, source: Error) -> Self {
        Error::Lookup {
            what,
            key: key.to_string(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Lookup { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Retry classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TypeMismatch { .. }
            | Error::UnsupportedOption { .. }
            | Error::ClientConstruction { .. }
            | Error::Invalid(_) => ErrorKind::Permanent,
            Error::NotFound { .. }
            | Error::Lookup { .. }
            | Error::Conflict { .. }
            | Error::Provider { .. }
            | Error::Timeout(_)
            | Error::Cancelled => ErrorKind::Transient,
        }
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_message_has_operation_label() {
        let err = Error::provider(
            Operation::Create,
            "Subnet",
            "snet-a",
            std::io::Error::other("503 Service Unavailable"),
        );
        assert_eq!(
            err.to_string(),
            "cannot create Subnet snet-a: 503 Service Unavailable"
        );
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_lookup_propagates_not_found() {
        let err = Error::lookup(
            "provider",
            "azure-provider",
            Error::not_found("Provider", "azure-provider"),
        );
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("cannot get provider azure-provider"));
    }

    #[test]
    fn test_permanent_kinds() {
        assert_eq!(
            Error::type_mismatch("Subnet", "Redis").kind(),
            ErrorKind::Permanent
        );
        let unsupported = Error::UnsupportedOption {
            option: "engine version",
            value: "6.0".to_string(),
            supported: "3.2".to_string(),
        };
        assert_eq!(unsupported.kind(), ErrorKind::Permanent);
    }
}
