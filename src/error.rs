//! Error types for the machine pool controller
//!
//! Errors carry the pool they relate to and enough context to tell a
//! transient cloud failure from a malformed resource. "Not found" is never
//! an error in this crate: lookups return `Option` and the driver defers.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for machine pool reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed input (unparseable apiVersion, invalid spec)
    #[error("validation error for {pool}: {message}")]
    Validation {
        /// Name of the pool with invalid configuration
        pool: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "metadata.ownerReferences")
        field: Option<String>,
    },

    /// Cloud provider service error
    #[error("provider error [{service}] for {pool}: {message}")]
    Provider {
        /// Name of the pool being reconciled
        pool: String,
        /// Cloud service that failed (autoscaling, ec2, tags)
        service: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "machine-sync", "teardown")
        context: String,
    },
}

impl Error {
    /// Create a validation error without pool context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            pool: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with pool context
    pub fn validation_for(pool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            pool: pool.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with pool context and field path
    pub fn validation_for_field(
        pool: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            pool: pool.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provider error without context
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            pool: UNKNOWN_CONTEXT.to_string(),
            service: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a retryable provider error with full context
    pub fn provider_for(
        pool: impl Into<String>,
        service: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            pool: pool.into(),
            service: service.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (e.g., rejected configuration)
    pub fn provider_permanent(
        pool: impl Into<String>,
        service: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            pool: pool.into(),
            service: service.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error without context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec or code change.
    /// Kubernetes 4xx responses are not retried, except conflicts and
    /// throttling; everything else is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Validation { .. } => false,
            Error::Provider { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the pool name if this error is associated with one
    pub fn pool(&self) -> Option<&str> {
        match self {
            Error::Validation { pool, .. } => Some(pool),
            Error::Provider { pool, .. } => Some(pool),
            Error::Kube { .. } | Error::Serialization { .. } | Error::Internal { .. } => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Provider { service, .. } => Some(service),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
