//! Error types for the service broadcast layer.
//!
//! Every fallible operation in this crate returns [`Result`]. Providers
//! report failures through the same type; the reference cache wraps them
//! in a step-specific variant that keeps the provider error as its source.

use std::path::PathBuf;
use thiserror::Error;

use crate::providers::ProviderOp;

/// Main error type for the broadcast layer.
#[derive(Debug, Error)]
pub enum BroadcastError {
    // Creation failures
    #[error("Failed to create channel for {services:?}: {source}")]
    ChannelCreate {
        services: Vec<String>,
        #[source]
        source: Box<BroadcastError>,
    },

    #[error("Failed to add '{name}' to the channel ignore list: {source}")]
    IgnoreList {
        name: String,
        #[source]
        source: Box<BroadcastError>,
    },

    #[error("Failed to create cache: {source}")]
    CacheCreate {
        #[source]
        source: Box<BroadcastError>,
    },

    #[error("Failed to bind default implementation {implementation}: {source}")]
    Registration {
        implementation: String,
        #[source]
        source: Box<BroadcastError>,
    },

    // Teardown failures
    #[error("Failed to destroy channel: {source}")]
    ChannelDestroy {
        #[source]
        source: Box<BroadcastError>,
    },

    #[error("Failed to destroy cache: {source}")]
    CacheDestroy {
        #[source]
        source: Box<BroadcastError>,
    },

    #[error("Channel still referenced by {live_caches} cache(s)")]
    ChannelBusy { live_caches: usize },

    #[error("Failed to invalidate channel: {source}")]
    Invalidate {
        #[source]
        source: Box<BroadcastError>,
    },

    // Lifecycle errors
    #[error("Reference cache for {service} is not ready")]
    NotReady { service: String },

    #[error("Broadcast for {service} is already started")]
    AlreadyStarted { service: String },

    // Query errors
    #[error("Cache query failed: {message}")]
    CacheQuery { message: String },

    // Notification boundary errors
    #[error("Malformed notification event '{event}': expected <service>.<implementation>")]
    MalformedEvent { event: String },

    #[error("Notification handling panicked: {message}")]
    NotificationPanicked { message: String },

    // Registry lookups
    #[error("Unknown channel handle")]
    UnknownChannel,

    #[error("Unknown cache handle")]
    UnknownCache,

    #[error("Service not found: {name}")]
    UnknownService { name: String },

    #[error("Injected failure for {0:?}")]
    InjectedFailure(ProviderOp),

    #[error("Failed to acquire {what} lock")]
    LockPoisoned { what: &'static str },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for broadcast operations.
pub type Result<T> = std::result::Result<T, BroadcastError>;

impl From<std::io::Error> for BroadcastError {
    fn from(err: std::io::Error) -> Self {
        BroadcastError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BroadcastError {
    fn from(err: serde_json::Error) -> Self {
        BroadcastError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BroadcastError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BroadcastError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Errors a broadcast treats as "nothing available" rather than a fault.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BroadcastError::CacheQuery { .. } | BroadcastError::InjectedFailure(_)
        )
    }

    /// The innermost provider error behind any step-specific wrapper.
    pub fn root_cause(&self) -> &BroadcastError {
        match self {
            BroadcastError::ChannelCreate { source, .. }
            | BroadcastError::IgnoreList { source, .. }
            | BroadcastError::CacheCreate { source }
            | BroadcastError::Registration { source, .. }
            | BroadcastError::ChannelDestroy { source }
            | BroadcastError::CacheDestroy { source }
            | BroadcastError::Invalidate { source } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BroadcastError::NotReady {
            service: "audit_log".into(),
        };
        assert_eq!(err.to_string(), "Reference cache for audit_log is not ready");

        let err = BroadcastError::MalformedEvent {
            event: "no_separator".into(),
        };
        assert!(err.to_string().contains("no_separator"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(BroadcastError::CacheQuery {
            message: "registry busy".into()
        }
        .is_transient());
        assert!(BroadcastError::InjectedFailure(ProviderOp::CacheGet).is_transient());
        assert!(!BroadcastError::UnknownChannel.is_transient());
    }

    #[test]
    fn test_root_cause_unwraps_step_errors() {
        let err = BroadcastError::Invalidate {
            source: Box::new(BroadcastError::InjectedFailure(ProviderOp::ChannelInvalidate)),
        };
        assert!(matches!(
            err.root_cause(),
            BroadcastError::InjectedFailure(ProviderOp::ChannelInvalidate)
        ));
        assert!(err.to_string().starts_with("Failed to invalidate channel"));

        let plain = BroadcastError::UnknownCache;
        assert!(matches!(plain.root_cause(), BroadcastError::UnknownCache));
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = BroadcastError::io_with_path(io, "/tmp/broadcast.json");
        match err {
            BroadcastError::Io { path, source, .. } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/broadcast.json")));
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
