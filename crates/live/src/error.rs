use std::error::Error as StdError;

/// Crate-wide result type for live channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors shared by the address model, scope resolvers, channels and
/// the transport seam.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A channel address segment is empty or contains the separator.
    #[error("invalid channel address: {message}")]
    InvalidAddress { message: String },

    /// No scope support exists for the requested namespace.
    #[error("unsupported namespace: {scope}/{namespace}")]
    UnsupportedNamespace { scope: String, namespace: String },

    /// The namespace is supported but no channel config matches the path.
    #[error("unknown path: {path}")]
    UnknownPath { path: String },

    /// Subscribe, publish or presence failed in the transport.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The channel was shut down before the operation could complete.
    #[error("channel closed: {id}")]
    Closed { id: String },

    /// A scope resolver failed while fetching namespace metadata.
    #[error("scope resolution failed: {context}: {source}")]
    Resolver {
        context: String,
        #[source]
        source: std::sync::Arc<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_address(message: impl std::fmt::Display) -> Self {
        Self::InvalidAddress {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unsupported_namespace(scope: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::UnsupportedNamespace {
            scope: scope.into(),
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn unknown_path(path: impl Into<String>) -> Self {
        Self::UnknownPath { path: path.into() }
    }

    #[must_use]
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn closed(id: impl Into<String>) -> Self {
        Self::Closed { id: id.into() }
    }

    #[must_use]
    pub fn resolver(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Resolver {
            context: context.into(),
            source: std::sync::Arc::new(source),
        }
    }

    /// Configuration failures move a channel to `Invalid` rather than `Shutdown`.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedNamespace { .. } | Self::UnknownPath { .. }
        )
    }
}
