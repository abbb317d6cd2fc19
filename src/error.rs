//! Error types for the Magento platform compiler

use thiserror::Error;

/// Main error type for platform compilation and realization
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed configuration detected before any resource is declared
    #[error("validation error: {0}")]
    Validation(String),

    /// A declaration references a resource or attribute that was never declared
    #[error("unknown reference: {0}")]
    UnknownReference(String),

    /// The declared graph would require a dependency cycle
    #[error("dependency cycle between {scope}: {}", .path.join(" -> "))]
    DependencyCycle {
        /// What the cycle was found between ("resources" or "units")
        scope: String,
        /// The cycle, first element repeated at the end
        path: Vec<String>,
    },

    /// The external control plane rejected or failed a declared resource
    #[error("realization of {resource} failed: {message}")]
    Realization {
        /// Logical id of the offending resource
        resource: String,
        /// Message from the control plane, verbatim
        message: String,
    },

    /// Reading the platform configuration failed
    #[error("config error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an unknown-reference error with the given message
    pub fn unknown_reference(msg: impl Into<String>) -> Self {
        Self::UnknownReference(msg.into())
    }

    /// Create a dependency-cycle error for the given scope and cycle path
    pub fn cycle(scope: impl Into<String>, path: Vec<String>) -> Self {
        Self::DependencyCycle {
            scope: scope.into(),
            path,
        }
    }

    /// Create a realization error naming the resource that failed
    pub fn realization(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Realization {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a config error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether the error was detectable before anything was realized
    pub fn is_plan_time(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnknownReference(_) | Self::DependencyCycle { .. }
        )
    }
}
