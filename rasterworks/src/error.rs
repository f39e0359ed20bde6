//! Error types surfaced by every operation.
//!
//! All public entry points fail with an [`OperationError`]. The four variants
//! map one-to-one onto the failure classes callers need to distinguish:
//!
//! - [`OperationError::ResourceDestroyed`]: a handle was used after `close()`.
//!   Always detected before any native call is made.
//! - [`OperationError::InvalidArgument`]: bad option token, mismatched raster
//!   dimensions, missing destination or sources.
//! - [`OperationError::NativeOperationFailed`]: the native engine ran and
//!   reported a failure (e.g. unknown output driver).
//! - [`OperationError::UserCallbackFailed`]: a caller-supplied function or
//!   progress sink returned an error or panicked.

use crate::resource::{ResourceId, ResourceKind};
use std::any::Any;
use thiserror::Error;

/// Error type returned by caller-supplied callbacks (calc functions, progress sinks).
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced to callers of the synchronous and asynchronous APIs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    /// The operation referenced a handle whose destruction was already visible.
    #[error("{resource} object has already been destroyed")]
    ResourceDestroyed {
        resource: ResourceKind,
        id: ResourceId,
    },

    /// An argument was rejected before dispatch or by the native option parser.
    #[error("{0}")]
    InvalidArgument(String),

    /// The native engine ran and returned a failure.
    #[error("{0}")]
    NativeOperationFailed(String),

    /// A caller-supplied function or progress sink failed.
    ///
    /// The message is the callback's own error message, unmodified.
    #[error("{0}")]
    UserCallbackFailed(String),
}

impl OperationError {
    /// Creates an [`OperationError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates an [`OperationError::NativeOperationFailed`].
    pub fn native(message: impl Into<String>) -> Self {
        Self::NativeOperationFailed(message.into())
    }

    /// Wraps a callback error, preserving its message verbatim.
    pub fn callback(error: &(dyn std::error::Error + Send + Sync)) -> Self {
        Self::UserCallbackFailed(error.to_string())
    }

    /// Wraps the payload of a panic raised by a callback.
    pub(crate) fn callback_panic(payload: &(dyn Any + Send)) -> Self {
        Self::UserCallbackFailed(panic_message(payload))
    }

    /// Returns true for [`OperationError::ResourceDestroyed`].
    pub fn is_resource_destroyed(&self) -> bool {
        matches!(self, Self::ResourceDestroyed { .. })
    }

    /// Returns true for [`OperationError::InvalidArgument`].
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Returns true for [`OperationError::NativeOperationFailed`].
    pub fn is_native_failure(&self) -> bool {
        matches!(self, Self::NativeOperationFailed(_))
    }

    /// Returns true for [`OperationError::UserCallbackFailed`].
    pub fn is_callback_failure(&self) -> bool {
        matches!(self, Self::UserCallbackFailed(_))
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_destroyed_display() {
        let err = OperationError::ResourceDestroyed {
            resource: ResourceKind::Dataset,
            id: ResourceId::new(7),
        };
        assert_eq!(err.to_string(), "Dataset object has already been destroyed");
        assert!(err.is_resource_destroyed());
    }

    #[test]
    fn test_callback_message_is_verbatim() {
        let source: CallbackError = "propagate this".into();
        let err = OperationError::callback(source.as_ref());
        assert_eq!(err, OperationError::UserCallbackFailed("propagate this".into()));
        assert_eq!(err.to_string(), "propagate this");
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_kind_predicates() {
        assert!(OperationError::invalid("x").is_invalid_argument());
        assert!(OperationError::native("x").is_native_failure());
        assert!(OperationError::UserCallbackFailed("x".into()).is_callback_failure());
        assert!(!OperationError::native("x").is_invalid_argument());
    }
}
