//! Error types for the plugin runtime.
//!
//! Registration-phase errors (duplicate or reserved names) are integrator
//! programming errors and surface as `Err` during setup. Runtime
//! conditions — unknown methods, binding failures, handler errors — never
//! escape the dispatcher as process failures; they become error replies or
//! log records.

use crate::binder::BindError;
use crate::request::RequestState;
use lnplug_rpc::RequestId;
use lnplug_rpc::transport::CodecError;

/// Errors that can occur in the plugin runtime
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A method or hook name was registered twice
    #[error("name `{0}` is already bound to a method")]
    MethodExists(String),

    /// A notification topic was subscribed twice
    #[error("topic `{0}` already has a handler")]
    SubscriptionExists(String),

    /// An option name was registered twice
    #[error("option `{0}` is already registered")]
    OptionExists(String),

    /// A built-in method name was used for a user registration
    #[error("name `{0}` is reserved for the plugin runtime")]
    ReservedName(String),

    /// Parameter binding failure
    #[error(transparent)]
    Bind(#[from] BindError),

    /// A finalizer ran on a request that is not pending
    #[error("request {id:?} is not pending, current state is {state:?}")]
    NotPending {
        id: Option<RequestId>,
        state: RequestState,
    },

    /// A finalizer ran on a notification
    #[error("request has no id; notifications take no reply")]
    NoRequestId,

    /// Output was requested before the run loop started
    #[error("plugin is not running")]
    NotRunning,

    /// `run` was called on a plugin that already ran
    #[error("plugin is already running")]
    AlreadyRunning,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_method_exists() {
        let err = Error::MethodExists("getinfo".to_string());
        assert_eq!(err.to_string(), "name `getinfo` is already bound to a method");
    }

    #[test]
    fn test_error_display_not_pending() {
        let err = Error::NotPending {
            id: Some(RequestId::Number(7)),
            state: RequestState::Finished,
        };
        assert!(err.to_string().contains("not pending"));
        assert!(err.to_string().contains("Finished"));
    }

    #[test]
    fn test_error_display_reserved() {
        let err = Error::ReservedName("getmanifest".to_string());
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_bind_error_is_transparent() {
        let err: Error = BindError::MissingParameter("amount".to_string()).into();
        assert_eq!(err.to_string(), "missing required parameter `amount`");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("pipe broken"));
    }
}
