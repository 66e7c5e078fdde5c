//! Crate-level error types for command handling and dispatch.

use serde::{Deserialize, Serialize};

/// Classification carried by every `CommandFailed` event.
///
/// Serialized as the upper-case codes `USER_ERROR`, `PROTOCOL_ERROR`,
/// `INVARIANT_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Invalid input or failed precondition. The store is untouched.
    UserError,
    /// An external collaborator call failed. The store is untouched.
    ProtocolError,
    /// Internal consistency violation; a programming fault.
    InvariantError,
}

/// Error reported by a backend collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The requested object does not exist on the backend.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Transport or server-side failure.
    #[error("backend call failed: {0}")]
    Failed(String),
}

/// Error returned by a command handler.
///
/// The dispatcher converts every variant into a terminal `CommandFailed`
/// event; handlers never let an error escape as a fault.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Command rejected by validation.
    #[error("{0}")]
    User(String),

    /// External collaborator rejected the call.
    #[error("{context}: {source}")]
    Protocol {
        /// What the handler was doing when the call failed.
        context: String,
        #[source]
        source: BackendError,
    },

    /// Internal invariant violated.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl CommandError {
    /// Shorthand for a [`CommandError::User`].
    pub fn user(msg: impl Into<String>) -> Self {
        CommandError::User(msg.into())
    }

    /// Shorthand for a [`CommandError::Invariant`].
    pub fn invariant(msg: impl Into<String>) -> Self {
        CommandError::Invariant(msg.into())
    }

    /// Wrap a backend error with a short description of the failed call.
    pub fn protocol(context: impl Into<String>, source: BackendError) -> Self {
        CommandError::Protocol {
            context: context.into(),
            source,
        }
    }

    /// The failure code reported in the terminal event.
    pub fn reason(&self) -> FailureReason {
        match self {
            CommandError::User(_) => FailureReason::UserError,
            CommandError::Protocol { .. } => FailureReason::ProtocolError,
            CommandError::Invariant(_) => FailureReason::InvariantError,
        }
    }
}

/// Error returned when a command cannot reach the dispatcher at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher task has exited, so no further commands can be
    /// processed.
    #[error("dashboard dispatcher is no longer running")]
    DispatcherGone,

    /// A serialized command could not be decoded.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_serializes_as_upper_case_code() {
        let json = serde_json::to_string(&FailureReason::UserError).expect("serialize");
        assert_eq!(json, "\"USER_ERROR\"");
        let json = serde_json::to_string(&FailureReason::InvariantError).expect("serialize");
        assert_eq!(json, "\"INVARIANT_ERROR\"");
    }

    #[test]
    fn command_error_maps_to_reason() {
        assert_eq!(CommandError::user("bad").reason(), FailureReason::UserError);
        assert_eq!(
            CommandError::protocol("save", BackendError::Failed("503".into())).reason(),
            FailureReason::ProtocolError
        );
        assert_eq!(
            CommandError::invariant("lost").reason(),
            FailureReason::InvariantError
        );
    }

    #[test]
    fn protocol_error_display_includes_cause() {
        let err = CommandError::protocol(
            "failed to delete filter view",
            BackendError::Failed("timeout".into()),
        );
        assert_eq!(
            err.to_string(),
            "failed to delete filter view: backend call failed: timeout"
        );
    }

    #[test]
    fn dispatcher_gone_display() {
        assert_eq!(
            DispatchError::DispatcherGone.to_string(),
            "dashboard dispatcher is no longer running"
        );
    }

    #[test]
    fn invalid_command_display() {
        let err = DispatchError::InvalidCommand("unknown variant `Nope`".into());
        assert_eq!(err.to_string(), "invalid command: unknown variant `Nope`");
    }

    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<CommandError>();
            assert_send_sync::<DispatchError>();
        }
    };
}
