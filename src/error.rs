use std::fmt::{Display, Formatter};

/// A boxed error returned by a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the event store, the buses and the composition of an
/// [Application](crate::Application).
///
/// Handlers return the application's own error type, which must implement `From<Error>` so that
/// these errors can be propagated with `?`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A boxed operation could not be downcast to the expected type.
    #[error("Could not downcast operation to type {0}")]
    Downcast(&'static str),
    /// The output of a handler could not be downcast to the expected type.
    #[error("Could not downcast handler output to type {0}")]
    OutputDowncast(&'static str),
    /// An error occurred when serializing or deserializing an [Event](crate::Event).
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// An operation was dispatched but no handler is registered under its name.
    #[error("No {kind} handler for {name:?} (known {kind}s: {known:?})")]
    HandlerNotFound {
        /// Whether the operation is a command or a query.
        kind: OperationKind,
        /// The name of the operation.
        name: String,
        /// The names that are registered on the bus, sorted.
        known: Vec<&'static str>,
    },
    /// The version of a stream did not match the version expected by the writer.
    #[error("Concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The id of the stream.
        stream_id: String,
        /// The version expected by the writer.
        expected: u64,
        /// The version of the stream when the append was attempted.
        actual: u64,
    },
    /// Two modules registered a handler for the same operation.
    #[error("{kind} {name:?} is registered by module {first_module:?} and module {conflicting_module:?}")]
    ModuleRegistrationConflict {
        /// Whether the operation is a command or a query.
        kind: OperationKind,
        /// The name of the operation.
        name: &'static str,
        /// The module that registered the name first.
        first_module: String,
        /// The module that registered the name again.
        conflicting_module: String,
    },
    /// A storage backend failed.
    #[error("Storage error: {0}")]
    Storage(#[source] BoxError),
    /// A storage backend does not support the requested operation.
    #[error("Operation not supported by the storage backend: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Wraps a backend error.
    pub fn storage(error: impl Into<BoxError>) -> Self {
        Self::Storage(error.into())
    }

    /// Returns `true` if the error is a [ConcurrencyConflict](Error::ConcurrencyConflict), which
    /// can be recovered from by reloading the aggregate and retrying.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// The two kinds of operations that can be dispatched.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum OperationKind {
    /// A [Command](crate::Command).
    Command,
    /// A [Query](crate::Query).
    Query,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Query => write!(f, "query"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_not_found_lists_known_names() {
        let error = Error::HandlerNotFound {
            kind: OperationKind::Command,
            name: "Foo".into(),
            known: vec!["Bar", "Baz"],
        };

        assert_eq!(
            error.to_string(),
            r#"No command handler for "Foo" (known commands: ["Bar", "Baz"])"#,
        );
    }

    #[test]
    fn module_conflict_names_both_modules() {
        let error = Error::ModuleRegistrationConflict {
            kind: OperationKind::Query,
            name: "Foo",
            first_module: "a".into(),
            conflicting_module: "b".into(),
        };

        let message = error.to_string();
        assert!(message.contains("\"Foo\""));
        assert!(message.contains("\"a\""));
        assert!(message.contains("\"b\""));
        assert!(!error.is_concurrency_conflict());
    }
}
