use std::{fmt, sync::Arc};

use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_format(element: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidFormat {
                element: element.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    /// Data required by an operation is held by a ghost node or an unloaded
    /// entry. `node` is the arena handle of the live node holding the slot.
    pub fn not_loaded(node: u64, slot: Unloaded) -> Error {
        Error(ErrorKind::NotLoaded { node, slot }.into())
    }

    /// A task failed; every joiner of the task receives this error with the
    /// shared cause.
    pub fn task_abort(subject: impl Into<String>, cause: Arc<Error>) -> Error {
        Error(
            ErrorKind::TaskAbort {
                subject: subject.into(),
                fatal: true,
                source: Some(cause),
            }
            .into(),
        )
    }

    /// The task's effect has already been achieved elsewhere.
    pub fn task_complete(subject: impl Into<String>) -> Error {
        Error(
            ErrorKind::TaskAbort {
                subject: subject.into(),
                fatal: false,
                source: None,
            }
            .into(),
        )
    }

    pub fn incomparable(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::Incomparable {
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn integrity(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Integrity {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn encoding(context: impl Into<String>, source: serde_json::Error) -> Error {
        Error(
            ErrorKind::Encoding {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn is_not_loaded(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotLoaded { .. })
    }

    /// Returns the node handle and slot of a not-loaded error.
    pub fn not_loaded_slot(&self) -> Option<(u64, Unloaded)> {
        match self.kind() {
            ErrorKind::NotLoaded { node, slot } => Some((*node, *slot)),
            _ => None,
        }
    }

    pub fn is_benign_abort(&self) -> bool {
        matches!(self.kind(), ErrorKind::TaskAbort { fatal: false, .. })
    }

    pub fn is_fatal_abort(&self) -> bool {
        matches!(self.kind(), ErrorKind::TaskAbort { fatal: true, .. })
    }

    pub fn is_invalid_format(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidFormat { .. })
    }

    /// Follows fatal task aborts down to the error that started them.
    pub fn root_cause(&self) -> &Error {
        match self.kind() {
            ErrorKind::TaskAbort {
                source: Some(cause),
                ..
            } => cause.root_cause(),
            _ => self,
        }
    }
}

/// Location of data that must be loaded before an operation can proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unloaded {
    /// The child at this position is a ghost.
    Subnode(usize),
    /// The value of the local entry at this position is a placeholder.
    Entry(usize),
}

impl fmt::Display for Unloaded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unloaded::Subnode(i) => write!(f, "subnode {i}"),
            Unloaded::Entry(i) => write!(f, "entry {i}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("invalid storage format for '{element}': {message}")]
    InvalidFormat { element: String, message: String },

    #[error("data not loaded: {slot} of node #{node}")]
    NotLoaded { node: u64, slot: Unloaded },

    #[error("task '{subject}' aborted (fatal: {fatal})")]
    TaskAbort {
        subject: String,
        fatal: bool,
        source: Option<Arc<Error>>,
    },

    #[error("incomparable keys: {context}")]
    Incomparable { context: String },

    #[error("tree integrity violated: {message}")]
    Integrity { message: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("encoding error for '{context}': {source}")]
    Encoding {
        context: String,
        source: serde_json::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::encoding("", e)
    }
}
