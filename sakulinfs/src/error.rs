use thiserror::Error;

use crate::perm::{Operation, Role};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Bad magic, a size mismatch or a record that does not decode.
    #[error("{func}: corrupt or foreign volume: {reason}")]
    Format { func: &'static str, reason: String },
    #[error("{func}: no such file or directory: {path}")]
    NotFound { func: &'static str, path: String },
    #[error("{func}: an entry named {name:?} already exists")]
    DuplicateName { func: &'static str, name: String },
    #[error("{func}: {path} is not a {expected}")]
    TypeMismatch {
        func: &'static str,
        path: String,
        expected: &'static str,
    },
    #[error("{func}: no free span of {required} bytes left on the volume")]
    OutOfSpace { func: &'static str, required: u64 },
    #[error("{func}: {role:?} may not {op:?} {path}")]
    PermissionDenied {
        func: &'static str,
        path: String,
        op: Operation,
        role: Role,
    },
    #[error("{func}: {reason}")]
    Auth { func: &'static str, reason: String },
    #[error("{func}: {path} is already open for editing")]
    Locked { func: &'static str, path: String },
    #[error("volume io failed")]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub(crate) fn format(func: &'static str, reason: impl Into<String>) -> Self {
        FsError::Format {
            func,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(func: &'static str, path: impl Into<String>) -> Self {
        FsError::NotFound {
            func,
            path: path.into(),
        }
    }

    pub(crate) fn auth(func: &'static str, reason: impl Into<String>) -> Self {
        FsError::Auth {
            func,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
