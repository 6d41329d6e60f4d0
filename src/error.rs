//! Error types shared by the scanner and the update manager.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`Error`], used by callers deciding whether a
/// failure is local to one file or fatal for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The path is outside the base directory, empty, or not a plain file.
    Path,
    /// The workflow could not be parsed, or a `uses` value is malformed.
    Parse,
    /// The filesystem refused a read, write, or directory walk.
    Io,
    /// An update's target line fell outside the file or could not be located.
    LineBounds,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("path is empty")]
    EmptyPath,

    #[error("base directory is not set")]
    BaseDirNotSet,

    #[error("{} is outside of base directory {}", .path.display(), .base.display())]
    PathOutsideBase { path: PathBuf, base: PathBuf },

    #[error("{} is not a regular file", .0.display())]
    NotRegularFile(PathBuf),

    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("{}: document has no content", .0.display())]
    EmptyDocument(PathBuf),

    #[error("{}:{line}:{column}: YAML syntax error: {message}", .path.display())]
    YamlSyntax {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{}: invalid action reference '{reference}': expected owner/name@version", .path.display())]
    InvalidReferenceFormat { path: PathBuf, reference: String },

    #[error("{}: invalid action name '{name}': expected owner/name", .path.display())]
    InvalidNameFormat { path: PathBuf, name: String },

    #[error("{}: action reference '{reference}' has an empty owner", .path.display())]
    EmptyOwner { path: PathBuf, reference: String },

    #[error("{}: action reference '{reference}' has an empty name", .path.display())]
    EmptyName { path: PathBuf, reference: String },

    #[error("{}: action reference '{reference}' has an empty version", .path.display())]
    EmptyVersion { path: PathBuf, reference: String },

    #[error("{}: alias expansion exceeded {limit} resolutions", .path.display())]
    AliasExpansionLimit { path: PathBuf, limit: usize },

    #[error("{}: line {line} (adjusted to {adjusted}) is outside 1..={len}", .path.display())]
    InvalidLineNumber {
        path: PathBuf,
        line: usize,
        adjusted: isize,
        len: usize,
    },

    #[error("{}:{line}: '{pin}' not found in file", .path.display())]
    ReferenceNotFound {
        path: PathBuf,
        line: usize,
        pin: String,
    },

    #[error("{}:{line}: '{pin}' appears on {matches} lines", .path.display())]
    AmbiguousReference {
        path: PathBuf,
        line: usize,
        pin: String,
        matches: usize,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::EmptyPath
            | Error::BaseDirNotSet
            | Error::PathOutsideBase { .. }
            | Error::NotRegularFile(_) => ErrorCategory::Path,
            Error::EmptyDocument(_)
            | Error::YamlSyntax { .. }
            | Error::InvalidReferenceFormat { .. }
            | Error::InvalidNameFormat { .. }
            | Error::EmptyOwner { .. }
            | Error::EmptyName { .. }
            | Error::EmptyVersion { .. }
            | Error::AliasExpansionLimit { .. } => ErrorCategory::Parse,
            Error::DirectoryNotFound(_)
            | Error::PermissionDenied(_)
            | Error::Io { .. }
            | Error::Walk(_) => ErrorCategory::Io,
            Error::InvalidLineNumber { .. }
            | Error::ReferenceNotFound { .. }
            | Error::AmbiguousReference { .. } => ErrorCategory::LineBounds,
        }
    }

    /// Wraps an I/O error with the path it happened on, promoting
    /// `PermissionDenied` to its own variant.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Error::PermissionDenied(path)
        } else {
            Error::Io { path, source }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
