//! Action reference grammar.
//!
//! Parses a single `owner/name@version` token as found in a step's `uses:`
//! field. Names may span several segments (`github/codeql-action/init`), and a
//! version that is a full 40-character commit hash is additionally recorded as
//! the reference's commit pin.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Marker written above a hash-pinned line to remember the human-readable tag.
pub const ORIGINAL_VERSION_MARKER: &str = "Original version:";

/// One concrete `uses:` occurrence in a workflow file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReference {
    pub owner: String,
    /// Everything after the owner, e.g. `"codeql-action/init"`.
    pub name: String,
    /// Tag or branch. For hash pins this is the version recovered from an
    /// `Original version:` comment, or the hash itself when there is none.
    pub version: String,
    pub commit_hash: Option<String>,
    pub path: PathBuf,
    /// Line number, 1-indexed.
    pub line: usize,
    /// Comment lines directly above the reference, in source order.
    pub comments: Vec<String>,
}

impl ActionReference {
    /// `owner/name` without the version.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn is_hash_pinned(&self) -> bool {
        self.commit_hash.is_some()
    }
}

impl fmt::Display for ActionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.version)
    }
}

/// Returns true for a full-length hexadecimal commit SHA.
pub fn is_commit_hash(version: &str) -> bool {
    version.len() == 40 && version.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses `owner/name@version` into an [`ActionReference`] with line 0.
///
/// The caller is responsible for filling in the source line. When the version
/// is a commit hash, `comments` is searched for an `Original version:` marker;
/// the closest (last) one supplies the human-readable version.
pub fn parse_action_reference(
    reference: &str,
    path: &Path,
    comments: &[String],
) -> Result<ActionReference> {
    let mut parts = reference.split('@');
    let (Some(full_name), Some(version), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::InvalidReferenceFormat {
            path: path.to_path_buf(),
            reference: reference.to_string(),
        });
    };

    let Some((owner, name)) = full_name.split_once('/') else {
        return Err(Error::InvalidNameFormat {
            path: path.to_path_buf(),
            name: full_name.to_string(),
        });
    };
    if owner.is_empty() {
        return Err(Error::EmptyOwner {
            path: path.to_path_buf(),
            reference: reference.to_string(),
        });
    }
    if name.is_empty() || name.split('/').any(str::is_empty) {
        return Err(Error::EmptyName {
            path: path.to_path_buf(),
            reference: reference.to_string(),
        });
    }
    if version.is_empty() {
        return Err(Error::EmptyVersion {
            path: path.to_path_buf(),
            reference: reference.to_string(),
        });
    }

    let (version, commit_hash) = if is_commit_hash(version) {
        let recovered = original_version(comments).unwrap_or(version);
        (recovered.to_string(), Some(version.to_string()))
    } else {
        (version.to_string(), None)
    };

    Ok(ActionReference {
        owner: owner.to_string(),
        name: name.to_string(),
        version,
        commit_hash,
        path: path.to_path_buf(),
        line: 0,
        comments: comments.to_vec(),
    })
}

/// Finds the version recorded by the closest `Original version:` comment.
fn original_version(comments: &[String]) -> Option<&str> {
    comments.iter().rev().find_map(|comment| {
        let (_, rest) = comment.split_once(ORIGINAL_VERSION_MARKER)?;
        let rest = rest.trim();
        (!rest.is_empty()).then_some(rest)
    })
}
