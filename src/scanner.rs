//! Workflow file scanner.
//!
//! Recursively walks directories to collect `.yml`/`.yaml` files and extracts
//! every `uses: owner/name@version` reference from them. Comments are
//! associated in a raw-text pre-pass, then the YAML tree is walked with alias
//! resolution.

use crate::comments::CommentIndex;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reference::ActionReference;
use crate::yaml::{Document, ReferenceWalker};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions recognised as workflow files.
pub const WORKFLOW_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// A file that could not be scanned.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary statistics from a scan.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanDiagnostics {
    pub files_scanned: usize,
    pub files_failed: usize,
    pub total_refs: usize,
    pub hash_pinned: usize,
    pub tag_pinned: usize,
}

/// Complete scan results for one repository.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub references: Vec<ActionReference>,
    pub failures: Vec<FileFailure>,
    pub diagnostics: ScanDiagnostics,
}

impl ScanReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Collects all workflow files under `dir`, sorted by path.
pub fn scan_workflows(dir: &Path) -> Result<Vec<PathBuf>> {
    let extensions: Vec<String> = WORKFLOW_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    scan_workflows_with(dir, &extensions)
}

/// Collects all files under `dir` whose extension is in `extensions`.
pub fn scan_workflows_with(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Err(Error::DirectoryNotFound(dir.to_path_buf()));
    }
    std::fs::read_dir(dir).map_err(|err| Error::io(dir, err))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(walk_error)?;
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| extensions.iter().any(|e| ext == e.as_str()))
        {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

fn walk_error(err: walkdir::Error) -> Error {
    let denied = err
        .io_error()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::PermissionDenied);
    match err.path() {
        Some(path) if denied => Error::PermissionDenied(path.to_path_buf()),
        _ => Error::Walk(err),
    }
}

/// Reads a workflow file and extracts all action references from it.
pub fn parse_action_references(path: &Path) -> Result<Vec<ActionReference>> {
    let source = std::fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    parse_action_references_from_str(&source, path)
}

/// Extracts action references from workflow source text.
///
/// `path` is only recorded on the references and in errors.
pub fn parse_action_references_from_str(
    source: &str,
    path: &Path,
) -> Result<Vec<ActionReference>> {
    let comments = CommentIndex::build(source);
    let document = Document::parse(source, path)?;
    let references = ReferenceWalker::new(&document, &comments, path).walk()?;
    debug!(path = %path.display(), count = references.len(), "parsed workflow");
    Ok(references)
}

/// Scans every workflow file of the configured repository in parallel.
///
/// A file that fails to parse is recorded in [`ScanReport::failures`] and
/// does not affect the others. Only a missing or unreadable workflow
/// directory fails the whole scan.
pub fn scan_repository(config: &Config) -> Result<ScanReport> {
    let files = scan_workflows_with(&config.workflows_path(), &config.extensions)?;

    let results: Vec<(PathBuf, Result<Vec<ActionReference>>)> = files
        .into_par_iter()
        .map(|file| {
            let result = parse_action_references(&file);
            (file, result)
        })
        .collect();

    let mut references = Vec::new();
    let mut failures = Vec::new();
    let mut diagnostics = ScanDiagnostics::default();

    for (path, result) in results {
        diagnostics.files_scanned += 1;
        match result {
            Ok(refs) => references.extend(refs),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to scan workflow");
                failures.push(FileFailure {
                    path,
                    error: err.to_string(),
                });
            }
        }
    }

    diagnostics.files_failed = failures.len();
    diagnostics.total_refs = references.len();
    diagnostics.hash_pinned = references.iter().filter(|r| r.is_hash_pinned()).count();
    diagnostics.tag_pinned = diagnostics.total_refs - diagnostics.hash_pinned;

    Ok(ScanReport {
        references,
        failures,
        diagnostics,
    })
}
