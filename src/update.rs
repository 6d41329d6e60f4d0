//! Applying version updates to workflow files.
//!
//! Rewrites individual `uses:` lines in place instead of re-serializing the
//! YAML, so formatting and unrelated comments survive untouched. Updates for
//! one file are applied bottom-up in memory and written back atomically only
//! once every edit has succeeded.

use crate::comments::is_comment;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::atomic_write;
use crate::locks::FileLocks;
use crate::reference::{ActionReference, ORIGINAL_VERSION_MARKER};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Provenance marker naming the version a hash pin replaced.
pub const OLDER_HASH_MARKER: &str = "Using older hash from";

/// One pending edit of a `uses:` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Update {
    pub action: ActionReference,
    pub old_version: String,
    pub new_version: String,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub file_path: PathBuf,
    /// Line number, 1-indexed.
    pub line_number: usize,
    /// Comment lines to place directly above the rewritten line.
    pub comments: Vec<String>,
    /// Trailing comment appended to the rewritten line, e.g. `# v4.1.1`.
    pub version_comment: String,
    pub original_version: String,
    pub description: String,
}

impl Update {
    /// The text written after `@`: the hash when pinning, else the version.
    pub fn target(&self) -> &str {
        self.new_hash
            .as_deref()
            .filter(|hash| !hash.is_empty())
            .unwrap_or(&self.new_version)
    }

    /// The text currently after `@`: the old hash when pinned, else the old version.
    pub fn old_pin(&self) -> &str {
        self.old_hash.as_deref().unwrap_or(&self.old_version)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateManager {
    base_dir: Option<PathBuf>,
    locks: Arc<FileLocks>,
}

impl Default for UpdateManager {
    /// A manager with no base directory; every apply fails with `BaseDirNotSet`.
    fn default() -> Self {
        Self {
            base_dir: None,
            locks: FileLocks::global(),
        }
    }
}

impl UpdateManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            locks: FileLocks::global(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let manager = Self::new(config.base_dir.clone());
        if config.shared_locks {
            manager
        } else {
            manager.with_locks(Arc::new(FileLocks::new()))
        }
    }

    /// Replaces the process-wide lock table, e.g. to scope locks to one run.
    pub fn with_locks(mut self, locks: Arc<FileLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Resolves `path` and checks that it is a plain file inside the base
    /// directory. Returns the absolute, cleaned path.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf> {
        let base = match self.base_dir.as_deref() {
            Some(base) if !base.as_os_str().is_empty() => base,
            _ => return Err(Error::BaseDirNotSet),
        };
        if path.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }

        let base = absolute_clean(base)?;
        let resolved = absolute_clean(path)?;
        if resolved == base || !resolved.starts_with(&base) {
            return Err(Error::PathOutsideBase {
                path: resolved,
                base,
            });
        }

        if let Ok(metadata) = std::fs::symlink_metadata(&resolved) {
            if !metadata.file_type().is_file() {
                return Err(Error::NotRegularFile(resolved));
            }
            // Parent directories may still be symlinks pointing elsewhere.
            let real = resolved
                .canonicalize()
                .map_err(|err| Error::io(&resolved, err))?;
            let real_base = base.canonicalize().map_err(|err| Error::io(&base, err))?;
            if !real.starts_with(&real_base) {
                return Err(Error::PathOutsideBase {
                    path: real,
                    base: real_base,
                });
            }
        }

        Ok(resolved)
    }

    /// Builds the update moving `action` to `latest_version`/`latest_hash`.
    ///
    /// Returns `None` when the reference is already at that target. When the
    /// target is a hash pin, provenance comments recording the replaced
    /// version are added; stale provenance lines are always dropped.
    pub fn create_update(
        &self,
        file: &Path,
        action: &ActionReference,
        latest_version: &str,
        latest_hash: Option<&str>,
    ) -> Option<Update> {
        let latest_hash = latest_hash.filter(|hash| !hash.is_empty());
        if action.version == latest_version && action.commit_hash.as_deref() == latest_hash {
            return None;
        }

        let original_version = action
            .commit_hash
            .clone()
            .unwrap_or_else(|| action.version.clone());

        let mut comments: Vec<String> = action
            .comments
            .iter()
            .filter(|comment| !is_provenance(comment))
            .cloned()
            .collect();
        if latest_hash.is_some() {
            comments.push(format!("# {OLDER_HASH_MARKER} {original_version}"));
            comments.push(format!("# {ORIGINAL_VERSION_MARKER} {original_version}"));
        }

        let from = match &action.commit_hash {
            Some(hash) if *hash != action.version => format!("{} ({hash})", action.version),
            _ => action.version.clone(),
        };
        let to = match latest_hash {
            Some(hash) => format!("{latest_version} ({hash})"),
            None => latest_version.to_string(),
        };

        Some(Update {
            action: action.clone(),
            old_version: action.version.clone(),
            new_version: latest_version.to_string(),
            old_hash: action.commit_hash.clone(),
            new_hash: latest_hash.map(str::to_string),
            file_path: file.to_path_buf(),
            line_number: action.line,
            comments,
            version_comment: format!("# {latest_version}"),
            original_version,
            description: format!("Update {} from {from} to {to}", action.full_name()),
        })
    }

    /// Applies `updates`, grouped per file, each file under its own lock.
    ///
    /// Files are processed in parallel and independently: every file is
    /// attempted, and the first error in path order is returned. On success
    /// returns the updates that were written; updates whose target pin is
    /// already in the file are left out.
    pub fn apply_updates(&self, updates: &[Update]) -> Result<Vec<Update>> {
        let mut by_file: BTreeMap<&Path, Vec<&Update>> = BTreeMap::new();
        for update in updates {
            by_file
                .entry(update.file_path.as_path())
                .or_default()
                .push(update);
        }
        let batches: Vec<(&Path, Vec<&Update>)> = by_file.into_iter().collect();

        let results: Vec<Result<Vec<Update>>> = batches
            .par_iter()
            .map(|(file, batch)| self.apply_locked(file, batch))
            .collect();

        let mut applied = Vec::new();
        let mut first_error = None;
        for ((file, _), result) in batches.iter().zip(results) {
            match result {
                Ok(written) => applied.extend(written),
                Err(err) => {
                    warn!(path = %file.display(), error = %err, "failed to apply updates");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    fn apply_locked(&self, file: &Path, updates: &[&Update]) -> Result<Vec<Update>> {
        let key = self.lock_key(file)?;
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock();
        self.apply_file_updates(file, updates)
    }

    /// The lock table key for `file`: its canonical path when it exists, so
    /// managers naming the same repository through different links share one
    /// mutex per file.
    pub(crate) fn lock_key(&self, file: &Path) -> Result<PathBuf> {
        let validated = self.validate_path(file)?;
        Ok(validated.canonicalize().unwrap_or(validated))
    }

    /// Applies every update for one file in memory, then writes once.
    ///
    /// Any failure leaves the file untouched. Callers must hold the file's lock.
    fn apply_file_updates(&self, file: &Path, updates: &[&Update]) -> Result<Vec<Update>> {
        let path = self.validate_path(file)?;
        let content = std::fs::read_to_string(&path).map_err(|err| Error::io(&path, err))?;
        let mut text = FileText::split(&content);

        let mut ordered = updates.to_vec();
        ordered.sort_by(|a, b| b.line_number.cmp(&a.line_number));

        let mut written = Vec::new();
        let mut line_adjustments: BTreeMap<usize, isize> = BTreeMap::new();
        for update in ordered {
            let shift: isize = line_adjustments
                .range(..update.line_number)
                .map(|(_, delta)| delta)
                .sum();
            let adjusted = update.line_number as isize + shift;
            if adjusted < 1 || adjusted as usize > text.lines.len() {
                return Err(Error::InvalidLineNumber {
                    path,
                    line: update.line_number,
                    adjusted,
                    len: text.lines.len(),
                });
            }

            let (idx, relocated) = match locate(&text.lines, adjusted as usize - 1, update, &path)? {
                Target::At(idx) => (idx, false),
                Target::Moved(idx) => (idx, true),
                Target::Present => {
                    debug!(
                        path = %path.display(),
                        line = update.line_number,
                        action = %update.action.full_name(),
                        "target already present"
                    );
                    continue;
                }
            };
            let Some(rewritten) = rewrite_line(&text.lines[idx], update) else {
                return Err(not_found(&path, update));
            };
            text.lines[idx] = rewritten;

            if relocated {
                // The scanned comments belong to another line; keep the
                // ones already above the target and refresh provenance.
                debug!(path = %path.display(), line = update.line_number, actual = idx + 1, "reference moved");
                let comments: Vec<String> = text.lines[comment_block_start(&text.lines, idx)..idx]
                    .iter()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !is_provenance(line))
                    .chain(update.comments.iter().filter(|c| is_provenance(c)).cloned())
                    .collect();
                replace_comment_block(&mut text, idx, &comments);
            } else {
                let delta = replace_comment_block(&mut text, idx, &update.comments);
                if delta != 0 {
                    *line_adjustments.entry(update.line_number).or_default() += delta;
                }
            }
            debug!(path = %path.display(), line = update.line_number, "{}", update.description);
            written.push(update.clone());
        }

        let updated = text.join();
        if updated == content {
            debug!(path = %path.display(), "no changes to write");
            return Ok(written);
        }
        atomic_write(&path, updated.as_bytes())?;
        info!(path = %path.display(), updates = written.len(), "updated workflow");
        Ok(written)
    }
}

/// Where an update lands in the current file text.
enum Target {
    /// The expected line holds the old pin.
    At(usize),
    /// The old pin sits on exactly one other line.
    Moved(usize),
    /// The old pin is gone and the new one is already written.
    Present,
}

/// Finds the line holding `full_name@<old pin>`, preferring `idx`.
///
/// Lines shift when another batch inserted comments since the scan, and
/// references reached through an alias are reported at the alias site while
/// the text lives on the anchor. Both are resolved by searching for the pin.
fn locate(lines: &[String], idx: usize, update: &Update, path: &Path) -> Result<Target> {
    let full_name = update.action.full_name();
    let old = update.old_pin();
    if pin_on_line(&lines[idx], &full_name) == Some(old) {
        return Ok(Target::At(idx));
    }

    let matches: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| pin_on_line(line, &full_name) == Some(old))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [only] => Ok(Target::Moved(*only)),
        [] if lines
            .iter()
            .any(|line| pin_on_line(line, &full_name) == Some(update.target())) =>
        {
            Ok(Target::Present)
        }
        [] => Err(not_found(path, update)),
        many => Err(Error::AmbiguousReference {
            path: path.to_path_buf(),
            line: update.line_number,
            pin: format!("{full_name}@{old}"),
            matches: many.len(),
        }),
    }
}

fn not_found(path: &Path, update: &Update) -> Error {
    Error::ReferenceNotFound {
        path: path.to_path_buf(),
        line: update.line_number,
        pin: format!("{}@{}", update.action.full_name(), update.old_pin()),
    }
}

/// File content split into lines, each keeping its own terminator.
struct FileText {
    lines: Vec<String>,
    endings: Vec<&'static str>,
}

impl FileText {
    fn split(content: &str) -> Self {
        let mut lines = Vec::new();
        let mut endings = Vec::new();
        for piece in content.split_inclusive('\n') {
            let (line, ending) = if let Some(line) = piece.strip_suffix("\r\n") {
                (line, "\r\n")
            } else if let Some(line) = piece.strip_suffix('\n') {
                (line, "\n")
            } else {
                (piece, "")
            };
            lines.push(line.to_string());
            endings.push(ending);
        }
        Self { lines, endings }
    }

    fn join(&self) -> String {
        let mut out = String::new();
        for (line, ending) in self.lines.iter().zip(&self.endings) {
            out.push_str(line);
            out.push_str(ending);
        }
        out
    }

    /// Terminator for lines inserted above `idx`.
    fn ending_for(&self, idx: usize) -> &'static str {
        match self.endings[idx] {
            "" => self
                .endings
                .iter()
                .copied()
                .find(|ending| !ending.is_empty())
                .unwrap_or("\n"),
            ending => ending,
        }
    }

    fn splice(&mut self, range: std::ops::Range<usize>, lines: Vec<String>, ending: &'static str) {
        let count = lines.len();
        self.lines.splice(range.clone(), lines);
        self.endings
            .splice(range, std::iter::repeat_n(ending, count));
    }

    fn remove(&mut self, idx: usize) {
        self.lines.remove(idx);
        self.endings.remove(idx);
    }
}

fn is_provenance(comment: &str) -> bool {
    comment.contains(ORIGINAL_VERSION_MARKER) || comment.contains(OLDER_HASH_MARKER)
}

fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Byte offset just past `full_name@` on `line`, if the line references it.
fn pin_start(line: &str, full_name: &str) -> Option<usize> {
    let needle = format!("{full_name}@");
    line.match_indices(&needle)
        .find(|(at, _)| {
            line[..*at]
                .chars()
                .next_back()
                .is_none_or(|c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')))
        })
        .map(|(at, _)| at + needle.len())
}

fn pin_end(rest: &str) -> usize {
    rest.find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '#'))
        .unwrap_or(rest.len())
}

/// The version or hash written after `full_name@` on `line`.
fn pin_on_line<'a>(line: &'a str, full_name: &str) -> Option<&'a str> {
    let start = pin_start(line, full_name)?;
    let rest = &line[start..];
    Some(&rest[..pin_end(rest)])
}

/// Rewrites the version after `owner/name@` on `line`.
///
/// The old trailing comment is replaced by the update's version comment.
/// Returns `None` if the line does not contain the reference.
pub fn rewrite_line(line: &str, update: &Update) -> Option<String> {
    let start = pin_start(line, &update.action.full_name())?;

    let rest = &line[start..];
    let tail = &rest[pin_end(rest)..];
    let tail = match tail.find('#') {
        Some(hash) => &tail[..hash],
        None => tail,
    }
    .trim_end();

    let comment = if update.version_comment.is_empty() {
        format!("# {}", update.new_version)
    } else {
        update.version_comment.clone()
    };

    Some(format!(
        "{}{}{tail} {comment}",
        &line[..start],
        update.target()
    ))
}

/// Index of the first line of the comment block ending right above `idx`.
fn comment_block_start(lines: &[String], idx: usize) -> usize {
    let mut start = idx;
    while start > 0 && is_comment(&lines[start - 1]) {
        start -= 1;
    }
    start
}

/// Replaces the comments directly above `text.lines[idx]` with `comments`.
///
/// When there are none and the previous line is a step header such as
/// `- name: x`, the header's comment block is where the scanner found the
/// comments: its provenance lines are removed and its other lines are not
/// repeated. Returns the net number of lines inserted.
fn replace_comment_block(text: &mut FileText, idx: usize, comments: &[String]) -> isize {
    let lines = &text.lines;
    let indent = indentation(&lines[idx]).to_string();
    let ending = text.ending_for(idx);
    let block_start = comment_block_start(lines, idx);

    let mut stale = Vec::new();
    let mut kept = HashSet::new();
    if block_start == idx && idx > 0 {
        let header = idx - 1;
        let line = &lines[header];
        if !line.trim().is_empty() && !crate::comments::holds_reference(line) {
            for i in comment_block_start(lines, header)..header {
                if is_provenance(&lines[i]) {
                    stale.push(i);
                } else {
                    kept.insert(lines[i].trim().to_string());
                }
            }
        }
    }

    let block: Vec<String> = comments
        .iter()
        .map(|c| c.trim())
        .filter(|c| !kept.contains(*c))
        .map(|c| format!("{indent}{c}"))
        .collect();
    let inserted = block.len() as isize;
    let removed = (idx - block_start) as isize;
    text.splice(block_start..idx, block, ending);

    for i in stale.iter().rev() {
        text.remove(*i);
    }

    inserted - removed - stale.len() as isize
}

/// Makes `path` absolute and removes `.` and `..` components lexically.
fn absolute_clean(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|err| Error::io(path, err))?;
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    Ok(cleaned)
}
