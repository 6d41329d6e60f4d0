//! Line-oriented comment association.
//!
//! The YAML parser drops comments, so they are collected from the raw text in
//! a separate pass. Contiguous `#` lines form a group that belongs to the next
//! content line; blank lines between the group and that line are allowed.

use std::collections::HashMap;

/// Comment groups keyed by the 1-indexed line they sit above.
#[derive(Debug, Default)]
pub struct CommentIndex {
    groups: HashMap<usize, Vec<String>>,
    reference_lines: Vec<bool>,
}

impl CommentIndex {
    pub fn build(source: &str) -> Self {
        let mut groups = HashMap::new();
        let mut reference_lines = Vec::new();
        let mut buffer: Vec<String> = Vec::new();

        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            reference_lines.push(holds_reference(raw));

            if is_comment(raw) {
                buffer.push(trimmed.to_string());
            } else if !trimmed.is_empty() && !buffer.is_empty() {
                groups.insert(line, std::mem::take(&mut buffer));
            }
        }

        Self {
            groups,
            reference_lines,
        }
    }

    /// Comments for a reference whose value sits on `line`.
    ///
    /// Includes the group above the previous line when that line does not
    /// carry a reference of its own, which covers both `- name:` headers and
    /// a `uses:` key whose value continues on the next line.
    pub fn comments_for(&self, line: usize) -> Vec<String> {
        let mut comments = Vec::new();
        if line > 1 && !self.is_reference_line(line - 1) {
            if let Some(group) = self.groups.get(&(line - 1)) {
                comments.extend(group.iter().cloned());
            }
        }
        if let Some(group) = self.groups.get(&line) {
            comments.extend(group.iter().cloned());
        }
        comments
    }

    fn is_reference_line(&self, line: usize) -> bool {
        line >= 1 && self.reference_lines.get(line - 1).copied().unwrap_or(false)
    }
}

pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// True when the line has a `uses:` key with a value on the same line.
pub fn holds_reference(line: &str) -> bool {
    let trimmed = line.trim_start();
    let trimmed = trimmed.strip_prefix('-').map_or(trimmed, str::trim_start);
    let Some(value) = trimmed.strip_prefix("uses:") else {
        return false;
    };
    let value = value.trim();
    !value.is_empty() && !value.starts_with('#')
}
