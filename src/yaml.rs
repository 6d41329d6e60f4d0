//! YAML node tree and `uses:` walker.
//!
//! Builds a small node tree from yaml-rust2's marked event stream so every
//! node keeps its source line and anchor id. Aliases are kept unresolved in
//! the tree; the walker resolves them on demand, which lets it attribute
//! references found behind `<<: *anchor` to the alias site.

use crate::comments::CommentIndex;
use crate::error::{Error, Result};
use crate::reference::{ActionReference, parse_action_reference};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::Marker;

/// Alias chains deeper than this are not followed.
pub const MAX_ALIAS_DEPTH: usize = 64;

/// Total alias resolutions allowed per document. Nested aliases fan out
/// multiplicatively, so depth alone does not bound the walk.
pub const MAX_ALIAS_EXPANSIONS: usize = 10_000;

const USES_KEY: &str = "uses";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Scalar(String),
    Sequence(Vec<Node>),
    Mapping(Vec<(Node, Node)>),
    /// Reference to the anchor with this id.
    Alias(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    /// Line number, 1-indexed.
    pub line: usize,
    /// Anchor id assigned by the parser, if the node carries `&name`.
    pub anchor: Option<usize>,
}

impl Node {
    fn new(kind: NodeKind, mark: Marker, anchor_id: usize) -> Self {
        Self {
            kind,
            line: mark.line(),
            anchor: (anchor_id != 0).then_some(anchor_id),
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

/// The first document of a YAML stream with its anchor table.
#[derive(Debug)]
pub struct Document {
    pub root: Node,
    anchors: HashMap<usize, Node>,
    aliased: HashSet<usize>,
}

impl Document {
    /// Parses `source`, failing with `EmptyDocument` when it has no content.
    pub fn parse(source: &str, path: &Path) -> Result<Self> {
        let mut builder = TreeBuilder::default();
        let mut parser = Parser::new(source.chars());
        parser
            .load(&mut builder, false)
            .map_err(|err| Error::YamlSyntax {
                path: path.to_path_buf(),
                line: err.marker().line(),
                column: err.marker().col() + 1,
                message: err.info().to_string(),
            })?;

        let root = builder
            .root
            .ok_or_else(|| Error::EmptyDocument(path.to_path_buf()))?;
        // A bare `---` yields a null scalar rather than no document at all.
        if matches!(&root.kind, NodeKind::Scalar(value) if value.is_empty() || value == "~") {
            return Err(Error::EmptyDocument(path.to_path_buf()));
        }

        Ok(Self {
            root,
            anchors: builder.anchors,
            aliased: builder.aliased,
        })
    }

    pub fn anchor(&self, id: usize) -> Option<&Node> {
        self.anchors.get(&id)
    }

    /// True when some alias in the document points at anchor `id`.
    pub fn is_aliased(&self, id: usize) -> bool {
        self.aliased.contains(&id)
    }
}

struct OpenNode {
    node: Node,
    pending_key: Option<Node>,
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<OpenNode>,
    root: Option<Node>,
    anchors: HashMap<usize, Node>,
    aliased: HashSet<usize>,
}

impl TreeBuilder {
    fn open(&mut self, kind: NodeKind, mark: Marker, anchor_id: usize) {
        self.stack.push(OpenNode {
            node: Node::new(kind, mark, anchor_id),
            pending_key: None,
        });
    }

    fn close(&mut self) {
        if let Some(open) = self.stack.pop() {
            self.insert(open.node);
        }
    }

    fn insert(&mut self, node: Node) {
        if let Some(id) = node.anchor {
            self.anchors.insert(id, node.clone());
        }

        let Some(parent) = self.stack.last_mut() else {
            self.root.get_or_insert(node);
            return;
        };
        match &mut parent.node.kind {
            NodeKind::Sequence(items) => items.push(node),
            NodeKind::Mapping(entries) => match parent.pending_key.take() {
                Some(key) => entries.push((key, node)),
                None => parent.pending_key = Some(node),
            },
            NodeKind::Scalar(_) | NodeKind::Alias(_) => {}
        }
    }
}

impl MarkedEventReceiver for TreeBuilder {
    fn on_event(&mut self, event: Event, mark: Marker) {
        match event {
            Event::MappingStart(anchor_id, ..) => {
                self.open(NodeKind::Mapping(Vec::new()), mark, anchor_id)
            }
            Event::SequenceStart(anchor_id, ..) => {
                self.open(NodeKind::Sequence(Vec::new()), mark, anchor_id)
            }
            Event::MappingEnd | Event::SequenceEnd => self.close(),
            Event::Scalar(value, _, anchor_id, ..) => {
                self.insert(Node::new(NodeKind::Scalar(value), mark, anchor_id))
            }
            Event::Alias(id) => {
                self.aliased.insert(id);
                self.insert(Node::new(NodeKind::Alias(id), mark, 0));
            }
            _ => {}
        }
    }
}

/// Collects every `uses:` reference in a document.
pub struct ReferenceWalker<'a> {
    document: &'a Document,
    comments: &'a CommentIndex,
    path: &'a Path,
    resolving: HashSet<usize>,
    expansions: usize,
    seen: HashSet<(usize, String, String, String)>,
    references: Vec<ActionReference>,
}

impl<'a> ReferenceWalker<'a> {
    pub fn new(document: &'a Document, comments: &'a CommentIndex, path: &'a Path) -> Self {
        Self {
            document,
            comments,
            path,
            resolving: HashSet::new(),
            expansions: 0,
            seen: HashSet::new(),
            references: Vec::new(),
        }
    }

    pub fn walk(mut self) -> Result<Vec<ActionReference>> {
        let document = self.document;
        self.visit(&document.root, None)?;
        Ok(self.references)
    }

    /// `site` is the alias line when the node is being visited through an alias.
    fn visit(&mut self, node: &Node, site: Option<usize>) -> Result<()> {
        // Aliased anchors are reported where they are used, not where defined.
        if site.is_none() && node.anchor.is_some_and(|id| self.document.is_aliased(id)) {
            return Ok(());
        }

        match &node.kind {
            NodeKind::Scalar(_) => Ok(()),
            // `<<: *anchor` and `<<: [*a, *b]` both end up here.
            NodeKind::Alias(id) => self.follow(*id, site.unwrap_or(node.line)),
            NodeKind::Sequence(items) => {
                for item in items {
                    self.visit(item, site)?;
                }
                Ok(())
            }
            NodeKind::Mapping(entries) => {
                for (key, value) in entries {
                    match key.as_scalar() {
                        Some(USES_KEY) => self.record(value, site)?,
                        _ => self.visit(value, site)?,
                    }
                }
                Ok(())
            }
        }
    }

    fn follow(&mut self, id: usize, site: usize) -> Result<()> {
        self.expansions += 1;
        if self.expansions > MAX_ALIAS_EXPANSIONS {
            return Err(Error::AliasExpansionLimit {
                path: self.path.to_path_buf(),
                limit: MAX_ALIAS_EXPANSIONS,
            });
        }
        if self.resolving.len() >= MAX_ALIAS_DEPTH || !self.resolving.insert(id) {
            debug!(path = %self.path.display(), line = site, anchor = id, "skipping cyclic alias");
            return Ok(());
        }
        let document = self.document;
        let result = match document.anchor(id) {
            Some(target) => self.visit(target, Some(site)),
            None => Ok(()),
        };
        self.resolving.remove(&id);
        result
    }

    fn record(&mut self, value: &Node, site: Option<usize>) -> Result<()> {
        let document = self.document;
        let (text, line) = match &value.kind {
            NodeKind::Scalar(text) => (text.as_str(), site.unwrap_or(value.line)),
            NodeKind::Alias(id) => {
                let Some(text) = document.anchor(*id).and_then(Node::as_scalar) else {
                    return Ok(());
                };
                (text, site.unwrap_or(value.line))
            }
            _ => {
                debug!(path = %self.path.display(), line = value.line, "ignoring non-scalar uses value");
                return Ok(());
            }
        };

        let text = text.trim();
        if is_local_or_container(text) {
            debug!(path = %self.path.display(), line, reference = text, "skipping non-repository action");
            return Ok(());
        }

        let comments = self.comments.comments_for(line);
        let mut reference = parse_action_reference(text, self.path, &comments)?;
        reference.line = line;

        let key = (
            line,
            reference.owner.clone(),
            reference.name.clone(),
            reference.version.clone(),
        );
        if self.seen.insert(key) {
            self.references.push(reference);
        }
        Ok(())
    }
}

fn is_local_or_container(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("docker://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(source: &str) -> Result<Vec<ActionReference>> {
        let path = Path::new("workflow.yml");
        let document = Document::parse(source, path)?;
        let comments = CommentIndex::build(source);
        ReferenceWalker::new(&document, &comments, path).walk()
    }

    fn summary(refs: &[ActionReference]) -> Vec<(usize, String)> {
        refs.iter().map(|r| (r.line, r.to_string())).collect()
    }

    #[test]
    fn records_scalar_lines_and_anchors() {
        let source = "a: &x\n  b: 1\nc: *x\n";
        let document = Document::parse(source, Path::new("t.yml")).unwrap();
        let NodeKind::Mapping(entries) = &document.root.kind else {
            panic!("expected mapping");
        };
        assert_eq!(entries[0].0.line, 1);
        assert_eq!(entries[1].1.kind, NodeKind::Alias(1));
        assert_eq!(entries[1].1.line, 3);
        assert!(document.is_aliased(1));
        assert!(document.anchor(1).is_some());
    }

    #[test]
    fn finds_uses_in_nested_steps() {
        let source = "\
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Node
        uses: actions/setup-node@v4
        with:
          node-version: 20
      - run: npm test
";
        let refs = walk(source).unwrap();
        assert_eq!(
            summary(&refs),
            vec![
                (6, "actions/checkout@v4".to_string()),
                (8, "actions/setup-node@v4".to_string()),
            ]
        );
    }

    #[test]
    fn merge_key_reports_alias_site() {
        let source = "\
x-common: &common_step
  uses: actions/checkout@v2
jobs:
  build:
    steps:
      - <<: *common_step
        name: Checkout
";
        let refs = walk(source).unwrap();
        assert_eq!(summary(&refs), vec![(6, "actions/checkout@v2".to_string())]);
    }

    #[test]
    fn each_alias_site_is_reported() {
        let source = "\
x-common: &common_step
  uses: actions/checkout@v2
jobs:
  a:
    steps:
      - <<: *common_step
  b:
    steps:
      - <<: *common_step
";
        let refs = walk(source).unwrap();
        assert_eq!(
            summary(&refs),
            vec![
                (6, "actions/checkout@v2".to_string()),
                (9, "actions/checkout@v2".to_string()),
            ]
        );
    }

    #[test]
    fn unaliased_anchor_is_reported_in_place() {
        let source = "\
steps:
  - &checkout
    uses: actions/checkout@v4
";
        let refs = walk(source).unwrap();
        assert_eq!(summary(&refs), vec![(3, "actions/checkout@v4".to_string())]);
    }

    #[test]
    fn plain_alias_to_step_list() {
        let source = "\
x-steps: &steps
  - uses: actions/checkout@v4
  - uses: actions/cache@v4
jobs:
  build:
    steps: *steps
";
        let refs = walk(source).unwrap();
        assert_eq!(
            summary(&refs),
            vec![
                (6, "actions/checkout@v4".to_string()),
                (6, "actions/cache@v4".to_string()),
            ]
        );
    }

    #[test]
    fn duplicate_alias_on_same_line_is_recorded_once() {
        let source = "\
x-a: &a
  uses: actions/checkout@v4
steps: [*a, *a]
";
        let refs = walk(source).unwrap();
        assert_eq!(summary(&refs), vec![(3, "actions/checkout@v4".to_string())]);
    }

    #[test]
    fn self_referencing_anchor_terminates() {
        let source = "\
base: &base
  uses: actions/checkout@v4
  child:
    <<: *base
use: *base
";
        let refs = walk(source).unwrap();
        assert_eq!(summary(&refs), vec![(5, "actions/checkout@v4".to_string())]);
    }

    fn nested_aliases(levels: usize) -> String {
        let mut source = String::from("a0: &a0 {uses: actions/checkout@v4}\n");
        for level in 1..=levels {
            let prev = format!("*a{}", level - 1);
            let items = vec![prev.as_str(); 10].join(", ");
            source.push_str(&format!("a{level}: &a{level} [{items}]\n"));
        }
        source
    }

    #[test]
    fn nested_aliases_within_budget() {
        let refs = walk(&nested_aliases(3)).unwrap();
        assert_eq!(summary(&refs), vec![(4, "actions/checkout@v4".to_string())]);
    }

    #[test]
    fn alias_fan_out_is_bounded() {
        let start = std::time::Instant::now();
        let err = walk(&nested_aliases(7)).unwrap_err();
        assert!(matches!(
            err,
            Error::AliasExpansionLimit {
                limit: MAX_ALIAS_EXPANSIONS,
                ..
            }
        ));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn uses_value_through_scalar_alias() {
        let source = "\
x-ref: &ref actions/cache@v3
steps:
  - uses: *ref
";
        let refs = walk(source).unwrap();
        assert_eq!(summary(&refs), vec![(3, "actions/cache@v3".to_string())]);
    }

    #[test]
    fn skips_local_and_docker_actions() {
        let source = "\
steps:
  - uses: ./.github/actions/setup
  - uses: docker://alpine:3.19
  - uses: actions/checkout@v4
";
        let refs = walk(source).unwrap();
        assert_eq!(summary(&refs), vec![(4, "actions/checkout@v4".to_string())]);
    }

    #[test]
    fn attaches_comments() {
        let source = "\
steps:
  # Using older hash from v3
  # Original version: v3
  - uses: actions/checkout@8e5e7e5ab8b370d6c329ec480221332ada57f0ab # v3
";
        let refs = walk(source).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].version, "v3");
        assert_eq!(
            refs[0].comments,
            vec!["# Using older hash from v3", "# Original version: v3"]
        );
    }

    #[test]
    fn malformed_uses_fails() {
        let err = walk("steps:\n  - uses: actions/checkout\n").unwrap_err();
        assert!(matches!(err, Error::InvalidReferenceFormat { .. }));
    }

    #[test]
    fn empty_document_fails() {
        let err = Document::parse("", Path::new("empty.yml")).unwrap_err();
        assert!(matches!(err, Error::EmptyDocument(_)));
        let err = Document::parse("# only a comment\n", Path::new("c.yml")).unwrap_err();
        assert!(matches!(err, Error::EmptyDocument(_)));
    }

    #[test]
    fn empty_mapping_has_no_references() {
        assert!(walk("{}").unwrap().is_empty());
    }

    #[test]
    fn syntax_error_carries_position() {
        let err = Document::parse("a: [1, 2\nb: c\n", Path::new("bad.yml")).unwrap_err();
        assert!(matches!(err, Error::YamlSyntax { .. }));
    }
}
