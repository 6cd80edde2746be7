//! Structured document snapshot.
//!
//! The host editor owns the live document model; it hands us an immutable
//! snapshot of the node tree after each mutation. Positions follow the usual
//! tree-editor convention:
//! - a text node occupies one position per char
//! - a leaf inline node (hard break) occupies one position
//! - a block occupies its content size plus two (open and close tokens)
//!
//! The root has no tokens of its own, so its content starts at position 0 and
//! the first paragraph's text starts at position 1.

use std::ops::Range;

use smol_str::SmolStr;

use crate::text_helpers::is_word_char;

/// Kind of a block node. Only used for logging and host round-tripping;
/// every block contributes the same separator to the projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    Blockquote,
    BulletList,
    OrderedList,
    ListItem,
    CodeBlock,
    Other(SmolStr),
}

/// Inline formatting carried by a text node. Marks never affect positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mark {
    Bold,
    Italic,
    Underline,
    Code,
    Link(SmolStr),
    Other(SmolStr),
}

/// A node in the document tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Block { kind: BlockKind, children: Vec<Node> },
    Text { text: String, marks: Vec<Mark> },
    HardBreak,
}

impl Node {
    /// A paragraph containing the given inline nodes.
    pub fn paragraph(children: Vec<Node>) -> Self {
        Self::Block {
            kind: BlockKind::Paragraph,
            children,
        }
    }

    /// A block of arbitrary kind.
    pub fn block(kind: BlockKind, children: Vec<Node>) -> Self {
        Self::Block { kind, children }
    }

    /// Unformatted text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            marks: Vec::new(),
        }
    }

    /// Text with marks applied.
    pub fn marked(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        Self::Text {
            text: text.into(),
            marks,
        }
    }

    /// Number of positions this node occupies.
    pub fn node_size(&self) -> usize {
        match self {
            Self::Block { children, .. } => children.iter().map(Node::node_size).sum::<usize>() + 2,
            Self::Text { text, .. } => text.chars().count(),
            Self::HardBreak => 1,
        }
    }
}

/// One step of a document traversal, with absolute positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkEvent<'a> {
    /// Entering a block whose open token sits at `pos`.
    EnterBlock { kind: &'a BlockKind, pos: usize },
    /// A text node whose first char sits at `pos`.
    Text { text: &'a str, pos: usize },
    /// A hard break at `pos`.
    HardBreak { pos: usize },
    /// Leaving a block; `end` is the position just past its close token.
    LeaveBlock { kind: &'a BlockKind, end: usize },
}

/// The word under a position, as found by [`Document::word_at`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordAt {
    pub range: Range<usize>,
    pub text: String,
}

/// Immutable snapshot of a structured document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    children: Vec<Node>,
    content_size: usize,
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        let content_size = children.iter().map(Node::node_size).sum();
        Self {
            children,
            content_size,
        }
    }

    /// One plain paragraph per line of input.
    pub fn from_paragraphs<S: AsRef<str>>(paragraphs: &[S]) -> Self {
        Self::new(
            paragraphs
                .iter()
                .map(|p| {
                    let text = p.as_ref();
                    if text.is_empty() {
                        Node::paragraph(Vec::new())
                    } else {
                        Node::paragraph(vec![Node::text(text)])
                    }
                })
                .collect(),
        )
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Total size of the root content. Valid positions are `0..=content_size`.
    pub fn content_size(&self) -> usize {
        self.content_size
    }

    pub fn is_empty(&self) -> bool {
        self.content_size == 0
    }

    /// Visit every node in document order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(WalkEvent<'a>)) {
        walk_nodes(&self.children, 0, visit);
    }

    /// Concatenated text of all text nodes intersecting `from..to`.
    ///
    /// No separators are inserted at block boundaries or hard breaks.
    pub fn text_between(&self, from: usize, to: usize) -> String {
        let mut out = String::new();
        if from >= to {
            return out;
        }
        self.walk(&mut |event| {
            if let WalkEvent::Text { text, pos } = event {
                let node_end = pos + text.chars().count();
                if node_end <= from || pos >= to {
                    return;
                }
                out.extend(
                    text.chars()
                        .enumerate()
                        .filter(|(i, _)| (from..to).contains(&(pos + i)))
                        .map(|(_, c)| c),
                );
            }
        });
        out
    }

    /// Character at a text position, if that position holds text.
    pub fn char_at(&self, target: usize) -> Option<char> {
        let mut found = None;
        self.walk(&mut |event| {
            if found.is_some() {
                return;
            }
            if let WalkEvent::Text { text, pos } = event {
                if target >= pos {
                    found = text.chars().nth(target - pos);
                }
            }
        });
        found
    }

    /// Find the word-character run around `pos`.
    ///
    /// Words never cross text-node boundaries. Returns `None` when `pos` is
    /// not touching a word, or the word is shorter than two chars.
    pub fn word_at(&self, target: usize) -> Option<WordAt> {
        let mut found = None;
        let mut decided = false;
        self.walk(&mut |event| {
            if decided {
                return;
            }
            let WalkEvent::Text { text, pos } = event else {
                return;
            };
            let chars: Vec<char> = text.chars().collect();
            let node_end = pos + chars.len();
            if target < pos || target > node_end {
                return;
            }

            let relative = target - pos;
            let mut start = relative;
            while start > 0 && is_word_char(chars[start - 1]) {
                start -= 1;
            }
            let mut end = relative;
            while end < chars.len() && is_word_char(chars[end]) {
                end += 1;
            }
            let hit = (end - start >= 2).then(|| WordAt {
                range: pos + start..pos + end,
                text: chars[start..end].iter().collect(),
            });

            // A node strictly containing the position decides; a node merely
            // ending there only provides a fallback.
            if target < node_end {
                decided = true;
                if hit.is_some() {
                    found = hit;
                }
            } else if found.is_none() {
                found = hit;
            }
        });
        found
    }
}

fn walk_nodes<'a>(nodes: &'a [Node], mut pos: usize, visit: &mut impl FnMut(WalkEvent<'a>)) -> usize {
    for node in nodes {
        match node {
            Node::Block { kind, children } => {
                visit(WalkEvent::EnterBlock { kind, pos });
                let inner_end = walk_nodes(children, pos + 1, visit);
                let end = inner_end + 1;
                visit(WalkEvent::LeaveBlock { kind, end });
                pos = end;
            }
            Node::Text { text, .. } => {
                visit(WalkEvent::Text { text, pos });
                pos += text.chars().count();
            }
            Node::HardBreak => {
                visit(WalkEvent::HardBreak { pos });
                pos += 1;
            }
        }
    }
    pos
}
