//! Plain-text projection of a structured document.
//!
//! The detection service sees the document as flat text. Each text char maps
//! 1:1 to a document position; block exits and hard breaks contribute one
//! synthetic newline that has no document position of its own.
//!
//! Projections are rebuilt from a full traversal on every mutation and never
//! patched incrementally.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::document::{Document, WalkEvent};
use crate::error::MappingError;

/// Flattened text plus the offset/position maps in both directions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlainTextProjection {
    text: String,
    /// Document position of each char, `None` for synthetic separators.
    offset_to_pos: Vec<Option<usize>>,
    pos_to_offset: BTreeMap<usize, usize>,
}

impl PlainTextProjection {
    /// Build the projection with a cold traversal of `doc`.
    pub fn build(doc: &Document) -> Self {
        let mut builder = Builder::default();
        doc.walk(&mut |event| match event {
            WalkEvent::Text { text, pos } => {
                for (i, c) in text.chars().enumerate() {
                    builder.push_mapped(c, pos + i);
                }
            }
            WalkEvent::HardBreak { .. } => builder.push_separator(false),
            WalkEvent::LeaveBlock { .. } => {
                if !builder.last_is_block_exit {
                    builder.push_separator(true);
                }
            }
            WalkEvent::EnterBlock { .. } => {}
        });

        let projection = builder.finish();
        tracing::trace!(
            chars = projection.offset_to_pos.len(),
            doc_size = doc.content_size(),
            "built plain text projection"
        );
        projection
    }

    /// The flattened text sent to the detection service.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of the projected text in chars.
    pub fn len(&self) -> usize {
        self.offset_to_pos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offset_to_pos.is_empty()
    }

    /// Document position of the char at `offset`.
    ///
    /// `None` for synthetic separators and offsets past the end.
    pub fn offset_to_pos(&self, offset: usize) -> Option<usize> {
        self.offset_to_pos.get(offset).copied().flatten()
    }

    /// Text offset of the char at document position `pos`.
    pub fn pos_to_offset(&self, pos: usize) -> Option<usize> {
        self.pos_to_offset.get(&pos).copied()
    }

    /// Whether the char at `offset` is a synthetic separator.
    pub fn is_separator(&self, offset: usize) -> bool {
        matches!(self.offset_to_pos.get(offset), Some(None))
    }

    /// Map a text range from the detection service to document positions.
    ///
    /// The start is moved forward and the end backward past any synthetic
    /// separators. An end beyond the text is clamped to the text length.
    pub fn map_range(&self, start: usize, end: usize) -> Result<Range<usize>, MappingError> {
        let len = self.len();
        if start >= end {
            return Err(MappingError::Empty { start, end });
        }
        if start >= len {
            return Err(MappingError::OutOfBounds { start, end, len });
        }
        let clamped_end = end.min(len);

        let first = (start..clamped_end).find_map(|o| self.offset_to_pos(o));
        let last = (start..clamped_end).rev().find_map(|o| self.offset_to_pos(o));
        match (first, last) {
            (Some(from), Some(to)) => Ok(from..to + 1),
            _ => Err(MappingError::Empty { start, end }),
        }
    }

    /// Map a document range back to the text offsets of the chars inside it.
    ///
    /// Positions on block tokens or separators are skipped. `None` when the
    /// range contains no text.
    pub fn offsets_for(&self, range: Range<usize>) -> Option<Range<usize>> {
        if range.start >= range.end {
            return None;
        }
        let mut inside = self.pos_to_offset.range(range);
        let (_, &first) = inside.next()?;
        let last = inside.next_back().map(|(_, &o)| o).unwrap_or(first);
        Some(first..last + 1)
    }

    /// Chars in `range` of the projected text.
    pub fn slice(&self, range: Range<usize>) -> String {
        self.text
            .chars()
            .skip(range.start)
            .take(range.end.saturating_sub(range.start))
            .collect()
    }

    /// Whether `range` of the projected text contains a synthetic separator.
    pub fn crosses_separator(&self, range: Range<usize>) -> bool {
        range.into_iter().any(|o| self.is_separator(o))
    }

    /// Whether both projections carry the same text.
    ///
    /// Formatting-only edits shift no text and compare equal.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

#[derive(Default)]
struct Builder {
    text: String,
    offset_to_pos: Vec<Option<usize>>,
    pos_to_offset: BTreeMap<usize, usize>,
    last_is_block_exit: bool,
}

impl Builder {
    fn push_mapped(&mut self, c: char, pos: usize) {
        self.pos_to_offset.insert(pos, self.offset_to_pos.len());
        self.offset_to_pos.push(Some(pos));
        self.text.push(c);
        self.last_is_block_exit = false;
    }

    /// Separators only go between text; nothing is emitted before the
    /// first char.
    fn push_separator(&mut self, block_exit: bool) {
        if self.text.is_empty() {
            return;
        }
        self.offset_to_pos.push(None);
        self.text.push('\n');
        self.last_is_block_exit = block_exit;
    }

    fn finish(mut self) -> PlainTextProjection {
        while matches!(self.offset_to_pos.last(), Some(None)) {
            self.offset_to_pos.pop();
            self.text.pop();
        }
        PlainTextProjection {
            text: self.text,
            offset_to_pos: self.offset_to_pos,
            pos_to_offset: self.pos_to_offset,
        }
    }
}
