//! Error types for overlay operations.
//!
//! None of these are fatal to the editor: callers log them and keep the
//! document editable.

use thiserror::Error;

/// A detection-service range that could not be placed in the current document.
///
/// Usually means the document changed between request and response. The
/// offending occurrence is dropped instead of failing the whole update.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MappingError {
    /// The range starts at or beyond the end of the projected text.
    #[error("range {start}..{end} is outside projected text of length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    /// The range is empty, inverted, or covers only block separators.
    #[error("range {start}..{end} maps to no document content")]
    Empty { start: usize, end: usize },
}

/// A modifier that cannot be created as requested.
///
/// Rejected at the interaction layer before anything is dispatched to the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModifierValidationError {
    /// Mask modifiers need a PII type to assign.
    #[error("mask modifier for {entity:?} needs a non-empty type")]
    EmptyMaskType { entity: String },

    /// Modifiers need some literal text to match.
    #[error("modifier text is empty")]
    EmptyEntity,
}
