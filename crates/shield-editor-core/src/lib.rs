//! shield-editor-core: PII overlay logic for structured document editors,
//! without framework or network dependencies.
//!
//! This crate provides:
//! - `Document` - immutable snapshot of the host editor's node tree
//! - `PlainTextProjection` - flattened text with offset/position maps
//! - `EntityStore<P>` - scoped entity and modifier state over a `ScopedStore`
//! - `render_decorations` - highlight regions with modifier precedence
//! - `ModifierInteraction` - sans-IO hover/selection menu state machine

pub mod decorations;
pub mod document;
pub mod error;
pub mod interaction;
pub mod projection;
pub mod store;
pub mod text_helpers;
pub mod types;

pub use decorations::{Decoration, DecorationKind, DecorationSet, render_decorations};
pub use document::{BlockKind, Document, Mark, Node, WalkEvent, WordAt};
pub use error::{MappingError, ModifierValidationError};
pub use interaction::{
    InteractionContext, InteractionEffect, InteractionEvent, InteractionState, InteractionTimings,
    LabelKey, MenuKind, ModifierCommand, ModifierInteraction, SelectionChoice, apply_command,
};
pub use projection::PlainTextProjection;
pub use smol_str::SmolStr;
pub use store::{EntityStore, KnownEntity, MemoryScopedStore, ScopeState, ScopedStore};
pub use text_helpers::{PREDEFINED_LABELS, find_best_label_match, find_bounded_matches, tokenize_selection};
pub use types::{Modifier, ModifierAction, PiiEntity, PiiOccurrence, Scope, Selection};
pub use web_time::Instant;
