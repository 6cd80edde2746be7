//! Core overlay types: scopes, detected entities, user modifiers and selections.
//!
//! These types are framework-agnostic. They serialize to the persisted
//! per-scope layout, so the field names here are a storage contract.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr, format_smolstr};

use crate::error::ModifierValidationError;

/// Persistence boundary for entities and modifiers.
///
/// Either a single conversation or the shared "global" scope used before a
/// conversation exists (e.g. a fresh chat input).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// State bound to one conversation.
    Conversation(SmolStr),
    /// State shared by every editor without a conversation.
    #[default]
    Global,
}

impl Scope {
    /// Build a scope from an optional conversation id.
    ///
    /// Empty ids map to [`Scope::Global`], matching hosts that pass `""`
    /// for "no conversation yet".
    pub fn from_conversation(id: Option<&str>) -> Self {
        match id {
            Some(id) if !id.is_empty() => Self::Conversation(id.to_smolstr()),
            _ => Self::Global,
        }
    }

    /// The conversation id, if this is a conversation scope.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Conversation(id) => Some(id.as_str()),
            Self::Global => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// One concrete location of an entity, in structured-document positions.
///
/// Invariant: `start < end`, both within the document it was mapped against.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PiiOccurrence {
    #[serde(rename = "start_idx")]
    pub start: usize,
    #[serde(rename = "end_idx")]
    pub end: usize,
}

impl PiiOccurrence {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check the occurrence is non-empty and fits in a document of `doc_size`.
    pub fn is_valid_within(&self, doc_size: usize) -> bool {
        self.start < self.end && self.end <= doc_size
    }
}

impl From<Range<usize>> for PiiOccurrence {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// A detected piece of sensitive text.
///
/// `label` is the identity key the detection service assigns (e.g. `PERSON_1`);
/// it stays stable across repeated detections, and masking state is keyed by it.
/// All occurrences of one label share one `should_mask` flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiEntity {
    pub label: SmolStr,
    pub raw_text: String,
    #[serde(rename = "type")]
    pub pii_type: SmolStr,
    pub occurrences: Vec<PiiOccurrence>,
    #[serde(default = "default_should_mask")]
    pub should_mask: bool,
}

fn default_should_mask() -> bool {
    true
}

impl PiiEntity {
    /// Create a new entity. New PII starts masked.
    pub fn new(
        label: impl Into<SmolStr>,
        raw_text: impl Into<String>,
        pii_type: impl Into<SmolStr>,
        occurrences: Vec<PiiOccurrence>,
    ) -> Self {
        Self {
            label: label.into(),
            raw_text: raw_text.into(),
            pii_type: pii_type.into(),
            occurrences,
            should_mask: true,
        }
    }

    pub fn with_masking(mut self, should_mask: bool) -> Self {
        self.should_mask = should_mask;
        self
    }

    /// Lowercased entity text, the key modifiers are matched against.
    pub fn text_key(&self) -> String {
        self.raw_text.to_lowercase()
    }
}

/// What a modifier does to the text it matches.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModifierAction {
    /// Never treat this text as PII.
    Ignore,
    /// Always treat this text as PII of the given type.
    Mask(SmolStr),
}

impl ModifierAction {
    pub fn is_ignore(&self) -> bool {
        matches!(self, Self::Ignore)
    }

    pub fn is_mask(&self) -> bool {
        matches!(self, Self::Mask(_))
    }

    /// The PII type a mask action assigns.
    pub fn pii_type(&self) -> Option<&str> {
        match self {
            Self::Ignore => None,
            Self::Mask(ty) => Some(ty.as_str()),
        }
    }

    /// Short action name used for rendering and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Mask(_) => "mask",
        }
    }
}

/// A user-authored override keyed by literal text.
///
/// A modifier applies to every occurrence of its text in the live document,
/// compared case-insensitively, not to a fixed span.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ModifierRecord", into = "ModifierRecord")]
pub struct Modifier {
    pub id: SmolStr,
    pub action: ModifierAction,
    pub entity: String,
}

/// Persisted shape of a modifier: `{id, action, entity, type}`.
#[derive(Serialize, Deserialize)]
struct ModifierRecord {
    id: SmolStr,
    action: ActionName,
    entity: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pii_type: Option<SmolStr>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ActionName {
    Ignore,
    Mask,
}

impl TryFrom<ModifierRecord> for Modifier {
    type Error = ModifierValidationError;

    fn try_from(record: ModifierRecord) -> Result<Self, Self::Error> {
        let action = match (record.action, record.pii_type) {
            (ActionName::Ignore, _) => ModifierAction::Ignore,
            (ActionName::Mask, Some(ty)) if !ty.trim().is_empty() => ModifierAction::Mask(ty),
            (ActionName::Mask, _) => {
                return Err(ModifierValidationError::EmptyMaskType {
                    entity: record.entity,
                });
            }
        };
        Ok(Self {
            id: record.id,
            action,
            entity: record.entity,
        })
    }
}

impl From<Modifier> for ModifierRecord {
    fn from(modifier: Modifier) -> Self {
        let (action, pii_type) = match modifier.action {
            ModifierAction::Ignore => (ActionName::Ignore, None),
            ModifierAction::Mask(ty) => (ActionName::Mask, Some(ty)),
        };
        Self {
            id: modifier.id,
            action,
            entity: modifier.entity,
            pii_type,
        }
    }
}

impl Modifier {
    /// Create an ignore modifier for `entity`.
    pub fn ignore(entity: impl Into<String>) -> Result<Self, ModifierValidationError> {
        let entity = validate_entity_text(entity.into())?;
        Ok(Self {
            id: generate_modifier_id(),
            action: ModifierAction::Ignore,
            entity,
        })
    }

    /// Create a mask modifier assigning `pii_type` to `entity`.
    ///
    /// The type is trimmed and uppercased; an empty type is rejected.
    pub fn mask(
        entity: impl Into<String>,
        pii_type: &str,
    ) -> Result<Self, ModifierValidationError> {
        let entity = validate_entity_text(entity.into())?;
        let pii_type = pii_type.trim();
        if pii_type.is_empty() {
            return Err(ModifierValidationError::EmptyMaskType { entity });
        }
        Ok(Self {
            id: generate_modifier_id(),
            action: ModifierAction::Mask(pii_type.to_uppercase().to_smolstr()),
            entity,
        })
    }

    /// Lowercased entity text; at most one modifier per key per scope.
    pub fn text_key(&self) -> String {
        self.entity.to_lowercase()
    }

    /// Case-insensitive comparison against literal text.
    pub fn matches(&self, text: &str) -> bool {
        self.entity.to_lowercase() == text.to_lowercase()
    }
}

fn validate_entity_text(entity: String) -> Result<String, ModifierValidationError> {
    if entity.trim().is_empty() {
        return Err(ModifierValidationError::EmptyEntity);
    }
    Ok(entity)
}

fn generate_modifier_id() -> SmolStr {
    format_smolstr!("modifier_{}", uuid::Uuid::now_v7().simple())
}

/// Text selection with anchor and head positions.
///
/// The anchor is where the selection started, the head is where the pointer is now.
/// They may be in any order - use `start()` and `end()` for ordered bounds.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Where selection started
    pub anchor: usize,
    /// Where the pointer is now
    pub head: usize,
}

impl Selection {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    /// Create a collapsed selection (cursor position).
    pub fn collapsed(offset: usize) -> Self {
        Self {
            anchor: offset,
            head: offset,
        }
    }

    pub fn start(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn end(&self) -> usize {
        self.anchor.max(self.head)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    /// Convert to an ordered `Range<usize>`.
    pub fn to_range(&self) -> Range<usize> {
        self.start()..self.end()
    }
}
