//! Highlight regions for detected PII and user modifiers.
//!
//! Rendering is a pure function of entities, modifiers and the current
//! document. Hosts map each [`Decoration`] to an inline decoration using
//! [`Decoration::css_class`] and [`Decoration::attributes`].

use std::ops::Range;

use smol_str::SmolStr;

use crate::document::Document;
use crate::projection::PlainTextProjection;
use crate::text_helpers::find_bounded_matches;
use crate::types::{Modifier, ModifierAction, PiiEntity};

/// What a highlight region represents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecorationKind {
    /// Automatic highlight of one entity occurrence.
    Pii {
        label: SmolStr,
        pii_type: SmolStr,
        raw_text: String,
        entity_index: usize,
        occurrence_index: usize,
        masked: bool,
    },
    /// Highlight of one literal match of a modifier.
    Modifier {
        modifier_id: SmolStr,
        entity: String,
        action: ModifierAction,
    },
}

/// A highlight over a document range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoration {
    pub range: Range<usize>,
    pub kind: DecorationKind,
}

impl Decoration {
    pub fn is_modifier(&self) -> bool {
        matches!(self.kind, DecorationKind::Modifier { .. })
    }

    /// Whether `pos` falls inside this decoration. The end is inclusive so
    /// a pointer resting on the trailing edge still hits.
    pub fn contains(&self, pos: usize) -> bool {
        self.range.start <= pos && pos <= self.range.end
    }

    pub fn css_class(&self) -> &'static str {
        match &self.kind {
            DecorationKind::Pii { masked: true, .. } => "pii-highlight pii-masked",
            DecorationKind::Pii { masked: false, .. } => "pii-highlight pii-unmasked",
            DecorationKind::Modifier {
                action: ModifierAction::Ignore,
                ..
            } => "pii-modifier-highlight pii-modifier-ignore",
            DecorationKind::Modifier {
                action: ModifierAction::Mask(_),
                ..
            } => "pii-modifier-highlight pii-modifier-mask",
        }
    }

    /// Data attributes carried by the rendered element.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        match &self.kind {
            DecorationKind::Pii {
                label,
                pii_type,
                raw_text,
                entity_index,
                occurrence_index,
                masked,
            } => vec![
                ("data-pii-type", pii_type.to_string()),
                ("data-pii-label", label.to_string()),
                ("data-pii-text", raw_text.clone()),
                ("data-pii-occurrence", occurrence_index.to_string()),
                ("data-should-mask", masked.to_string()),
                ("data-entity-index", entity_index.to_string()),
            ],
            DecorationKind::Modifier {
                modifier_id,
                entity,
                action,
            } => vec![
                ("data-modifier-entity", entity.clone()),
                ("data-modifier-action", action.name().to_string()),
                (
                    "data-modifier-type",
                    action.pii_type().unwrap_or_default().to_string(),
                ),
                ("data-modifier-id", modifier_id.to_string()),
            ],
        }
    }
}

/// Decorations split into layers. Modifier regions render above PII regions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecorationSet {
    pii: Vec<Decoration>,
    modifiers: Vec<Decoration>,
}

impl DecorationSet {
    pub fn pii(&self) -> &[Decoration] {
        &self.pii
    }

    pub fn modifiers(&self) -> &[Decoration] {
        &self.modifiers
    }

    /// All decorations bottom layer first.
    pub fn iter(&self) -> impl Iterator<Item = &Decoration> {
        self.pii.iter().chain(self.modifiers.iter())
    }

    pub fn len(&self) -> usize {
        self.pii.len() + self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pii.is_empty() && self.modifiers.is_empty()
    }

    /// Top-most decoration under `pos`.
    pub fn hit_test(&self, pos: usize) -> Option<&Decoration> {
        self.modifiers
            .iter()
            .find(|d| d.contains(pos))
            .or_else(|| self.pii.iter().find(|d| d.contains(pos)))
    }
}

/// Compute the highlight regions for the current document.
///
/// Entities whose text has a modifier are not highlighted automatically; the
/// modifier's own highlight covers that text instead. Occurrences outside the
/// document are skipped.
pub fn render_decorations(
    entities: &[PiiEntity],
    modifiers: &[Modifier],
    doc: &Document,
    projection: &PlainTextProjection,
) -> DecorationSet {
    let mut set = DecorationSet::default();
    let doc_size = doc.content_size();

    for (entity_index, entity) in entities.iter().enumerate() {
        if modifiers.iter().any(|m| m.matches(&entity.raw_text)) {
            tracing::trace!(label = %entity.label, "entity overridden by modifier");
            continue;
        }
        for (occurrence_index, occurrence) in entity.occurrences.iter().enumerate() {
            if !occurrence.is_valid_within(doc_size) {
                tracing::trace!(
                    label = %entity.label,
                    start = occurrence.start,
                    end = occurrence.end,
                    doc_size,
                    "skipping occurrence outside document"
                );
                continue;
            }
            set.pii.push(Decoration {
                range: occurrence.range(),
                kind: DecorationKind::Pii {
                    label: entity.label.clone(),
                    pii_type: entity.pii_type.clone(),
                    raw_text: entity.raw_text.clone(),
                    entity_index,
                    occurrence_index,
                    masked: entity.should_mask,
                },
            });
        }
    }

    for modifier in modifiers {
        for found in find_bounded_matches(projection.text(), &modifier.entity) {
            if projection.crosses_separator(found.clone()) {
                continue;
            }
            let Ok(range) = projection.map_range(found.start, found.end) else {
                continue;
            };
            set.modifiers.push(Decoration {
                range,
                kind: DecorationKind::Modifier {
                    modifier_id: modifier.id.clone(),
                    entity: modifier.entity.clone(),
                    action: modifier.action.clone(),
                },
            });
        }
    }

    set.pii.sort_by_key(|d| (d.range.start, d.range.end));
    set.modifiers.sort_by_key(|d| (d.range.start, d.range.end));
    tracing::trace!(
        pii = set.pii.len(),
        modifiers = set.modifiers.len(),
        "rendered decorations"
    );
    set
}
