//! Detection orchestration: when to detect, what to send, how to merge.
//!
//! The orchestrator is sans-IO. The session feeds it projections and
//! instants, spawns the requests it builds and hands completed responses
//! back for merging.

use std::time::Duration;

use shield_common::wire::{self, ApiModifier, DetectionRequest, MaskResponse};
use shield_editor_core::text_helpers::find_bounded_matches;
use shield_editor_core::{
    EntityStore, Modifier, ModifierAction, PiiEntity, PiiOccurrence, PlainTextProjection, Scope,
    ScopedStore,
};
use web_time::Instant;

use crate::debounce::Debouncer;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// How a new projection relates to the last one seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextChange {
    /// Same text; only structure or formatting moved.
    Unchanged,
    /// New non-empty text; detection is scheduled.
    Changed,
    /// The document has no text left.
    Cleared,
}

#[derive(Debug)]
pub struct DetectionOrchestrator {
    debouncer: Debouncer,
    last_text: Option<String>,
    next_seq: u64,
    last_applied: Option<u64>,
}

impl DetectionOrchestrator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(debounce),
            last_text: None,
            next_seq: 0,
            last_applied: None,
        }
    }

    /// Record a fresh projection; schedules detection when its text changed.
    pub fn note_projection(&mut self, projection: &PlainTextProjection, now: Instant) -> TextChange {
        if self.last_text.as_deref() == Some(projection.text()) {
            return TextChange::Unchanged;
        }
        self.last_text = Some(projection.text().to_owned());

        if projection.is_empty() {
            self.debouncer.cancel();
            return TextChange::Cleared;
        }
        self.debouncer.schedule(now);
        tracing::trace!(chars = projection.len(), "text changed, detection scheduled");
        TextChange::Changed
    }

    /// Schedule detection without a text change, e.g. after a modifier edit.
    pub fn schedule(&mut self, now: Instant) {
        self.debouncer.schedule(now);
    }

    pub fn cancel_pending(&mut self) {
        self.debouncer.cancel();
    }

    /// Whether the debounce timer fired.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.debouncer.poll(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Build the next request for `text` with the scope's modifiers and
    /// entities as context. Returns the request's sequence number too.
    pub fn build_request<P: ScopedStore>(
        &mut self,
        store: &mut EntityStore<P>,
        scope: &Scope,
        text: &str,
        session_id: Option<String>,
    ) -> (u64, DetectionRequest) {
        self.next_seq += 1;
        let known_entities = store
            .known_entities(scope)
            .into_iter()
            .map(|hint| wire::KnownEntity {
                entity: hint.text,
                label: hint.label,
            })
            .collect();
        let modifiers = store
            .active_modifiers(scope)
            .iter()
            .map(to_wire_modifier)
            .collect();

        let request = DetectionRequest {
            text: text.to_owned(),
            known_entities,
            modifiers,
            session_id,
        };
        tracing::debug!(
            seq = self.next_seq,
            %scope,
            chars = text.chars().count(),
            known = request.known_entities.len(),
            modifiers = request.modifiers.len(),
            "built detection request"
        );
        (self.next_seq, request)
    }

    /// Note that the response for `seq` is being applied.
    ///
    /// Responses apply in completion order; returns `true` when this one is
    /// older than a response already applied.
    pub fn record_completion(&mut self, seq: u64) -> bool {
        let stale = self.last_applied.is_some_and(|applied| applied > seq);
        if stale {
            tracing::debug!(
                seq,
                last_applied = ?self.last_applied,
                "older detection response overwrites a newer one"
            );
        }
        self.last_applied = Some(seq);
        stale
    }
}

impl Default for DetectionOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

pub fn to_wire_modifier(modifier: &Modifier) -> ApiModifier {
    match &modifier.action {
        ModifierAction::Ignore => ApiModifier {
            action: wire::ModifierAction::Ignore,
            entity: modifier.entity.clone(),
            pii_type: None,
        },
        ModifierAction::Mask(pii_type) => ApiModifier {
            action: wire::ModifierAction::StringMask,
            entity: modifier.entity.clone(),
            pii_type: Some(pii_type.clone()),
        },
    }
}

/// Turn a detection response into the scope's new entity list.
///
/// Offsets map through `projection`, the one the request was built from.
/// A detected entity whose text matches an existing one (ignoring case)
/// takes over that entity's label. `should_mask` carries over from
/// `existing` and defaults to `true`. Entities sharing a label or text are
/// consolidated into one with the union of their occurrences. Unmappable
/// occurrences are dropped, and so are entities left without any.
pub fn merge_response(
    response: &MaskResponse,
    projection: &PlainTextProjection,
    existing: &[PiiEntity],
) -> Vec<PiiEntity> {
    let mut merged: Vec<PiiEntity> = Vec::new();
    for detected in response.first_entities() {
        let mut occurrences = Vec::with_capacity(detected.occurrences.len());
        for occurrence in &detected.occurrences {
            match projection.map_range(occurrence.start_idx, occurrence.end_idx) {
                Ok(range) => occurrences.push(PiiOccurrence::new(range.start, range.end)),
                Err(e) => tracing::debug!(
                    label = %detected.label,
                    error = %e,
                    "dropping unmappable occurrence"
                ),
            }
        }
        if occurrences.is_empty() {
            continue;
        }

        let text_key = detected.raw_text.to_lowercase();
        let prior = existing
            .iter()
            .find(|e| e.label == detected.label)
            .or_else(|| existing.iter().find(|e| e.text_key() == text_key));
        let label = prior.map_or_else(|| detected.label.clone(), |e| e.label.clone());

        if let Some(entity) = merged
            .iter_mut()
            .find(|e| e.label == label || e.text_key() == text_key)
        {
            tracing::trace!(
                label = %detected.label,
                into = %entity.label,
                "consolidating entity"
            );
            entity.occurrences.extend(occurrences);
            entity.occurrences.sort_by_key(|o| (o.start, o.end));
            entity.occurrences.dedup();
            continue;
        }

        let should_mask = prior.is_none_or(|e| e.should_mask);
        merged.push(
            PiiEntity::new(
                label,
                detected.raw_text.clone(),
                detected.pii_type.clone(),
                occurrences,
            )
            .with_masking(should_mask),
        );
    }
    merged
}

/// Re-locate entities in a new projection by searching for their text.
///
/// Keeps highlights on their text while the user edits between detections.
/// Entities whose text is gone are dropped.
pub fn remap_entities(entities: &[PiiEntity], projection: &PlainTextProjection) -> Vec<PiiEntity> {
    entities
        .iter()
        .filter_map(|entity| {
            let occurrences: Vec<PiiOccurrence> =
                find_bounded_matches(projection.text(), &entity.raw_text)
                    .into_iter()
                    .filter(|found| !projection.crosses_separator(found.clone()))
                    .filter_map(|found| projection.map_range(found.start, found.end).ok())
                    .map(|range| PiiOccurrence::new(range.start, range.end))
                    .collect();
            if occurrences.is_empty() {
                tracing::trace!(label = %entity.label, "entity text no longer present");
                return None;
            }
            Some(PiiEntity {
                occurrences,
                ..entity.clone()
            })
        })
        .collect()
}
