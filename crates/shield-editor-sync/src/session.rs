//! Host-facing PII overlay session.
//!
//! [`ShieldSession`] owns the document snapshot and everything derived from
//! it. The host feeds it document changes, pointer events and clock ticks,
//! and reads back decorations and menu state. Detection requests run as
//! spawned tasks and report back over a channel; completions are applied
//! when the host calls [`ShieldSession::drain_completions`] or awaits
//! [`ShieldSession::next_completion`].
//!
//! Spawning needs an async runtime, so sessions with a detection service
//! must live inside one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shield_common::{ApiError, DetectionService, MaskResponse, ShieldApiClient, ShieldConfig};
use shield_editor_core::{
    DecorationSet, Document, EntityStore, InteractionContext, InteractionEffect, InteractionEvent,
    InteractionTimings, Modifier, ModifierInteraction, PiiEntity, PlainTextProjection, Scope,
    ScopedStore, apply_command, render_decorations,
};
use tokio::sync::mpsc;
use web_time::Instant;

use crate::orchestrator::{
    DEFAULT_DEBOUNCE, DetectionOrchestrator, TextChange, merge_response, remap_entities,
};

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Quiet period after the last text change before detection runs.
    pub debounce: Duration,
    pub timings: InteractionTimings,
    /// Server-side masking session to detect within, if any.
    pub pii_session_id: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            timings: InteractionTimings::default(),
            pii_session_id: None,
        }
    }
}

struct Completion {
    seq: u64,
    result: Result<MaskResponse, ApiError>,
}

/// What a request was built from, kept until its response arrives.
struct InFlight {
    scope: Scope,
    projection: PlainTextProjection,
}

/// Masked rendering returned with the last applied detection.
struct MaskedText {
    scope: Scope,
    /// Projection text the service masked.
    source: String,
    text: String,
}

pub struct ShieldSession<S, P> {
    service: Option<Arc<S>>,
    store: EntityStore<P>,
    doc: Document,
    projection: PlainTextProjection,
    decorations: DecorationSet,
    orchestrator: DetectionOrchestrator,
    interaction: ModifierInteraction,
    in_flight: HashMap<u64, InFlight>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    pii_session_id: Option<String>,
    masked: Option<MaskedText>,
}

impl<P: ScopedStore> ShieldSession<ShieldApiClient, P> {
    /// Session talking to the HTTP detection service.
    ///
    /// Without an API key, or with the overlay switched off, the session is
    /// built disabled rather than failing.
    pub fn from_config(config: &ShieldConfig, persistence: P) -> Result<Self, ApiError> {
        let options = SessionOptions {
            debounce: config.debounce(),
            ..Default::default()
        };
        if !config.is_active() {
            tracing::info!("no API key configured or overlay disabled, PII detection is off");
            return Ok(Self::disabled(persistence, options));
        }
        Ok(Self::new(ShieldApiClient::new(config)?, persistence, options))
    }
}

impl<S: DetectionService, P: ScopedStore> ShieldSession<S, P> {
    pub fn new(service: S, persistence: P, options: SessionOptions) -> Self {
        Self::build(Some(Arc::new(service)), persistence, options)
    }

    /// A session that tracks state and menus but never calls the service.
    pub fn disabled(persistence: P, options: SessionOptions) -> Self {
        Self::build(None, persistence, options)
    }

    fn build(service: Option<Arc<S>>, persistence: P, options: SessionOptions) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            service,
            store: EntityStore::new(persistence),
            doc: Document::default(),
            projection: PlainTextProjection::default(),
            decorations: DecorationSet::default(),
            orchestrator: DetectionOrchestrator::new(options.debounce),
            interaction: ModifierInteraction::new(options.timings),
            in_flight: HashMap::new(),
            completions_tx,
            completions_rx,
            pii_session_id: options.pii_session_id,
            masked: None,
        }
    }

    // === Accessors ===

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn projection(&self) -> &PlainTextProjection {
        &self.projection
    }

    pub fn decorations(&self) -> &DecorationSet {
        &self.decorations
    }

    pub fn interaction(&self) -> &ModifierInteraction {
        &self.interaction
    }

    /// Whether keystrokes belong to a menu's label field rather than the editor.
    pub fn captures_keyboard(&self) -> bool {
        self.interaction.captures_keyboard()
    }

    pub fn active_scope(&self) -> &Scope {
        self.store.active_scope()
    }

    pub fn store(&self) -> &EntityStore<P> {
        &self.store
    }

    pub fn entities(&mut self) -> &[PiiEntity] {
        let scope = self.store.active_scope().clone();
        self.store.entities(&scope)
    }

    pub fn modifiers(&mut self) -> &[Modifier] {
        let scope = self.store.active_scope().clone();
        self.store.active_modifiers(&scope)
    }

    /// The service's masked version of the current text.
    ///
    /// `None` until a detection for the active scope has been applied, and
    /// again once the text moves on from what was masked.
    pub fn masked_text(&self) -> Option<&str> {
        self.masked
            .as_ref()
            .filter(|m| m.scope == *self.store.active_scope() && m.source == self.projection.text())
            .map(|m| m.text.as_str())
    }

    /// Detection requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.orchestrator.next_deadline(), self.interaction.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_entities_changed(&mut self, listener: impl FnMut(&Scope, &[PiiEntity]) + 'static) {
        self.store.on_entities_changed(listener);
    }

    pub fn on_modifiers_changed(&mut self, listener: impl FnMut(&Scope, &[Modifier]) + 'static) {
        self.store.on_modifiers_changed(listener);
    }

    // === Document and clock ===

    /// Take a new document snapshot.
    ///
    /// Existing highlights follow their text until the next detection; a
    /// text change (re)arms the debounce timer.
    pub fn document_changed(&mut self, doc: Document, now: Instant) {
        let projection = PlainTextProjection::build(&doc);
        let change = self.orchestrator.note_projection(&projection, now);
        let moved = projection != self.projection;
        self.doc = doc;
        self.projection = projection;

        let scope = self.store.active_scope().clone();
        match change {
            TextChange::Cleared => {
                self.masked = None;
                if !self.store.entities(&scope).is_empty() {
                    self.store.set_entities(&scope, Vec::new());
                }
            }
            TextChange::Changed => self.remap_active(&scope),
            TextChange::Unchanged if moved => self.remap_active(&scope),
            TextChange::Unchanged => {}
        }
        self.refresh_decorations();
    }

    /// Advance timers: fires debounced detection and menu timeouts.
    pub fn tick(&mut self, now: Instant) -> Vec<InteractionEffect> {
        if self.orchestrator.poll(now) {
            self.trigger_detection();
        }

        let scope = self.store.active_scope().clone();
        let ctx = InteractionContext {
            doc: &self.doc,
            projection: &self.projection,
            decorations: &self.decorations,
            modifiers: self.store.active_modifiers(&scope),
        };
        let effects = self.interaction.poll(&ctx, now);
        self.apply_effects(&effects, now);
        effects
    }

    // === Host commands ===

    /// Run detection now on the current text. Returns the request's sequence
    /// number, or `None` when disabled or there is no text.
    pub fn trigger_detection(&mut self) -> Option<u64> {
        self.orchestrator.cancel_pending();
        let Some(service) = self.service.clone() else {
            tracing::trace!("detection disabled, skipping");
            return None;
        };
        if self.projection.is_empty() {
            tracing::trace!("empty document, nothing to detect");
            return None;
        }

        let scope = self.store.active_scope().clone();
        let (seq, request) = self.orchestrator.build_request(
            &mut self.store,
            &scope,
            self.projection.text(),
            self.pii_session_id.clone(),
        );
        self.in_flight.insert(
            seq,
            InFlight {
                scope,
                projection: self.projection.clone(),
            },
        );

        let tx = self.completions_tx.clone();
        n0_future::task::spawn(async move {
            let result = service.detect(request).await;
            // A closed channel means the session is gone.
            let _ = tx.send(Completion { seq, result });
        });
        Some(seq)
    }

    /// Flip masking for `label` in the active scope.
    pub fn toggle_masking(&mut self, label: &str) -> Option<bool> {
        let scope = self.store.active_scope().clone();
        let toggled = self.store.toggle_masking(&scope, label);
        if toggled.is_some() {
            self.refresh_decorations();
        }
        toggled
    }

    pub fn mask_all(&mut self) -> usize {
        self.set_all_masking(true)
    }

    pub fn unmask_all(&mut self) -> usize {
        self.set_all_masking(false)
    }

    fn set_all_masking(&mut self, should_mask: bool) -> usize {
        let scope = self.store.active_scope().clone();
        let changed = self.store.set_all_masking(&scope, should_mask);
        if changed > 0 {
            self.refresh_decorations();
        }
        changed
    }

    /// Switch the live overlay to `scope`, e.g. when the host opens another
    /// conversation.
    ///
    /// Open menus close, the scope's stored entities are placed on the
    /// current document and fresh detection runs right away.
    pub fn reload_state_for_scope(&mut self, scope: Scope) -> Vec<InteractionEffect> {
        let effects = self.interaction.reset();
        self.orchestrator.cancel_pending();
        self.store.switch_scope(scope.clone());
        self.remap_active(&scope);
        self.refresh_decorations();
        self.trigger_detection();
        effects
    }

    /// Move the active scope's entities and modifiers to `to` and keep
    /// working there, e.g. once a new chat is assigned its conversation id.
    ///
    /// Requests still in flight for the old scope are applied to `to`.
    pub fn transfer_scope(&mut self, to: Scope) {
        let from = self.store.active_scope().clone();
        self.store.transfer_scope(&from, to.clone());
        for in_flight in self.in_flight.values_mut() {
            if in_flight.scope == from {
                in_flight.scope = to.clone();
            }
        }
        if let Some(masked) = self.masked.as_mut().filter(|m| m.scope == from) {
            masked.scope = to.clone();
        }
        self.remap_active(&to);
        self.refresh_decorations();
    }

    /// Feed a pointer, selection or menu event to the interaction layer.
    ///
    /// Committed modifiers are applied to the active scope before returning.
    pub fn handle_interaction(
        &mut self,
        event: InteractionEvent,
        now: Instant,
    ) -> Vec<InteractionEffect> {
        let scope = self.store.active_scope().clone();
        let ctx = InteractionContext {
            doc: &self.doc,
            projection: &self.projection,
            decorations: &self.decorations,
            modifiers: self.store.active_modifiers(&scope),
        };
        let effects = self.interaction.handle(event, &ctx, now);
        self.apply_effects(&effects, now);
        effects
    }

    // === Completions ===

    /// Apply every detection response that has arrived. Returns how many
    /// changed the entity list.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.apply_completion(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next detection response and apply it.
    ///
    /// `None` when nothing is in flight; otherwise whether the response
    /// changed the entity list.
    pub async fn next_completion(&mut self) -> Option<bool> {
        if self.in_flight.is_empty() {
            return None;
        }
        let completion = self.completions_rx.recv().await?;
        Some(self.apply_completion(completion))
    }

    fn apply_completion(&mut self, completion: Completion) -> bool {
        let Completion { seq, result } = completion;
        let Some(in_flight) = self.in_flight.remove(&seq) else {
            tracing::debug!(seq, "unknown detection response");
            return false;
        };
        let scope = self.store.active_scope().clone();
        if in_flight.scope != scope {
            tracing::debug!(
                seq,
                requested = %in_flight.scope,
                active = %scope,
                "dropping detection response for inactive scope"
            );
            return false;
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(seq, error = %e, "detection failed, keeping previous entities");
                return false;
            }
        };
        self.orchestrator.record_completion(seq);

        let mut entities = merge_response(
            &response,
            &in_flight.projection,
            self.store.entities(&scope),
        );
        if in_flight.projection != self.projection {
            tracing::trace!(seq, "document changed while detecting, remapping");
            entities = remap_entities(&entities, &self.projection);
        }
        tracing::debug!(seq, count = entities.len(), "applying detection response");
        self.masked = response.text.into_iter().next().map(|text| MaskedText {
            scope: scope.clone(),
            source: in_flight.projection.text().to_owned(),
            text,
        });
        self.store.set_entities(&scope, entities);
        self.refresh_decorations();
        true
    }

    // === Internals ===

    fn apply_effects(&mut self, effects: &[InteractionEffect], now: Instant) {
        let scope = self.store.active_scope().clone();
        let mut dispatched = false;
        for effect in effects {
            if let InteractionEffect::Dispatch(command) = effect {
                apply_command(&mut self.store, &scope, command.clone());
                dispatched = true;
            }
        }
        if dispatched {
            self.refresh_decorations();
            // Mask modifiers bias detection, so rerun it with the new set.
            self.orchestrator.schedule(now);
        }
    }

    fn remap_active(&mut self, scope: &Scope) {
        let entities = self.store.entities(scope);
        if entities.is_empty() {
            return;
        }
        let remapped = remap_entities(entities, &self.projection);
        if remapped.as_slice() != entities {
            self.store.set_entities(scope, remapped);
        }
    }

    fn refresh_decorations(&mut self) {
        let scope = self.store.active_scope().clone();
        let modifiers = self.store.active_modifiers(&scope).to_vec();
        let entities = self.store.entities(&scope);
        self.decorations = render_decorations(entities, &modifiers, &self.doc, &self.projection);
    }
}
