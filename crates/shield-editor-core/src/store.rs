//! Scoped entity and modifier state.
//!
//! [`EntityStore`] holds the in-memory working copy of each scope it has
//! touched and writes every mutation through to an injected [`ScopedStore`].
//! It is the single mutable resource shared by detection (entities) and the
//! interaction layer (modifiers); all access happens on the owning thread.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::types::{Modifier, PiiEntity, Scope};

/// Persisted state of one scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeState {
    #[serde(default)]
    pub entities: Vec<PiiEntity>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

/// Persistence contract for scoped state.
///
/// A scope that was never saved loads as `None` and is treated as empty.
pub trait ScopedStore {
    fn load(&self, scope: &Scope) -> Option<ScopeState>;
    fn save(&mut self, scope: &Scope, state: &ScopeState);
}

/// Process-local [`ScopedStore`]. Also the fake used in tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryScopedStore {
    scopes: HashMap<Scope, ScopeState>,
}

impl MemoryScopedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a scope as if it had been persisted earlier.
    pub fn with_scope(mut self, scope: Scope, state: ScopeState) -> Self {
        self.scopes.insert(scope, state);
        self
    }

    pub fn get(&self, scope: &Scope) -> Option<&ScopeState> {
        self.scopes.get(scope)
    }
}

impl ScopedStore for MemoryScopedStore {
    fn load(&self, scope: &Scope) -> Option<ScopeState> {
        self.scopes.get(scope).cloned()
    }

    fn save(&mut self, scope: &Scope, state: &ScopeState) {
        self.scopes.insert(scope.clone(), state.clone());
    }
}

/// An existing entity passed back to the detection service as a hint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownEntity {
    pub label: SmolStr,
    pub text: String,
}

pub type EntitiesListener = Box<dyn FnMut(&Scope, &[PiiEntity])>;
pub type ModifiersListener = Box<dyn FnMut(&Scope, &[Modifier])>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Changed {
    Nothing,
    Entities,
    Modifiers,
}

/// Entity and modifier state keyed by scope.
///
/// Listeners fire only for changes to the active scope, after the change has
/// been written through.
pub struct EntityStore<P> {
    persistence: P,
    active: Scope,
    working: HashMap<Scope, ScopeState>,
    entities_listeners: Vec<EntitiesListener>,
    modifiers_listeners: Vec<ModifiersListener>,
}

impl<P: ScopedStore> EntityStore<P> {
    pub fn new(persistence: P) -> Self {
        Self {
            persistence,
            active: Scope::Global,
            working: HashMap::new(),
            entities_listeners: Vec::new(),
            modifiers_listeners: Vec::new(),
        }
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn active_scope(&self) -> &Scope {
        &self.active
    }

    pub fn on_entities_changed(&mut self, listener: impl FnMut(&Scope, &[PiiEntity]) + 'static) {
        self.entities_listeners.push(Box::new(listener));
    }

    pub fn on_modifiers_changed(&mut self, listener: impl FnMut(&Scope, &[Modifier]) + 'static) {
        self.modifiers_listeners.push(Box::new(listener));
    }

    // === Entities ===

    /// Entities of `scope`, loading its persisted state on first access.
    pub fn entities(&mut self, scope: &Scope) -> &[PiiEntity] {
        &self.state(scope).entities
    }

    /// Replace the entity list of `scope` wholesale.
    pub fn set_entities(&mut self, scope: &Scope, entities: Vec<PiiEntity>) {
        tracing::debug!(%scope, count = entities.len(), "set entities");
        self.update(scope, |state| {
            state.entities = entities;
            ((), Changed::Entities)
        });
    }

    /// Flip masking for every occurrence of `label`.
    ///
    /// Every entity carrying the label gets the flipped flag of the first
    /// one. Returns the new flag, or `None` when no entity has that label.
    pub fn toggle_masking(&mut self, scope: &Scope, label: &str) -> Option<bool> {
        let toggled = self.update(scope, |state| {
            let Some(current) = state.entities.iter().find(|e| e.label == label) else {
                return (None, Changed::Nothing);
            };
            let should_mask = !current.should_mask;
            for entity in state.entities.iter_mut().filter(|e| e.label == label) {
                entity.should_mask = should_mask;
            }
            (Some(should_mask), Changed::Entities)
        });
        tracing::debug!(%scope, label, ?toggled, "toggle masking");
        toggled
    }

    /// Set masking for every entity with `label`. Returns whether the label
    /// exists.
    pub fn set_entity_masking(&mut self, scope: &Scope, label: &str, should_mask: bool) -> bool {
        self.update(scope, |state| {
            let mut found = false;
            let mut changed = Changed::Nothing;
            for entity in state.entities.iter_mut().filter(|e| e.label == label) {
                found = true;
                if entity.should_mask != should_mask {
                    entity.should_mask = should_mask;
                    changed = Changed::Entities;
                }
            }
            (found, changed)
        })
    }

    /// Mask or unmask every entity. Returns how many entities changed.
    pub fn set_all_masking(&mut self, scope: &Scope, should_mask: bool) -> usize {
        let changed = self.update(scope, |state| {
            let mut changed = 0;
            for entity in state.entities.iter_mut().filter(|e| e.should_mask != should_mask) {
                entity.should_mask = should_mask;
                changed += 1;
            }
            let kind = if changed > 0 {
                Changed::Entities
            } else {
                Changed::Nothing
            };
            (changed, kind)
        });
        tracing::debug!(%scope, should_mask, changed, "set all masking");
        changed
    }

    /// One hint per distinct label, for stabilizing repeated detections.
    pub fn known_entities(&mut self, scope: &Scope) -> Vec<KnownEntity> {
        let mut seen = Vec::<&str>::new();
        let mut hints = Vec::new();
        for entity in &self.state(scope).entities {
            if seen.contains(&entity.label.as_str()) {
                continue;
            }
            seen.push(entity.label.as_str());
            hints.push(KnownEntity {
                label: entity.label.clone(),
                text: entity.raw_text.clone(),
            });
        }
        hints
    }

    // === Modifiers ===

    /// Modifiers of `scope`, loading its persisted state on first access.
    pub fn active_modifiers(&mut self, scope: &Scope) -> &[Modifier] {
        &self.state(scope).modifiers
    }

    /// Replace the modifier list. Later entries win over earlier ones with
    /// the same text.
    pub fn set_modifiers(&mut self, scope: &Scope, modifiers: Vec<Modifier>) {
        let mut deduped: Vec<Modifier> = Vec::with_capacity(modifiers.len());
        for modifier in modifiers {
            let key = modifier.text_key();
            deduped.retain(|m| m.text_key() != key);
            deduped.push(modifier);
        }
        tracing::debug!(%scope, count = deduped.len(), "set modifiers");
        self.update(scope, |state| {
            state.modifiers = deduped;
            ((), Changed::Modifiers)
        });
    }

    /// Add a modifier, replacing any existing one for the same text.
    pub fn add_modifier(&mut self, scope: &Scope, modifier: Modifier) {
        tracing::debug!(
            %scope,
            id = %modifier.id,
            action = modifier.action.name(),
            "add modifier"
        );
        let key = modifier.text_key();
        self.update(scope, |state| {
            state.modifiers.retain(|m| m.text_key() != key);
            state.modifiers.push(modifier);
            ((), Changed::Modifiers)
        });
    }

    /// Remove a modifier by id.
    pub fn remove_modifier(&mut self, scope: &Scope, id: &str) -> Option<Modifier> {
        let removed = self.update(scope, |state| {
            match state.modifiers.iter().position(|m| m.id == id) {
                Some(index) => (Some(state.modifiers.remove(index)), Changed::Modifiers),
                None => (None, Changed::Nothing),
            }
        });
        tracing::debug!(%scope, id, removed = removed.is_some(), "remove modifier");
        removed
    }

    pub fn clear_modifiers(&mut self, scope: &Scope) {
        self.update(scope, |state| {
            if state.modifiers.is_empty() {
                ((), Changed::Nothing)
            } else {
                state.modifiers.clear();
                ((), Changed::Modifiers)
            }
        });
    }

    // === Scope lifecycle ===

    /// Make `scope` the live overlay.
    ///
    /// The old scope's working copy is dropped (its persisted copy stays) and
    /// the new scope's persisted state is loaded. Both listeners fire with the
    /// new scope's state so hosts can redraw.
    pub fn switch_scope(&mut self, scope: Scope) {
        let previous = std::mem::replace(&mut self.active, scope.clone());
        if previous != scope {
            self.working.remove(&previous);
        }
        self.working.remove(&scope);

        let state = self
            .working
            .entry(scope.clone())
            .or_insert_with(|| load_or_empty(&self.persistence, &scope));
        tracing::debug!(
            from = %previous,
            to = %scope,
            entities = state.entities.len(),
            modifiers = state.modifiers.len(),
            "switched scope"
        );
        for listener in &mut self.entities_listeners {
            listener(&scope, &state.entities);
        }
        for listener in &mut self.modifiers_listeners {
            listener(&scope, &state.modifiers);
        }
    }

    /// Move everything collected under `from` into `to` and make `to` live.
    ///
    /// Used when a new chat that was tracked under a temporary scope gets its
    /// conversation id. Entities, mask flags and modifiers carry over;
    /// modifiers already stored under `to` are kept unless `from` has one for
    /// the same text. `from` is left empty in persistence.
    pub fn transfer_scope(&mut self, from: &Scope, to: Scope) {
        if *from == to {
            self.switch_scope(to);
            return;
        }
        let source = self
            .working
            .remove(from)
            .unwrap_or_else(|| load_or_empty(&self.persistence, from));
        let mut target = self
            .working
            .remove(&to)
            .unwrap_or_else(|| load_or_empty(&self.persistence, &to));

        if !source.entities.is_empty() {
            target.entities = source.entities;
        }
        for modifier in source.modifiers {
            let key = modifier.text_key();
            target.modifiers.retain(|m| m.text_key() != key);
            target.modifiers.push(modifier);
        }

        self.persistence.save(from, &ScopeState::default());
        self.persistence.save(&to, &target);
        tracing::debug!(
            %from,
            %to,
            entities = target.entities.len(),
            modifiers = target.modifiers.len(),
            "transferred scope state"
        );

        self.switch_scope(to);
    }

    /// Drop every working copy and return to the global scope.
    ///
    /// Persisted state and listeners are kept; nothing is notified.
    pub fn reset(&mut self) {
        tracing::debug!(scopes = self.working.len(), "reset entity store");
        self.working.clear();
        self.active = Scope::Global;
    }

    fn state(&mut self, scope: &Scope) -> &mut ScopeState {
        self.working
            .entry(scope.clone())
            .or_insert_with(|| load_or_empty(&self.persistence, scope))
    }

    fn update<R>(&mut self, scope: &Scope, change: impl FnOnce(&mut ScopeState) -> (R, Changed)) -> R {
        let state = self
            .working
            .entry(scope.clone())
            .or_insert_with(|| load_or_empty(&self.persistence, scope));
        let (out, changed) = change(state);
        if changed == Changed::Nothing {
            return out;
        }

        self.persistence.save(scope, state);
        if *scope == self.active {
            match changed {
                Changed::Entities => {
                    for listener in &mut self.entities_listeners {
                        listener(scope, &state.entities);
                    }
                }
                Changed::Modifiers => {
                    for listener in &mut self.modifiers_listeners {
                        listener(scope, &state.modifiers);
                    }
                }
                Changed::Nothing => {}
            }
        }
        out
    }
}

fn load_or_empty<P: ScopedStore>(persistence: &P, scope: &Scope) -> ScopeState {
    match persistence.load(scope) {
        Some(state) => state,
        None => {
            tracing::trace!(%scope, "no persisted state for scope, starting empty");
            ScopeState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::types::{ModifierAction, PiiOccurrence};

    fn conv(id: &str) -> Scope {
        Scope::Conversation(id.into())
    }

    fn entity(label: &str, text: &str) -> PiiEntity {
        PiiEntity::new(label, text, "PERSON", vec![PiiOccurrence::new(1, 1 + text.len())])
    }

    #[test]
    fn test_missing_scope_is_empty() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        assert!(store.entities(&conv("nope")).is_empty());
        assert!(store.active_modifiers(&conv("nope")).is_empty());
    }

    #[test]
    fn test_set_entities_writes_through() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let scope = conv("a");
        store.set_entities(&scope, vec![entity("e1", "John")]);
        assert_eq!(store.entities(&scope).len(), 1);
        assert_eq!(store.persistence().get(&scope).unwrap().entities.len(), 1);
    }

    #[test]
    fn test_toggle_masking_twice_restores() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let scope = Scope::Global;
        store.set_entities(&scope, vec![entity("e1", "John"), entity("e2", "Jane")]);

        assert_eq!(store.toggle_masking(&scope, "e1"), Some(false));
        assert_eq!(store.toggle_masking(&scope, "e1"), Some(true));
        assert!(store.entities(&scope).iter().all(|e| e.should_mask));
        assert_eq!(store.toggle_masking(&scope, "missing"), None);
    }

    #[test]
    fn test_set_all_masking() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let scope = Scope::Global;
        store.set_entities(
            &scope,
            vec![entity("e1", "John"), entity("e2", "Jane").with_masking(false)],
        );
        assert_eq!(store.set_all_masking(&scope, false), 1);
        assert!(store.entities(&scope).iter().all(|e| !e.should_mask));
        assert_eq!(store.set_all_masking(&scope, true), 2);
        assert!(store.set_entity_masking(&scope, "e2", false));
        assert!(!store.set_entity_masking(&scope, "e3", false));
    }

    #[test]
    fn test_add_modifier_replaces_same_text() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let scope = conv("a");
        store.add_modifier(&scope, Modifier::ignore("John Doe").unwrap());
        store.add_modifier(&scope, Modifier::mask("john doe", "PERSON").unwrap());

        let modifiers = store.active_modifiers(&scope);
        assert_eq!(modifiers.len(), 1);
        assert_eq!(modifiers[0].action, ModifierAction::Mask("PERSON".into()));
    }

    #[test]
    fn test_set_modifiers_dedupes() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let scope = conv("a");
        store.set_modifiers(
            &scope,
            vec![
                Modifier::ignore("Acme").unwrap(),
                Modifier::ignore("Bob").unwrap(),
                Modifier::mask("ACME", "ORGANISATION").unwrap(),
            ],
        );
        let entities: Vec<_> = store
            .active_modifiers(&scope)
            .iter()
            .map(|m| m.entity.clone())
            .collect();
        assert_eq!(entities, vec!["Bob", "ACME"]);
    }

    #[test]
    fn test_remove_modifier_by_id() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let scope = conv("a");
        let modifier = Modifier::ignore("John").unwrap();
        let id = modifier.id.clone();
        store.add_modifier(&scope, modifier);

        assert!(store.remove_modifier(&scope, "unknown").is_none());
        assert_eq!(store.remove_modifier(&scope, &id).unwrap().entity, "John");
        assert!(store.active_modifiers(&scope).is_empty());

        store.add_modifier(&scope, Modifier::ignore("Jane").unwrap());
        store.clear_modifiers(&scope);
        assert!(store.persistence().get(&scope).unwrap().modifiers.is_empty());
    }

    #[test]
    fn test_lazy_load_from_persistence() {
        let scope = conv("a");
        let persisted = ScopeState {
            entities: vec![entity("e1", "John")],
            modifiers: vec![Modifier::ignore("Acme").unwrap()],
        };
        let mut store = EntityStore::new(MemoryScopedStore::new().with_scope(scope.clone(), persisted));
        assert_eq!(store.active_modifiers(&scope).len(), 1);
        assert_eq!(store.entities(&scope)[0].label, "e1");
    }

    #[test]
    fn test_switch_scope_loads_new_state() {
        let a = conv("a");
        let b = conv("b");
        let persisted = ScopeState {
            entities: vec![entity("e1", "John"), entity("e2", "Jane")],
            modifiers: Vec::new(),
        };
        let mut store = EntityStore::new(MemoryScopedStore::new().with_scope(a.clone(), persisted));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        store.on_entities_changed(move |scope, entities| {
            sink.borrow_mut().push((scope.clone(), entities.len()));
        });

        store.switch_scope(a.clone());
        store.switch_scope(b.clone());
        assert_eq!(store.active_scope(), &b);
        assert!(store.entities(&b).is_empty());
        assert_eq!(*seen.borrow(), vec![(a.clone(), 2), (b.clone(), 0)]);

        // The old scope is still persisted.
        store.switch_scope(a.clone());
        assert_eq!(store.entities(&a).len(), 2);
    }

    #[test]
    fn test_listeners_only_fire_for_active_scope() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let calls = Rc::new(RefCell::new(0));
        let sink = calls.clone();
        store.on_modifiers_changed(move |_, _| *sink.borrow_mut() += 1);

        store.add_modifier(&Scope::Global, Modifier::ignore("x1").unwrap());
        store.add_modifier(&conv("other"), Modifier::ignore("x2").unwrap());
        assert_eq!(*calls.borrow(), 1);

        // No-op mutations do not notify.
        store.remove_modifier(&Scope::Global, "missing");
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_known_entities_one_per_label() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        store.set_entities(
            &Scope::Global,
            vec![entity("e1", "John"), entity("e1", "john"), entity("e2", "Jane")],
        );
        let hints = store.known_entities(&Scope::Global);
        assert_eq!(
            hints,
            vec![
                KnownEntity {
                    label: "e1".into(),
                    text: "John".into()
                },
                KnownEntity {
                    label: "e2".into(),
                    text: "Jane".into()
                },
            ]
        );
    }

    #[test]
    fn test_toggle_masking_covers_every_entity_with_label() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        let scope = Scope::Global;
        store.set_entities(
            &scope,
            vec![
                entity("PERSON_1", "John"),
                entity("PERSON_1", "Johnny"),
                entity("PERSON_2", "Jane"),
            ],
        );

        assert_eq!(store.toggle_masking(&scope, "PERSON_1"), Some(false));
        let flags: Vec<bool> = store.entities(&scope).iter().map(|e| e.should_mask).collect();
        assert_eq!(flags, vec![false, false, true]);

        assert!(store.set_entity_masking(&scope, "PERSON_1", true));
        assert!(store.entities(&scope).iter().all(|e| e.should_mask));
    }

    #[test]
    fn test_transfer_scope_moves_temporary_state() {
        let existing = Modifier::ignore("Acme").unwrap();
        let persisted = ScopeState {
            entities: Vec::new(),
            modifiers: vec![existing.clone(), Modifier::ignore("Bob").unwrap()],
        };
        let mut store =
            EntityStore::new(MemoryScopedStore::new().with_scope(conv("new"), persisted));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        store.on_entities_changed(move |scope, entities| {
            sink.borrow_mut().push((scope.clone(), entities.len()));
        });

        let temp = Scope::Global;
        store.set_entities(&temp, vec![entity("e1", "John").with_masking(false)]);
        store.add_modifier(&temp, Modifier::mask("acme", "ORGANISATION").unwrap());

        store.transfer_scope(&temp, conv("new"));

        assert_eq!(store.active_scope(), &conv("new"));
        let entities = store.entities(&conv("new"));
        assert_eq!(entities.len(), 1);
        assert!(!entities[0].should_mask);

        let modifiers: Vec<(String, &'static str)> = store
            .active_modifiers(&conv("new"))
            .iter()
            .map(|m| (m.entity.clone(), m.action.name()))
            .collect();
        assert_eq!(
            modifiers,
            vec![("Bob".to_string(), "ignore"), ("acme".to_string(), "mask")]
        );

        assert_eq!(store.persistence().get(&temp), Some(&ScopeState::default()));
        assert!(store.entities(&temp).is_empty());
        assert_eq!(seen.borrow().last(), Some(&(conv("new"), 1)));
    }

    #[test]
    fn test_reset_returns_to_global() {
        let mut store = EntityStore::new(MemoryScopedStore::new());
        store.switch_scope(conv("a"));
        store.set_entities(&conv("a"), vec![entity("e1", "John")]);
        store.reset();
        assert_eq!(store.active_scope(), &Scope::Global);
        // Persisted state survives a reset.
        assert_eq!(store.entities(&conv("a")).len(), 1);
    }
}
