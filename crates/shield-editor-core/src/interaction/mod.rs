//! Modifier interaction layer.
//!
//! A sans-IO state machine for the hover and selection menus that create and
//! remove modifiers. The host feeds it pointer, selection and menu events with
//! the current time and applies the returned effects; timers are polled rather
//! than owned, so the same event sequence always produces the same result.
//!
//! ```text
//! Idle -> HoverPending -> HoverMenuOpen -> Committing -> Idle
//!   \                          |  (dismiss / timeout) -> Idle
//!    `-> SelectionMenuOpen ----'  (mutually exclusive with the hover menu)
//! ```

mod menu;

pub use menu::{
    HoverMenu, LabelField, MenuTarget, MenuTimers, PendingHover, SelectionChoice, SelectionMenu,
};

use std::ops::Range;
use std::time::Duration;

use smol_str::SmolStr;
use web_time::Instant;

use crate::decorations::{DecorationKind, DecorationSet};
use crate::document::Document;
use crate::error::ModifierValidationError;
use crate::projection::PlainTextProjection;
use crate::store::{EntityStore, ScopedStore};
use crate::text_helpers::tokenize_selection;
use crate::types::{Modifier, Scope, Selection};

/// Pointer dwell time before the hover menu opens.
pub const HOVER_DELAY: Duration = Duration::from_millis(300);
/// A menu with no interaction closes after this long.
pub const MENU_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace period after the pointer leaves a menu.
pub const MENU_LEAVE_GRACE: Duration = Duration::from_millis(500);

/// Timer durations for the interaction layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InteractionTimings {
    pub hover_delay: Duration,
    pub inactivity_timeout: Duration,
    pub leave_grace: Duration,
}

impl Default for InteractionTimings {
    fn default() -> Self {
        Self {
            hover_delay: HOVER_DELAY,
            inactivity_timeout: MENU_INACTIVITY_TIMEOUT,
            leave_grace: MENU_LEAVE_GRACE,
        }
    }
}

/// Keys the label field reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelKey {
    Enter,
    Escape,
    Tab,
    Backspace,
    Other,
}

/// Input to the interaction state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InteractionEvent {
    /// Pointer moved over the editor. `pos` is the document position under
    /// it, `None` when over no content.
    PointerMove { pos: Option<usize> },
    PointerLeaveEditor,
    PointerEnterMenu,
    PointerLeaveMenu,
    /// Mouse released with the editor's current selection.
    MouseUp { selection: Selection },
    /// Escape pressed or click outside any menu.
    Dismiss,
    LabelFocus,
    LabelBlur,
    /// Label field contents after an edit.
    LabelInput(String),
    LabelKey(LabelKey),
    ChooseSpan(SelectionChoice),
    IgnoreClicked,
    MaskClicked,
    RemoveClicked(SmolStr),
}

/// Which menu an effect refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuKind {
    Hover,
    Selection,
}

/// Store mutation requested by a commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModifierCommand {
    Add(Modifier),
    Remove { id: SmolStr },
}

/// Output of the state machine for the host to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InteractionEffect {
    MenuOpened(MenuKind),
    MenuClosed(MenuKind),
    /// Apply to the entity store with [`apply_command`].
    Dispatch(ModifierCommand),
    /// Commit rejected; the menu stays open and the label field is flagged.
    ValidationFailed(ModifierValidationError),
    /// Inline completion replaced the label value; `selected` is the char
    /// range to select in the field.
    LabelCompleted { value: String, selected: Range<usize> },
}

/// Current state of the interaction layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InteractionState {
    #[default]
    Idle,
    HoverPending(PendingHover),
    HoverMenuOpen(HoverMenu),
    SelectionMenuOpen(SelectionMenu),
    /// Transient while a commit is being validated.
    Committing,
}

/// Read-only view of the overlay used to resolve what is under the pointer.
#[derive(Clone, Copy)]
pub struct InteractionContext<'a> {
    pub doc: &'a Document,
    pub projection: &'a PlainTextProjection,
    pub decorations: &'a DecorationSet,
    pub modifiers: &'a [Modifier],
}

/// The modifier interaction state machine.
#[derive(Clone, Debug, Default)]
pub struct ModifierInteraction {
    state: InteractionState,
    timings: InteractionTimings,
}

impl ModifierInteraction {
    pub fn new(timings: InteractionTimings) -> Self {
        Self {
            state: InteractionState::Idle,
            timings,
        }
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn hover_menu(&self) -> Option<&HoverMenu> {
        match &self.state {
            InteractionState::HoverMenuOpen(menu) => Some(menu),
            _ => None,
        }
    }

    pub fn selection_menu(&self) -> Option<&SelectionMenu> {
        match &self.state {
            InteractionState::SelectionMenuOpen(menu) => Some(menu),
            _ => None,
        }
    }

    /// Whether keystrokes belong to a menu's label field instead of the editor.
    pub fn captures_keyboard(&self) -> bool {
        self.label().is_some_and(|label| label.focused)
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            InteractionState::HoverPending(pending) => Some(pending.deadline),
            InteractionState::HoverMenuOpen(menu) if !menu.label.focused => {
                let rehover = menu.rehover.map(|p| p.deadline);
                match (rehover, menu.timers.close_deadline) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            }
            InteractionState::SelectionMenuOpen(menu) if !menu.label.focused => {
                menu.timers.close_deadline
            }
            _ => None,
        }
    }

    /// Close any menu and cancel pending timers.
    pub fn reset(&mut self) -> Vec<InteractionEffect> {
        self.close()
    }

    /// Feed one event.
    pub fn handle(
        &mut self,
        event: InteractionEvent,
        ctx: &InteractionContext<'_>,
        now: Instant,
    ) -> Vec<InteractionEffect> {
        tracing::trace!(?event, "interaction event");
        match event {
            InteractionEvent::PointerMove { pos } => self.pointer_move(pos, now),
            InteractionEvent::PointerLeaveEditor => {
                match &mut self.state {
                    InteractionState::HoverPending(_) => self.state = InteractionState::Idle,
                    InteractionState::HoverMenuOpen(menu) => menu.rehover = None,
                    _ => {}
                }
                Vec::new()
            }
            InteractionEvent::PointerEnterMenu => {
                let inactivity = self.timings.inactivity_timeout;
                if let InteractionState::HoverMenuOpen(menu) = &mut self.state {
                    menu.rehover = None;
                }
                if let Some(timers) = self.timers_mut() {
                    timers.pointer_over_menu = true;
                    timers.close_deadline = Some(now + inactivity);
                }
                Vec::new()
            }
            InteractionEvent::PointerLeaveMenu => {
                let grace = self.timings.leave_grace;
                if let Some(timers) = self.timers_mut() {
                    timers.pointer_over_menu = false;
                    timers.close_deadline = Some(now + grace);
                }
                Vec::new()
            }
            InteractionEvent::MouseUp { selection } => self.mouse_up(selection, ctx, now),
            InteractionEvent::Dismiss => self.close(),
            InteractionEvent::LabelFocus => {
                if let Some(label) = self.label_mut() {
                    label.focus();
                }
                Vec::new()
            }
            InteractionEvent::LabelBlur => {
                let inactivity = self.timings.inactivity_timeout;
                if let Some(label) = self.label_mut() {
                    label.blur();
                }
                if let Some(timers) = self.timers_mut() {
                    timers.close_deadline = Some(now + inactivity);
                }
                Vec::new()
            }
            InteractionEvent::LabelInput(value) => match self.label_mut() {
                Some(label) => label
                    .input(&value)
                    .map(|(value, selected)| InteractionEffect::LabelCompleted { value, selected })
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            },
            InteractionEvent::LabelKey(key) => self.label_key(key),
            InteractionEvent::ChooseSpan(choice) => {
                if let InteractionState::SelectionMenuOpen(menu) = &mut self.state {
                    menu.choice = choice;
                }
                Vec::new()
            }
            InteractionEvent::IgnoreClicked => self.commit(CommitAction::Ignore),
            InteractionEvent::MaskClicked => self.commit(CommitAction::Mask),
            InteractionEvent::RemoveClicked(id) => self.commit(CommitAction::Remove(id)),
        }
    }

    /// Fire any timers that are due.
    pub fn poll(&mut self, ctx: &InteractionContext<'_>, now: Instant) -> Vec<InteractionEffect> {
        match &self.state {
            InteractionState::HoverPending(pending) if now >= pending.deadline => {
                let pos = pending.pos;
                match resolve_hover(pos, ctx, now + self.timings.inactivity_timeout) {
                    Some(menu) => {
                        tracing::debug!(pos, target = %menu.target.text, "hover menu opened");
                        self.state = InteractionState::HoverMenuOpen(menu);
                        vec![InteractionEffect::MenuOpened(MenuKind::Hover)]
                    }
                    None => {
                        self.state = InteractionState::Idle;
                        Vec::new()
                    }
                }
            }
            InteractionState::HoverMenuOpen(menu) if !menu.label.focused => {
                let current = menu.target.range.clone();
                if let Some(pending) = menu.rehover.filter(|p| now >= p.deadline) {
                    match resolve_hover(pending.pos, ctx, now + self.timings.inactivity_timeout) {
                        // Still over the same target: keep the menu as it is.
                        Some(next) if next.target.range == current => {
                            if let InteractionState::HoverMenuOpen(menu) = &mut self.state {
                                menu.rehover = None;
                            }
                            Vec::new()
                        }
                        Some(next) => {
                            tracing::debug!(target = %next.target.text, "hover menu moved");
                            self.state = InteractionState::HoverMenuOpen(next);
                            vec![
                                InteractionEffect::MenuClosed(MenuKind::Hover),
                                InteractionEffect::MenuOpened(MenuKind::Hover),
                            ]
                        }
                        None => self.close(),
                    }
                } else if menu.timers.close_deadline.is_some_and(|d| now >= d) {
                    tracing::debug!("hover menu timed out");
                    self.close()
                } else {
                    Vec::new()
                }
            }
            InteractionState::SelectionMenuOpen(menu)
                if !menu.label.focused && menu.timers.close_deadline.is_some_and(|d| now >= d) =>
            {
                tracing::debug!("selection menu timed out");
                self.close()
            }
            _ => Vec::new(),
        }
    }

    fn pointer_move(&mut self, pos: Option<usize>, now: Instant) -> Vec<InteractionEffect> {
        let deadline = now + self.timings.hover_delay;
        match &mut self.state {
            InteractionState::Idle | InteractionState::HoverPending(_) => {
                self.state = match pos {
                    Some(pos) => InteractionState::HoverPending(PendingHover { pos, deadline }),
                    None => InteractionState::Idle,
                };
            }
            InteractionState::HoverMenuOpen(menu) => {
                if !menu.label.focused && !menu.timers.pointer_over_menu {
                    menu.rehover = pos.map(|pos| PendingHover { pos, deadline });
                }
            }
            InteractionState::SelectionMenuOpen(_) | InteractionState::Committing => {}
        }
        Vec::new()
    }

    fn mouse_up(
        &mut self,
        selection: Selection,
        ctx: &InteractionContext<'_>,
        now: Instant,
    ) -> Vec<InteractionEffect> {
        if selection.is_collapsed() {
            return match self.state {
                InteractionState::SelectionMenuOpen(_) => self.close(),
                _ => Vec::new(),
            };
        }
        let Some(menu) = resolve_selection(selection, ctx, now + self.timings.inactivity_timeout)
        else {
            return Vec::new();
        };

        let mut effects = self.close();
        tracing::debug!(
            exact = %menu.exact.text,
            tokenized = ?menu.tokenized.as_ref().map(|t| t.text.as_str()),
            "selection menu opened"
        );
        self.state = InteractionState::SelectionMenuOpen(menu);
        effects.push(InteractionEffect::MenuOpened(MenuKind::Selection));
        effects
    }

    fn label_key(&mut self, key: LabelKey) -> Vec<InteractionEffect> {
        if !self.captures_keyboard() {
            return Vec::new();
        }
        match key {
            LabelKey::Enter => self.commit(CommitAction::Mask),
            LabelKey::Escape => self.close(),
            LabelKey::Backspace => {
                if let Some(label) = self.label_mut() {
                    label.skip_next_completion();
                }
                Vec::new()
            }
            LabelKey::Tab | LabelKey::Other => Vec::new(),
        }
    }

    fn commit(&mut self, action: CommitAction) -> Vec<InteractionEffect> {
        let previous = std::mem::replace(&mut self.state, InteractionState::Committing);
        let (kind, target, label, removable) = match &previous {
            InteractionState::HoverMenuOpen(menu) => {
                let allowed = match &action {
                    CommitAction::Ignore => menu.show_ignore,
                    CommitAction::Mask => menu.show_label_field,
                    CommitAction::Remove(id) => {
                        menu.existing_modifiers.iter().any(|m| &m.id == id)
                    }
                };
                if !allowed {
                    self.state = previous;
                    return Vec::new();
                }
                (MenuKind::Hover, &menu.target, &menu.label, true)
            }
            InteractionState::SelectionMenuOpen(menu) => {
                (MenuKind::Selection, menu.chosen(), &menu.label, false)
            }
            _ => {
                self.state = previous;
                return Vec::new();
            }
        };

        let command = match &action {
            CommitAction::Ignore => Modifier::ignore(target.text.clone()).map(ModifierCommand::Add),
            CommitAction::Mask => match label.resolved() {
                Some(label) => Modifier::mask(target.text.clone(), &label).map(ModifierCommand::Add),
                None => Err(ModifierValidationError::EmptyMaskType {
                    entity: target.text.clone(),
                }),
            },
            CommitAction::Remove(id) if removable => Ok(ModifierCommand::Remove { id: id.clone() }),
            CommitAction::Remove(_) => {
                self.state = previous;
                return Vec::new();
            }
        };

        match command {
            Ok(command) => {
                tracing::debug!(?command, "modifier committed");
                self.state = InteractionState::Idle;
                vec![
                    InteractionEffect::Dispatch(command),
                    InteractionEffect::MenuClosed(kind),
                ]
            }
            Err(e) => {
                tracing::debug!(error = %e, "modifier rejected");
                self.state = previous;
                if let Some(label) = self.label_mut() {
                    label.invalid = true;
                }
                vec![InteractionEffect::ValidationFailed(e)]
            }
        }
    }

    fn close(&mut self) -> Vec<InteractionEffect> {
        match std::mem::take(&mut self.state) {
            InteractionState::HoverMenuOpen(_) => vec![InteractionEffect::MenuClosed(MenuKind::Hover)],
            InteractionState::SelectionMenuOpen(_) => {
                vec![InteractionEffect::MenuClosed(MenuKind::Selection)]
            }
            _ => Vec::new(),
        }
    }

    fn label(&self) -> Option<&LabelField> {
        match &self.state {
            InteractionState::HoverMenuOpen(menu) if menu.show_label_field => Some(&menu.label),
            InteractionState::SelectionMenuOpen(menu) => Some(&menu.label),
            _ => None,
        }
    }

    fn label_mut(&mut self) -> Option<&mut LabelField> {
        match &mut self.state {
            InteractionState::HoverMenuOpen(menu) if menu.show_label_field => Some(&mut menu.label),
            InteractionState::SelectionMenuOpen(menu) => Some(&mut menu.label),
            _ => None,
        }
    }

    fn timers_mut(&mut self) -> Option<&mut MenuTimers> {
        match &mut self.state {
            InteractionState::HoverMenuOpen(menu) => Some(&mut menu.timers),
            InteractionState::SelectionMenuOpen(menu) => Some(&mut menu.timers),
            _ => None,
        }
    }
}

enum CommitAction {
    Ignore,
    Mask,
    Remove(SmolStr),
}

/// Apply a dispatched command to the store.
pub fn apply_command<P: ScopedStore>(
    store: &mut EntityStore<P>,
    scope: &Scope,
    command: ModifierCommand,
) {
    match command {
        ModifierCommand::Add(modifier) => store.add_modifier(scope, modifier),
        ModifierCommand::Remove { id } => {
            store.remove_modifier(scope, &id);
        }
    }
}

/// Work out what the hover menu at `pos` should show.
///
/// A rendered highlight under the pointer wins; otherwise the word around
/// `pos` is used.
fn resolve_hover(pos: usize, ctx: &InteractionContext<'_>, close_at: Instant) -> Option<HoverMenu> {
    let hit = ctx.decorations.hit_test(pos);
    let target = match hit {
        Some(decoration) => MenuTarget {
            range: decoration.range.clone(),
            text: ctx.doc.text_between(decoration.range.start, decoration.range.end),
        },
        None => {
            let word = ctx.doc.word_at(pos)?;
            MenuTarget {
                range: word.range,
                text: word.text,
            }
        }
    };
    if target.text.trim().is_empty() {
        return None;
    }

    let existing_modifiers: Vec<Modifier> = ctx
        .modifiers
        .iter()
        .filter(|m| m.matches(&target.text))
        .cloned()
        .collect();
    let has_mask = existing_modifiers.iter().any(|m| m.action.is_mask());
    let has_ignore = existing_modifiers.iter().any(|m| m.action.is_ignore());
    let lowered = target.text.to_lowercase();
    let is_pii = ctx.decorations.pii().iter().any(|d| match &d.kind {
        DecorationKind::Pii { raw_text, .. } => {
            d.range == target.range || raw_text.to_lowercase() == lowered
        }
        DecorationKind::Modifier { .. } => false,
    });

    Some(HoverMenu {
        target,
        existing_modifiers,
        show_ignore: is_pii && !has_mask,
        show_label_field: !has_ignore,
        label: LabelField::default(),
        timers: MenuTimers::started(close_at),
        rehover: None,
    })
}

/// Build the selection menu for a non-empty selection.
fn resolve_selection(
    selection: Selection,
    ctx: &InteractionContext<'_>,
    close_at: Instant,
) -> Option<SelectionMenu> {
    let offsets = ctx.projection.offsets_for(selection.to_range())?;
    let exact_text = ctx.projection.slice(offsets.clone());
    if exact_text.trim().is_empty() {
        return None;
    }
    let exact = MenuTarget {
        range: selection.to_range(),
        text: exact_text,
    };

    let tokenized = tokenize_selection(ctx.projection.text(), offsets)
        .and_then(|span| {
            let range = ctx.projection.map_range(span.range.start, span.range.end).ok()?;
            Some(MenuTarget {
                range,
                text: span.text,
            })
        })
        .filter(|t| t.text != exact.text);

    let choice = if tokenized.is_some() {
        SelectionChoice::Tokenized
    } else {
        SelectionChoice::Exact
    };
    Some(SelectionMenu {
        exact,
        tokenized,
        choice,
        label: LabelField::default(),
        timers: MenuTimers::started(close_at),
    })
}
