//! Menu models for the modifier interaction layer.
//!
//! These hold what a host needs to draw the hover and selection menus. They
//! carry no rendering state; the host reads them after each transition.

use std::ops::Range;

use web_time::Instant;

use crate::text_helpers::{DEFAULT_MASK_LABEL, PREDEFINED_LABELS, find_best_label_match};
use crate::types::Modifier;

/// Span of document text a menu acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuTarget {
    pub range: Range<usize>,
    pub text: String,
}

/// Close timers shared by both menus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuTimers {
    /// When the menu closes on its own unless something resets it.
    pub close_deadline: Option<Instant>,
    pub pointer_over_menu: bool,
}

impl MenuTimers {
    pub(crate) fn started(deadline: Instant) -> Self {
        Self {
            close_deadline: Some(deadline),
            pointer_over_menu: false,
        }
    }
}

/// Label text field inside a menu, with inline completion.
///
/// Shows [`DEFAULT_MASK_LABEL`] as a placeholder until focused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelField {
    pub value: String,
    pub is_default: bool,
    pub focused: bool,
    /// Set when a commit was rejected; cleared on the next edit.
    pub invalid: bool,
    skip_completion: bool,
}

impl Default for LabelField {
    fn default() -> Self {
        Self {
            value: DEFAULT_MASK_LABEL.to_string(),
            is_default: true,
            focused: false,
            invalid: false,
            skip_completion: false,
        }
    }
}

impl LabelField {
    pub(crate) fn focus(&mut self) {
        self.focused = true;
        if self.is_default {
            self.value.clear();
            self.is_default = false;
        }
    }

    pub(crate) fn blur(&mut self) {
        self.focused = false;
        if self.value.trim().is_empty() {
            self.value = DEFAULT_MASK_LABEL.to_string();
            self.is_default = true;
        }
    }

    /// Apply typed input. Returns the completed value and the char range of
    /// the completed suffix when inline completion kicked in.
    pub(crate) fn input(&mut self, value: &str) -> Option<(String, Range<usize>)> {
        self.value = value.to_string();
        self.invalid = false;
        if std::mem::take(&mut self.skip_completion) {
            return None;
        }
        if self.is_default || value.is_empty() {
            return None;
        }

        let best = find_best_label_match(value, PREDEFINED_LABELS)?;
        if best == value.to_uppercase() {
            return None;
        }
        let typed = value.chars().count();
        self.value = best.to_string();
        Some((self.value.clone(), typed.min(best.chars().count())..best.chars().count()))
    }

    /// The next input comes from a deletion and must not be completed.
    pub(crate) fn skip_next_completion(&mut self) {
        self.skip_completion = true;
    }

    /// Label to commit, or `None` when the field holds only whitespace.
    pub fn resolved(&self) -> Option<String> {
        if self.is_default {
            return Some(DEFAULT_MASK_LABEL.to_string());
        }
        let label = self.value.trim();
        (!label.is_empty()).then(|| label.to_uppercase())
    }
}

/// Menu opened by hovering a word or highlight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoverMenu {
    pub target: MenuTarget,
    /// Modifiers already registered for the target text; each can be removed.
    pub existing_modifiers: Vec<Modifier>,
    /// Offered only for text highlighted as PII without a mask modifier.
    pub show_ignore: bool,
    /// Offered only for text without an ignore modifier.
    pub show_label_field: bool,
    pub label: LabelField,
    pub timers: MenuTimers,
    /// Pointer moved to other text; the menu is re-resolved at the deadline.
    pub rehover: Option<PendingHover>,
}

/// Which span a selection-menu commit applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionChoice {
    /// Exactly the selected text.
    Exact,
    /// The selection expanded to the whole tokens it touches.
    Tokenized,
}

/// Menu opened on mouse-up over a non-empty selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionMenu {
    pub exact: MenuTarget,
    /// Present when token expansion found something different from the
    /// exact selection.
    pub tokenized: Option<MenuTarget>,
    pub choice: SelectionChoice,
    pub label: LabelField,
    pub timers: MenuTimers,
}

impl SelectionMenu {
    /// Target of the current choice.
    pub fn chosen(&self) -> &MenuTarget {
        match (self.choice, &self.tokenized) {
            (SelectionChoice::Tokenized, Some(tokenized)) => tokenized,
            _ => &self.exact,
        }
    }
}

/// Hover timer armed over a document position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingHover {
    pub pos: usize,
    pub deadline: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_field_default_and_focus() {
        let mut field = LabelField::default();
        assert_eq!(field.resolved().as_deref(), Some("CUSTOM"));

        field.focus();
        assert!(field.value.is_empty());
        assert_eq!(field.resolved(), None);

        field.blur();
        assert!(field.is_default);
        assert_eq!(field.value, "CUSTOM");
    }

    #[test]
    fn test_label_field_completion() {
        let mut field = LabelField::default();
        field.focus();
        let (value, selected) = field.input("pers").unwrap();
        assert_eq!(value, "PERSON");
        assert_eq!(selected, 4..6);
        assert_eq!(field.resolved().as_deref(), Some("PERSON"));

        // Deleting does not immediately complete again.
        field.skip_next_completion();
        assert_eq!(field.input("PERSO"), None);
        assert_eq!(field.value, "PERSO");

        // Exact matches need no completion.
        assert_eq!(field.input("email"), None);
        assert_eq!(field.resolved().as_deref(), Some("EMAIL"));
    }

    #[test]
    fn test_label_field_free_text() {
        let mut field = LabelField::default();
        field.focus();
        assert_eq!(field.input("project x"), None);
        assert_eq!(field.resolved().as_deref(), Some("PROJECT X"));
    }
}
