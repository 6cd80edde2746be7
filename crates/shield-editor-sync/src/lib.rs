//! shield-editor-sync: debounced detection and the host-facing session for
//! the PII overlay.
//!
//! - `Debouncer` - cancellable quiet-period timer
//! - `DetectionOrchestrator` - request building and response merging
//! - `ShieldSession` - document, store, decorations and menus in one place

pub mod debounce;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
mod tests;

pub use debounce::Debouncer;
pub use orchestrator::{DetectionOrchestrator, TextChange, merge_response, remap_entities};
pub use session::{SessionOptions, ShieldSession};
