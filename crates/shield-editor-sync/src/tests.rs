use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shield_common::wire::{DetectedEntity, DetectionRequest, MaskResponse, Occurrence};
use shield_common::{ApiError, DetectionService, ShieldConfig};
use shield_editor_core::interaction::HOVER_DELAY;
use shield_editor_core::{
    DecorationKind, Document, InteractionEffect, InteractionEvent, MemoryScopedStore,
    ModifierAction, PiiEntity, PiiOccurrence, Scope, ScopeState,
};
use tokio::sync::oneshot;
use web_time::Instant;

use crate::orchestrator::DEFAULT_DEBOUNCE;
use crate::session::{SessionOptions, ShieldSession};

const SCENARIO: &str = "Contact John Doe at john@x.com";

type Reply = Result<MaskResponse, ApiError>;

enum Queued {
    Now(Reply),
    Gated(oneshot::Receiver<Reply>),
}

#[derive(Default)]
struct FakeState {
    requests: Vec<DetectionRequest>,
    replies: VecDeque<Queued>,
}

/// Detection service answering from a queue; an empty queue detects nothing.
#[derive(Clone, Default)]
struct FakeService {
    state: Arc<Mutex<FakeState>>,
}

impl FakeService {
    fn reply(&self, reply: Reply) {
        self.state.lock().unwrap().replies.push_back(Queued::Now(reply));
    }

    /// Queue a reply that is held back until the returned sender fires.
    fn gated(&self) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().replies.push_back(Queued::Gated(rx));
        tx
    }

    fn requests(&self) -> Vec<DetectionRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    async fn wait_for_requests(&self, count: usize) {
        while self.requests().len() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl DetectionService for FakeService {
    async fn detect(&self, request: DetectionRequest) -> Result<MaskResponse, ApiError> {
        let queued = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request);
            state.replies.pop_front()
        };
        match queued {
            Some(Queued::Now(reply)) => reply,
            Some(Queued::Gated(rx)) => rx.await.unwrap_or_else(|_| Ok(MaskResponse::default())),
            None => Ok(MaskResponse::default()),
        }
    }
}

fn detected(label: &str, raw: &str, pii_type: &str, start_idx: usize, end_idx: usize) -> DetectedEntity {
    DetectedEntity {
        label: label.into(),
        pii_type: pii_type.into(),
        raw_text: raw.into(),
        occurrences: vec![Occurrence { start_idx, end_idx }],
    }
}

fn scenario_response() -> MaskResponse {
    MaskResponse {
        pii: vec![vec![
            detected("e1", "John Doe", "PERSON", 8, 16),
            detected("e2", "john@x.com", "EMAIL", 20, 30),
        ]],
        ..Default::default()
    }
}

fn session_with(
    fake: &FakeService,
    persistence: MemoryScopedStore,
) -> ShieldSession<FakeService, MemoryScopedStore> {
    ShieldSession::new(fake.clone(), persistence, SessionOptions::default())
}

/// `(range, masked)` of each PII highlight.
fn pii_highlights(session: &ShieldSession<FakeService, MemoryScopedStore>) -> Vec<(usize, usize, bool)> {
    session
        .decorations()
        .pii()
        .iter()
        .map(|d| match &d.kind {
            DecorationKind::Pii { masked, .. } => (d.range.start, d.range.end, *masked),
            DecorationKind::Modifier { .. } => unreachable!(),
        })
        .collect()
}

/// Load the scenario document and run one detection with the scenario response.
async fn detect_scenario(
    session: &mut ShieldSession<FakeService, MemoryScopedStore>,
    fake: &FakeService,
    t0: Instant,
) {
    fake.reply(Ok(scenario_response()));
    session.document_changed(Document::from_paragraphs(&[SCENARIO]), t0);
    session.tick(t0 + DEFAULT_DEBOUNCE);
    assert_eq!(session.next_completion().await, Some(true));
}

#[tokio::test]
async fn test_detection_waits_for_debounce() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    let t0 = Instant::now();

    session.document_changed(Document::from_paragraphs(&["Contact John"]), t0);
    session.document_changed(Document::from_paragraphs(&[SCENARIO]), t0 + Duration::from_millis(300));
    assert_eq!(
        session.next_deadline(),
        Some(t0 + Duration::from_millis(300) + DEFAULT_DEBOUNCE)
    );

    session.tick(t0 + DEFAULT_DEBOUNCE);
    assert_eq!(session.in_flight(), 0);

    session.tick(t0 + Duration::from_millis(300) + DEFAULT_DEBOUNCE);
    assert_eq!(session.in_flight(), 1);
    assert_eq!(session.next_completion().await, Some(true));

    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, SCENARIO);
    assert_eq!(session.next_completion().await, None);
}

#[tokio::test]
async fn test_scenario_toggle_leaves_one_masked() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    detect_scenario(&mut session, &fake, Instant::now()).await;

    assert_eq!(
        pii_highlights(&session),
        vec![(9, 17, true), (21, 31, true)]
    );

    assert_eq!(session.toggle_masking("e1"), Some(false));
    assert_eq!(
        pii_highlights(&session),
        vec![(9, 17, false), (21, 31, true)]
    );
    assert_eq!(session.toggle_masking("missing"), None);
}

#[tokio::test]
async fn test_redetection_preserves_toggles() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    detect_scenario(&mut session, &fake, Instant::now()).await;
    session.toggle_masking("e1");

    fake.reply(Ok(scenario_response()));
    assert!(session.trigger_detection().is_some());
    assert_eq!(session.next_completion().await, Some(true));

    let flags: Vec<(String, bool)> = session
        .entities()
        .iter()
        .map(|e| (e.label.to_string(), e.should_mask))
        .collect();
    assert_eq!(
        flags,
        vec![("e1".to_string(), false), ("e2".to_string(), true)]
    );

    // Second request carried the existing entities as hints.
    let requests = fake.requests();
    assert_eq!(requests[1].known_entities.len(), 2);
}

#[tokio::test]
async fn test_failed_detection_keeps_entities() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    detect_scenario(&mut session, &fake, Instant::now()).await;

    fake.reply(Err(ApiError::Status {
        status: 503,
        body: "busy".into(),
    }));
    session.trigger_detection();
    assert_eq!(session.next_completion().await, Some(false));
    assert_eq!(session.entities().len(), 2);
    assert_eq!(session.decorations().pii().len(), 2);
}

#[tokio::test]
async fn test_mask_and_unmask_all() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    detect_scenario(&mut session, &fake, Instant::now()).await;

    assert_eq!(session.unmask_all(), 2);
    assert!(pii_highlights(&session).iter().all(|&(_, _, masked)| !masked));
    assert_eq!(session.unmask_all(), 0);
    assert_eq!(session.mask_all(), 2);
}

#[tokio::test]
async fn test_highlights_follow_edits_between_detections() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    let t0 = Instant::now();
    detect_scenario(&mut session, &fake, t0).await;

    let t1 = t0 + Duration::from_secs(2);
    session.document_changed(Document::from_paragraphs(&["Hi, Contact John Doe at john@x.com"]), t1);
    assert_eq!(
        pii_highlights(&session),
        vec![(13, 21, true), (25, 35, true)]
    );
    assert_eq!(session.next_deadline(), Some(t1 + DEFAULT_DEBOUNCE));

    session.document_changed(Document::default(), t1);
    assert!(session.decorations().is_empty());
    assert!(session.entities().is_empty());
    assert_eq!(session.next_deadline(), None);
}

#[tokio::test]
async fn test_scope_switch_clears_and_redetects() {
    let a = Scope::Conversation("a".into());
    let b = Scope::Conversation("b".into());
    let stored = ScopeState {
        entities: vec![
            PiiEntity::new("e1", "John Doe", "PERSON", vec![PiiOccurrence::new(9, 17)]),
            PiiEntity::new("e2", "john@x.com", "EMAIL", vec![PiiOccurrence::new(21, 31)]),
        ],
        modifiers: Vec::new(),
    };
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new().with_scope(a.clone(), stored));
    session.document_changed(Document::from_paragraphs(&[SCENARIO]), Instant::now());

    let release_a = fake.gated();
    session.reload_state_for_scope(a.clone());
    assert_eq!(session.decorations().pii().len(), 2);
    fake.wait_for_requests(1).await;

    fake.reply(Ok(MaskResponse {
        pii: vec![vec![detected("e1", "John Doe", "PERSON", 8, 16)]],
        ..Default::default()
    }));
    session.reload_state_for_scope(b.clone());
    assert_eq!(session.active_scope(), &b);
    assert!(session.decorations().is_empty());
    assert_eq!(session.in_flight(), 2);

    // B's own detection lands.
    assert_eq!(session.next_completion().await, Some(true));
    assert_eq!(session.decorations().pii().len(), 1);

    // A's late response is for a scope that is no longer live.
    release_a.send(Ok(scenario_response())).unwrap();
    assert_eq!(session.next_completion().await, Some(false));
    assert_eq!(session.decorations().pii().len(), 1);

    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.text == SCENARIO));
    assert_eq!(
        session.store().persistence().get(&a).map(|s| s.entities.len()),
        Some(2)
    );
}

#[tokio::test]
async fn test_last_response_wins() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    session.document_changed(Document::from_paragraphs(&[SCENARIO]), Instant::now());

    let first = fake.gated();
    let second = fake.gated();
    session.trigger_detection();
    fake.wait_for_requests(1).await;
    session.trigger_detection();
    fake.wait_for_requests(2).await;

    second.send(Ok(scenario_response())).unwrap();
    assert_eq!(session.next_completion().await, Some(true));
    assert_eq!(session.entities().len(), 2);

    first
        .send(Ok(MaskResponse {
            pii: vec![vec![detected("e1", "John Doe", "PERSON", 8, 16)]],
            ..Default::default()
        }))
        .unwrap();
    assert_eq!(session.next_completion().await, Some(true));
    assert_eq!(session.entities().len(), 1);
}

#[tokio::test]
async fn test_masked_text_tracks_current_text() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    let t0 = Instant::now();
    assert_eq!(session.masked_text(), None);

    fake.reply(Ok(MaskResponse {
        text: vec!["Contact [PERSON_1] at [EMAIL_1]".into()],
        ..scenario_response()
    }));
    session.document_changed(Document::from_paragraphs(&[SCENARIO]), t0);
    session.tick(t0 + DEFAULT_DEBOUNCE);
    assert_eq!(session.next_completion().await, Some(true));
    assert_eq!(session.masked_text(), Some("Contact [PERSON_1] at [EMAIL_1]"));

    session.document_changed(
        Document::from_paragraphs(&["Contact John Doe at john@x.com today"]),
        t0 + Duration::from_secs(1),
    );
    assert_eq!(session.masked_text(), None);
}

#[tokio::test]
async fn test_transfer_scope_keeps_state_and_pending_detection() {
    let chat = Scope::Conversation("chat-1".into());
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    detect_scenario(&mut session, &fake, Instant::now()).await;
    session.toggle_masking("e1");

    let release = fake.gated();
    assert!(session.trigger_detection().is_some());
    fake.wait_for_requests(2).await;

    session.transfer_scope(chat.clone());
    assert_eq!(session.active_scope(), &chat);
    assert_eq!(pii_highlights(&session), vec![(9, 17, false), (21, 31, true)]);
    assert_eq!(
        session
            .store()
            .persistence()
            .get(&Scope::Global)
            .map(|s| s.entities.len()),
        Some(0)
    );

    // The request sent before the transfer lands in the new scope.
    release.send(Ok(scenario_response())).unwrap();
    assert_eq!(session.next_completion().await, Some(true));
    assert_eq!(pii_highlights(&session), vec![(9, 17, false), (21, 31, true)]);
    assert_eq!(
        session.store().persistence().get(&chat).map(|s| s.entities.len()),
        Some(2)
    );
}

#[tokio::test]
async fn test_hover_ignore_updates_store_and_decorations() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    let t0 = Instant::now();
    detect_scenario(&mut session, &fake, t0).await;

    let t1 = t0 + Duration::from_secs(5);
    session.handle_interaction(InteractionEvent::PointerMove { pos: Some(10) }, t1);
    let opened = session.tick(t1 + HOVER_DELAY);
    assert_eq!(opened.len(), 1);

    let effects = session.handle_interaction(InteractionEvent::IgnoreClicked, t1 + HOVER_DELAY);
    assert!(matches!(effects[0], InteractionEffect::Dispatch(_)));

    let modifiers = session.modifiers().to_vec();
    assert_eq!(modifiers.len(), 1);
    assert_eq!(modifiers[0].entity, "John Doe");
    assert_eq!(modifiers[0].action, ModifierAction::Ignore);

    assert_eq!(pii_highlights(&session), vec![(21, 31, true)]);
    let modifier_ranges: Vec<_> = session
        .decorations()
        .modifiers()
        .iter()
        .map(|d| d.range.clone())
        .collect();
    assert_eq!(modifier_ranges, vec![9..17]);

    // The modifier change reruns detection with the modifier as context.
    assert_eq!(session.next_deadline(), Some(t1 + HOVER_DELAY + DEFAULT_DEBOUNCE));
    session.tick(t1 + HOVER_DELAY + DEFAULT_DEBOUNCE);
    session.next_completion().await;
    assert_eq!(fake.requests()[1].modifiers.len(), 1);
}

#[tokio::test]
async fn test_listeners_see_detection_results() {
    let fake = FakeService::default();
    let mut session = session_with(&fake, MemoryScopedStore::new());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    session.on_entities_changed(move |scope, entities| {
        sink.borrow_mut().push((scope.clone(), entities.len()));
    });

    detect_scenario(&mut session, &fake, Instant::now()).await;
    assert_eq!(*seen.borrow(), vec![(Scope::Global, 2)]);
}

#[tokio::test]
async fn test_disabled_session_never_detects() {
    let mut session = ShieldSession::<FakeService, _>::disabled(
        MemoryScopedStore::new(),
        SessionOptions::default(),
    );
    let t0 = Instant::now();
    session.document_changed(Document::from_paragraphs(&[SCENARIO]), t0);
    session.tick(t0 + DEFAULT_DEBOUNCE);

    assert!(!session.is_enabled());
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.trigger_detection(), None);
    assert_eq!(session.next_completion().await, None);
}

#[test]
fn test_from_config_without_key_is_disabled() {
    let session = ShieldSession::from_config(&ShieldConfig::default(), MemoryScopedStore::new())
        .unwrap();
    assert!(!session.is_enabled());
}
