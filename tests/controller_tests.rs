use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use voicebridge::protocol::models::{AudioConfig, OutputAudioConfig};
use voicebridge::{
    ClientEvent, Connector, Error, Item, MemoryStore, MicTrack, Response, Result,
    ServerEvent, SessionController, SessionState, SessionUpdate, SettingsStore, Transport,
    UiEvent, VoiceId,
};

/// Test transport scripted from the outside: the test plays the server by
/// pushing events into `server_tx` and inspecting the `sent` log.
struct ScriptedTransport {
    incoming: mpsc::UnboundedReceiver<ServerEvent>,
    sent: Arc<Mutex<Vec<ClientEvent>>>,
    mic: Arc<MicTrack>,
    fail_sends: bool,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        if self.fail_sends {
            return Err(Error::SessionClosed);
        }
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        Ok(self.incoming.recv().await)
    }

    fn mic_track(&self) -> Option<Arc<MicTrack>> {
        Some(Arc::clone(&self.mic))
    }
}

#[derive(Clone)]
struct SessionHandles {
    server_tx: mpsc::UnboundedSender<ServerEvent>,
    sent: Arc<Mutex<Vec<ClientEvent>>>,
    mic: Arc<MicTrack>,
}

#[derive(Default)]
struct MockConnector {
    fail_connects: bool,
    fail_sends: bool,
    sessions: Arc<Mutex<Vec<SessionHandles>>>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        if self.fail_connects {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let (server_tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mic = Arc::new(MicTrack::new());
        self.sessions.lock().unwrap().push(SessionHandles {
            server_tx,
            sent: Arc::clone(&sent),
            mic: Arc::clone(&mic),
        });
        Ok(Box::new(ScriptedTransport {
            incoming,
            sent,
            mic,
            fail_sends: self.fail_sends,
        }))
    }
}

/// In-memory store shareable across controllers, for persistence assertions.
#[derive(Clone, Default)]
struct SharedStore(Arc<Mutex<MemoryStore>>);

impl SettingsStore for SharedStore {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().unwrap().get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.0.lock().unwrap().set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.0.lock().unwrap().remove(key)
    }
}

struct Fixture {
    controller: SessionController,
    sessions: Arc<Mutex<Vec<SessionHandles>>>,
}

fn fixture_with_store(store: impl SettingsStore + 'static) -> Fixture {
    let connector = MockConnector::default();
    let sessions = Arc::clone(&connector.sessions);
    Fixture {
        controller: SessionController::new(connector, store),
        sessions,
    }
}

fn fixture() -> Fixture {
    fixture_with_store(MemoryStore::new())
}

impl Fixture {
    async fn start(&mut self) -> SessionHandles {
        self.controller.start().await.expect("start succeeds");
        match self.controller.next_ui_event().await {
            Some(UiEvent::SessionStarted) => {}
            other => panic!("expected SessionStarted, got {other:?}"),
        }
        self.sessions.lock().unwrap().last().cloned().expect("session opened")
    }
}

fn session_created() -> ServerEvent {
    serde_json::from_value(json!({
        "type": "session.created",
        "event_id": "evt_created",
        "session": { "id": "sess_1" }
    }))
    .unwrap()
}

fn palette_response(arguments: &str) -> ServerEvent {
    ServerEvent::ResponseDone {
        event_id: "evt_done".to_string(),
        response: Response {
            id: Some("resp_1".to_string()),
            status: None,
            output: Some(vec![Item::FunctionCall {
                id: None,
                status: None,
                name: "display_color_palette".to_string(),
                call_id: Some("call_1".to_string()),
                arguments: arguments.to_string(),
            }]),
        },
    }
}

const VALID_ARGS: &str = r##"{"theme":"ocean","colors":["#001","#002","#003","#004","#005"]}"##;

/// Spin until the transport has logged `n` outbound events. Relies on paused
/// time auto-advance to fail fast via the timeout instead of hanging.
async fn wait_for_sent(sent: &Arc<Mutex<Vec<ClientEvent>>>, n: usize) -> Vec<ClientEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if sent.lock().unwrap().len() >= n {
                return sent.lock().unwrap().clone();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {n} outbound events, got {:?}", sent.lock().unwrap()))
}

fn voice_of(event: &ClientEvent) -> Option<VoiceId> {
    match event {
        ClientEvent::SessionUpdate { session, .. } => match session.as_ref() {
            SessionUpdate {
                audio:
                    Some(AudioConfig {
                        output: Some(OutputAudioConfig { voice: Some(voice) }),
                    }),
                ..
            } => Some(*voice),
            _ => None,
        },
        _ => None,
    }
}

fn is_tool_registration(event: &ClientEvent) -> bool {
    matches!(event, ClientEvent::SessionUpdate { session, .. } if session.tools.is_some())
}

#[tokio::test(start_paused = true)]
async fn session_created_triggers_registration_then_voice() {
    let mut fx = fixture();
    let handles = fx.start().await;

    handles.server_tx.send(session_created()).unwrap();
    let sent = wait_for_sent(&handles.sent, 2).await;

    assert!(is_tool_registration(&sent[0]));
    assert_eq!(voice_of(&sent[1]), Some(VoiceId::Marin));

    // A second session.created must not re-send either update.
    handles.server_tx.send(session_created()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handles.sent.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stored_instructions_are_applied_between_tools_and_voice() {
    let store = SharedStore::default();
    let mut seed = fixture_with_store(store.clone());
    seed.controller.set_instructions("answer in haiku").unwrap();

    let mut fx = fixture_with_store(store);
    let handles = fx.start().await;
    handles.server_tx.send(session_created()).unwrap();

    let sent = wait_for_sent(&handles.sent, 3).await;
    assert!(is_tool_registration(&sent[0]));
    match &sent[1] {
        ClientEvent::SessionUpdate { session, .. } => {
            assert_eq!(session.instructions.as_deref(), Some("answer in haiku"));
        }
        other => panic!("expected instructions update, got {other:?}"),
    }
    assert_eq!(voice_of(&sent[2]), Some(VoiceId::Marin));
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_while_active() {
    let mut fx = fixture();
    let _handles = fx.start().await;

    fx.controller.start().await.expect("duplicate start is ok");
    assert_eq!(fx.sessions.lock().unwrap().len(), 1);
    assert!(fx.controller.is_active());
}

#[tokio::test(start_paused = true)]
async fn failed_connect_returns_to_stopped() {
    let connector = MockConnector {
        fail_connects: true,
        ..MockConnector::default()
    };
    let mut controller = SessionController::new(connector, MemoryStore::new());

    let err = controller.start().await.expect_err("connect must fail");
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(controller.state(), SessionState::Stopped);
    assert!(!controller.is_active());
}

#[tokio::test(start_paused = true)]
async fn send_text_produces_exactly_one_item_create() {
    let mut fx = fixture();
    let handles = fx.start().await;

    fx.controller.send_text("hello").await.unwrap();
    let sent = wait_for_sent(&handles.sent, 1).await;
    assert!(matches!(
        &sent[0],
        ClientEvent::ConversationItemCreate { .. }
    ));

    // Whitespace-only input never reaches the transport.
    fx.controller.send_text("   \n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handles.sent.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_pending_drains_the_buffer_once() {
    let mut fx = fixture();
    let handles = fx.start().await;

    fx.controller.set_pending_text("two birds");
    fx.controller.send_pending().await.unwrap();
    // The second send finds an empty buffer, as when the Enter key and the
    // send button both fire for the same input.
    fx.controller.send_pending().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handles.sent.lock().unwrap().len(), 1);
    assert_eq!(fx.controller.pending_text(), "");
}

#[tokio::test(start_paused = true)]
async fn send_text_without_a_session_fails() {
    let mut fx = fixture();
    let err = fx.controller.send_text("hello").await.expect_err("no session");
    assert!(matches!(err, Error::SessionClosed));
}

#[tokio::test(start_paused = true)]
async fn palette_invocation_reaches_the_ui_then_asks_for_feedback() {
    let mut fx = fixture();
    let handles = fx.start().await;

    handles.server_tx.send(session_created()).unwrap();
    wait_for_sent(&handles.sent, 2).await;

    handles.server_tx.send(palette_response(VALID_ARGS)).unwrap();
    match fx.controller.next_ui_event().await {
        Some(UiEvent::PaletteReady(palette)) => {
            assert_eq!(palette.theme, "ocean");
            assert_eq!(palette.colors.len(), 5);
        }
        other => panic!("expected PaletteReady, got {other:?}"),
    }
    assert_eq!(fx.controller.palette().unwrap().theme, "ocean");

    // The scripted feedback response fires after the render delay.
    let sent = wait_for_sent(&handles.sent, 3).await;
    match &sent[2] {
        ClientEvent::ResponseCreate { response, .. } => {
            let config = response.as_ref().expect("instructions attached");
            assert!(
                config
                    .instructions
                    .as_deref()
                    .is_some_and(|i| i.contains("feedback"))
            );
        }
        other => panic!("expected response.create, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stopping_during_the_delay_cancels_the_follow_up() {
    let mut fx = fixture();
    let handles = fx.start().await;

    handles.server_tx.send(session_created()).unwrap();
    wait_for_sent(&handles.sent, 2).await;
    handles.server_tx.send(palette_response(VALID_ARGS)).unwrap();
    match fx.controller.next_ui_event().await {
        Some(UiEvent::PaletteReady(_)) => {}
        other => panic!("expected PaletteReady, got {other:?}"),
    }

    fx.controller.stop();
    assert_eq!(fx.controller.state(), SessionState::Stopped);
    assert!(fx.controller.palette().is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handles.sent.lock().unwrap().len(), 2, "no follow-up after stop");
}

#[tokio::test(start_paused = true)]
async fn malformed_invocation_surfaces_an_error_without_a_follow_up() {
    let mut fx = fixture();
    let handles = fx.start().await;

    handles.server_tx.send(session_created()).unwrap();
    wait_for_sent(&handles.sent, 2).await;
    handles
        .server_tx
        .send(palette_response(r#"{"theme":"ocean","colors":["red"]}"#))
        .unwrap();

    match fx.controller.next_ui_event().await {
        Some(UiEvent::PaletteError { message }) => {
            assert!(message.contains("Malformed tool invocation"));
        }
        other => panic!("expected PaletteError, got {other:?}"),
    }
    assert!(fx.controller.palette().is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handles.sent.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn restart_registers_the_tool_again() {
    let mut fx = fixture();
    let first = fx.start().await;
    first.server_tx.send(session_created()).unwrap();
    wait_for_sent(&first.sent, 2).await;

    fx.controller.stop();
    match fx.controller.next_ui_event().await {
        Some(UiEvent::SessionStopped) => {}
        other => panic!("expected SessionStopped, got {other:?}"),
    }

    let second = fx.start().await;
    second.server_tx.send(session_created()).unwrap();
    let sent = wait_for_sent(&second.sent, 2).await;
    assert!(is_tool_registration(&sent[0]));
    assert_eq!(voice_of(&sent[1]), Some(VoiceId::Marin));
}

#[tokio::test(start_paused = true)]
async fn voice_change_persists_and_applies_to_the_live_session() {
    let store = SharedStore::default();
    let mut fx = fixture_with_store(store.clone());
    let handles = fx.start().await;

    fx.controller.set_voice(VoiceId::Nova).await.unwrap();
    assert_eq!(fx.controller.voice(), VoiceId::Nova);

    let sent = wait_for_sent(&handles.sent, 1).await;
    assert_eq!(voice_of(&sent[0]), Some(VoiceId::Nova));

    // A controller built later over the same store starts with the new voice.
    let later = fixture_with_store(store);
    assert_eq!(later.controller.voice(), VoiceId::Nova);
}

#[tokio::test(start_paused = true)]
async fn voice_change_while_stopped_only_persists() {
    let mut fx = fixture();
    fx.controller.set_voice(VoiceId::Echo).await.unwrap();
    assert_eq!(fx.controller.voice(), VoiceId::Echo);
    assert!(fx.sessions.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn apply_instructions_updates_the_live_session() {
    let mut fx = fixture();
    let handles = fx.start().await;

    fx.controller.set_instructions("speak like a pirate").unwrap();
    fx.controller.apply_instructions().await.unwrap();

    let sent = wait_for_sent(&handles.sent, 1).await;
    match &sent[0] {
        ClientEvent::SessionUpdate { session, .. } => {
            assert_eq!(session.instructions.as_deref(), Some("speak like a pirate"));
        }
        other => panic!("expected session.update, got {other:?}"),
    }

    // Blank instructions are never pushed.
    fx.controller.clear_instructions().unwrap();
    fx.controller.apply_instructions().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handles.sent.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn mic_toggle_drives_the_transport_track() {
    let mut fx = fixture();
    let handles = fx.start().await;

    assert!(handles.mic.is_enabled());
    assert!(fx.controller.toggle_mic());
    assert!(!handles.mic.is_enabled());
    assert!(fx.controller.is_mic_muted());

    fx.controller.stop();
    assert!(!fx.controller.is_mic_muted(), "mute flag resets on stop");
}

#[tokio::test(start_paused = true)]
async fn pause_is_a_local_flag() {
    let mut fx = fixture();
    let handles = fx.start().await;

    assert!(fx.controller.toggle_pause());
    assert!(fx.controller.is_paused());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handles.sent.lock().unwrap().is_empty(), "pause sends nothing");

    assert!(!fx.controller.toggle_pause());
}

#[tokio::test(start_paused = true)]
async fn server_errors_surface_as_ui_events() {
    let mut fx = fixture();
    let handles = fx.start().await;

    let event: ServerEvent = serde_json::from_value(json!({
        "type": "error",
        "event_id": "evt_err",
        "error": {
            "type": "invalid_request_error",
            "code": null,
            "message": "bad request",
            "param": null,
            "event_id": null
        }
    }))
    .unwrap();
    handles.server_tx.send(event).unwrap();

    match fx.controller.next_ui_event().await {
        Some(UiEvent::ServerError(error)) => assert_eq!(error.message, "bad request"),
        other => panic!("expected ServerError, got {other:?}"),
    }
    assert!(fx.controller.is_active(), "errors do not end the session");
}

#[tokio::test(start_paused = true)]
async fn server_close_ends_the_session() {
    let mut fx = fixture();
    let handles = fx.start().await;

    // Both clones of the sender must go for the transport to see the close.
    fx.sessions.lock().unwrap().clear();
    drop(handles.server_tx);
    match fx.controller.next_ui_event().await {
        Some(UiEvent::SessionStopped) => {}
        other => panic!("expected SessionStopped, got {other:?}"),
    }
    assert_eq!(fx.controller.state(), SessionState::Stopped);
    assert!(!fx.controller.is_active());

    // A fresh start opens a second session.
    let second = fx.start().await;
    second.server_tx.send(session_created()).unwrap();
    wait_for_sent(&second.sent, 2).await;
}

#[tokio::test(start_paused = true)]
async fn send_text_completes_while_the_ui_feed_is_undrained() {
    let mut fx = fixture();
    let handles = fx.start().await;

    // Flood far past the UI channel capacity without draining the feed.
    for i in 0..200 {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "error",
            "event_id": format!("evt_{i}"),
            "error": {
                "type": "server_error",
                "code": null,
                "message": "overloaded",
                "param": null,
                "event_id": null
            }
        }))
        .unwrap();
        handles.server_tx.send(event).unwrap();
    }

    // The run loop must keep servicing commands even though nobody is
    // consuming UI events; the overflow is dropped, not a reason to park.
    tokio::time::timeout(Duration::from_secs(30), fx.controller.send_text("hello"))
        .await
        .expect("send must not wait on the UI feed")
        .unwrap();

    let sent = wait_for_sent(&handles.sent, 1).await;
    assert!(matches!(
        &sent[0],
        ClientEvent::ConversationItemCreate { .. }
    ));

    // The buffered portion of the flood is still there once drained.
    match fx.controller.next_ui_event().await {
        Some(UiEvent::ServerError(error)) => assert_eq!(error.message, "overloaded"),
        other => panic!("expected ServerError, got {other:?}"),
    }
    assert!(fx.controller.is_active());
}

#[tokio::test(start_paused = true)]
async fn state_reports_stopped_after_a_silent_transport_death() {
    let mut fx = fixture();
    let handles = fx.start().await;

    fx.sessions.lock().unwrap().clear();
    drop(handles.server_tx);

    // Without the embedder touching the UI feed, state() must fold to
    // Stopped once the run loop exits, and agree with is_active().
    tokio::time::timeout(Duration::from_secs(5), async {
        while fx.controller.state() != SessionState::Stopped {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("state must fold to Stopped once the run loop exits");
    assert!(!fx.controller.is_active());

    // And a dead-but-unobserved session must not suppress a fresh start.
    fx.controller.start().await.expect("restart succeeds");
    let second = fx.sessions.lock().unwrap().last().cloned().expect("new session opened");
    second.server_tx.send(session_created()).unwrap();
    wait_for_sent(&second.sent, 2).await;
}

#[tokio::test(start_paused = true)]
async fn failing_transport_sends_surface_to_the_caller() {
    let connector = MockConnector {
        fail_sends: true,
        ..MockConnector::default()
    };
    let mut controller = SessionController::new(connector, MemoryStore::new());
    controller.start().await.unwrap();

    let err = controller.send_text("hello").await.expect_err("send fails");
    assert!(matches!(err, Error::SessionClosed));
}
