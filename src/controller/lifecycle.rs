use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

use super::dispatcher::Dispatcher;
use super::input::InputMux;
use super::palette::{self, ColorPalette};
use super::settings::{INSTRUCTIONS_KEY, Settings, SettingsStore, VOICE_KEY};
use super::ui::{UiEvent, UiEventStream};
use crate::error::{Error, Result};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{SessionUpdate, VoiceId};
use crate::transport::{Connector, Transport};

const CMD_CHANNEL_CAPACITY: usize = 64;
const UI_CHANNEL_CAPACITY: usize = 128;

/// Lifecycle of the (at most one) live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    /// A connect is in flight; further start requests are suppressed.
    Starting,
    Active,
}

/// Requests the controller hands to the session run loop.
pub(crate) enum Command {
    Send {
        event: ClientEvent,
        respond: oneshot::Sender<Result<()>>,
    },
    /// Delayed palette follow-up; only honored while `epoch` is current.
    FollowUp { epoch: u64 },
}

/// Owns session lifecycle, user input, preferences, and the UI event feed.
///
/// All connection work happens on a spawned per-session task; the controller
/// itself is a plain state machine the embedding UI drives from its own loop.
pub struct SessionController {
    connector: Box<dyn Connector>,
    store: Box<dyn SettingsStore>,
    settings: Settings,
    input: InputMux,
    state: SessionState,
    /// Bumped on every start and stop; delayed work captured under an older
    /// epoch discards itself.
    epoch: Arc<AtomicU64>,
    cmd_tx: Option<mpsc::Sender<Command>>,
    ui_tx: mpsc::Sender<UiEvent>,
    ui_rx: mpsc::Receiver<UiEvent>,
    palette: Option<ColorPalette>,
}

impl SessionController {
    /// Build a controller, loading persisted preferences from `store`.
    pub fn new(connector: impl Connector + 'static, store: impl SettingsStore + 'static) -> Self {
        let settings = Settings::load(&store);
        let (ui_tx, ui_rx) = mpsc::channel(UI_CHANNEL_CAPACITY);
        Self {
            connector: Box::new(connector),
            store: Box::new(store),
            settings,
            input: InputMux::new(),
            state: SessionState::Stopped,
            epoch: Arc::new(AtomicU64::new(0)),
            cmd_tx: None,
            ui_tx,
            ui_rx,
            palette: None,
        }
    }

    /// Start a session. Already starting or active is a successful no-op, so
    /// a double-clicked connect button cannot open two sessions.
    ///
    /// # Errors
    /// Returns the connector's error if the connection cannot be established;
    /// the controller is back in [`SessionState::Stopped`] and a later start
    /// may succeed.
    pub async fn start(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Starting | SessionState::Active => {
                tracing::debug!("Start requested while {:?}, ignoring", self.state);
                return Ok(());
            }
            SessionState::Stopped => {}
        }
        if self.cmd_tx.is_some() {
            // The run loop died without the controller noticing (transport
            // failure); fold the leftover session state before starting anew.
            self.stop();
        }
        self.state = SessionState::Starting;
        self.palette = None;

        let transport = match self.connector.connect().await {
            Ok(transport) => transport,
            Err(err) => {
                tracing::warn!("Session connect failed: {err}");
                self.state = SessionState::Stopped;
                return Err(err);
            }
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(track) = transport.mic_track() {
            self.input.attach_mic(&track);
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let dispatcher = Dispatcher::new(
            epoch,
            Arc::clone(&self.epoch),
            cmd_tx.downgrade(),
            self.ui_tx.clone(),
            &self.settings,
        );
        spawn_session(transport, dispatcher, cmd_rx, self.ui_tx.clone());

        self.cmd_tx = Some(cmd_tx);
        self.state = SessionState::Active;
        tracing::info!("Session started");
        emit_ui(&self.ui_tx, UiEvent::SessionStarted);
        Ok(())
    }

    /// Stop the session and drop all per-session state. Safe to call in any
    /// state; stopping a stopped controller does nothing.
    pub fn stop(&mut self) {
        // Invalidate pending delayed follow-ups before tearing down.
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if self.cmd_tx.take().is_some() {
            tracing::info!("Session stopped");
        }
        self.input.reset();
        self.palette = None;
        self.state = SessionState::Stopped;
    }

    /// Send a user text message into the live conversation. Whitespace-only
    /// text is dropped without touching the transport.
    ///
    /// # Errors
    /// Returns [`Error::SessionClosed`] when no session is live, or the
    /// transport's error if the send fails.
    pub async fn send_text(&mut self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Ok(());
        }
        self.send_event(ClientEvent::user_message(message)).await
    }

    /// Drain the pending text buffer and send it as a user message. The
    /// explicit send action and the Enter key both land here, and the buffer
    /// is drained before the send, so one action produces at most one message.
    ///
    /// # Errors
    /// Same as [`send_text`](Self::send_text); the drained text is not
    /// restored on failure.
    pub async fn send_pending(&mut self) -> Result<()> {
        match self.input.take_pending() {
            Some(message) => self.send_text(&message).await,
            None => Ok(()),
        }
    }

    pub fn set_pending_text(&mut self, text: impl Into<String>) {
        self.input.set_pending_text(text);
    }

    #[must_use]
    pub fn pending_text(&self) -> &str {
        self.input.pending_text()
    }

    /// Toggle the session microphone; returns the new muted flag.
    pub fn toggle_mic(&mut self) -> bool {
        self.input.toggle_mic()
    }

    /// Toggle the local pause flag; returns the new paused flag.
    pub fn toggle_pause(&mut self) -> bool {
        self.input.toggle_pause()
    }

    #[must_use]
    pub const fn is_mic_muted(&self) -> bool {
        self.input.is_mic_muted()
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.input.is_paused()
    }

    /// Current lifecycle state. A run loop that exited behind the
    /// controller's back (transport failure) reads as `Stopped` here even
    /// before the embedder observes the `SessionStopped` event, detected via
    /// the closed command channel.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Active
            && self.cmd_tx.as_ref().is_none_or(|tx| tx.is_closed())
        {
            return SessionState::Stopped;
        }
        self.state
    }

    /// Whether a session is live right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    #[must_use]
    pub const fn voice(&self) -> VoiceId {
        self.settings.voice
    }

    /// Change the output voice: persist it, and apply it to the live session
    /// immediately if one exists.
    ///
    /// # Errors
    /// Returns a store error if persistence fails, or a transport error if
    /// the live update cannot be sent; the new voice is kept either way and
    /// will apply to the next session.
    pub async fn set_voice(&mut self, voice: VoiceId) -> Result<()> {
        self.settings.voice = voice;
        self.store.set(VOICE_KEY, voice.as_str())?;
        if self.is_active() {
            tracing::debug!("Applying voice change to live session: {voice}");
            self.send_event(ClientEvent::session_update(SessionUpdate::voice(voice)))
                .await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.settings.instructions
    }

    /// Persist new custom instructions. They reach the model on the next
    /// session start, or immediately via
    /// [`apply_instructions`](Self::apply_instructions).
    ///
    /// # Errors
    /// Returns a store error if persistence fails.
    #[allow(clippy::result_large_err)]
    pub fn set_instructions(&mut self, instructions: &str) -> Result<()> {
        self.settings.instructions = instructions.to_string();
        self.store.set(INSTRUCTIONS_KEY, instructions)
    }

    /// Push the stored instructions to the live session. A no-op when the
    /// stored text is blank or no session is live.
    ///
    /// # Errors
    /// Returns the transport's error if the send fails.
    pub async fn apply_instructions(&mut self) -> Result<()> {
        let instructions = self.settings.instructions.trim();
        if instructions.is_empty() || !self.is_active() {
            return Ok(());
        }
        let update = SessionUpdate::instructions(instructions);
        self.send_event(ClientEvent::session_update(update)).await
    }

    /// Clear stored instructions, here and in the store.
    ///
    /// # Errors
    /// Returns a store error if the removal fails.
    #[allow(clippy::result_large_err)]
    pub fn clear_instructions(&mut self) -> Result<()> {
        self.settings.instructions.clear();
        self.store.remove(INSTRUCTIONS_KEY)
    }

    /// The palette from the most recent valid tool invocation, if any.
    #[must_use]
    pub const fn palette(&self) -> Option<&ColorPalette> {
        self.palette.as_ref()
    }

    /// Receive the next UI event, tracking the shown palette along the way.
    /// `None` only when the controller itself has been torn down.
    pub async fn next_ui_event(&mut self) -> Option<UiEvent> {
        let event = self.ui_rx.recv().await;
        match &event {
            Some(UiEvent::PaletteReady(p)) => self.palette = Some(p.clone()),
            Some(UiEvent::SessionStopped) => {
                // The run loop ended on its own (server close or transport
                // failure); reflect that in the controller state.
                if self.cmd_tx.as_ref().is_some_and(|tx| tx.is_closed()) {
                    self.stop();
                }
            }
            _ => (),
        }
        event
    }

    /// The UI feed as a [`futures::Stream`]. Events consumed through the
    /// stream bypass the palette tracking of
    /// [`next_ui_event`](Self::next_ui_event).
    pub fn ui_events(&mut self) -> UiEventStream<'_> {
        UiEventStream::new(&mut self.ui_rx)
    }

    async fn send_event(&mut self, event: ClientEvent) -> Result<()> {
        let Some(cmd_tx) = self.cmd_tx.as_ref() else {
            return Err(Error::SessionClosed);
        };

        let (respond, response) = oneshot::channel();
        if cmd_tx.send(Command::Send { event, respond }).await.is_err() {
            // Run loop is gone; fold the controller back to stopped.
            self.stop();
            return Err(Error::SessionClosed);
        }
        match response.await {
            Ok(result) => result,
            Err(_) => {
                self.stop();
                Err(Error::SessionClosed)
            }
        }
    }
}

/// The per-session run loop: multiplexes controller commands and inbound
/// server events over the transport until either side closes.
fn spawn_session(
    mut transport: Box<dyn Transport>,
    mut dispatcher: Dispatcher,
    mut cmd_rx: mpsc::Receiver<Command>,
    ui_tx: mpsc::Sender<UiEvent>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send { event, respond }) => {
                        let result = transport.send(event).await;
                        let _ = respond.send(result);
                    }
                    Some(Command::FollowUp { epoch }) => {
                        if epoch == dispatcher.epoch() {
                            let event = ClientEvent::response_with_instructions(
                                palette::FEEDBACK_INSTRUCTIONS,
                            );
                            if let Err(err) = transport.send(event).await {
                                tracing::warn!("Failed to send palette follow-up: {err}");
                            }
                        }
                    }
                    None => {
                        tracing::debug!("Controller released the session");
                        break;
                    }
                },
                event = transport.next_event() => match event {
                    Ok(Some(event)) => dispatcher.handle(event, transport.as_mut()).await,
                    Ok(None) => {
                        tracing::info!("Transport closed, ending session");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!("Transport failed, ending session: {err}");
                        break;
                    }
                },
            }
        }
        emit_ui(&ui_tx, UiEvent::SessionStopped);
    });
}

/// UI delivery never blocks the run loop or the controller; a feed nobody
/// drains overflows by dropping events, matching the non-fatal treatment of
/// every other channel send in the session path.
fn emit_ui(ui_tx: &mpsc::Sender<UiEvent>, event: UiEvent) {
    if let Err(err) = ui_tx.try_send(event) {
        tracing::debug!("Dropping UI event: {err}");
    }
}
