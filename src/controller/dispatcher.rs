use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::lifecycle::Command;
use super::palette::{self, ColorPalette, PALETTE_TOOL_NAME};
use super::settings::Settings;
use super::ui::UiEvent;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{Item, Response, SessionUpdate, VoiceId};
use crate::protocol::server_events::ServerEvent;
use crate::transport::Transport;

/// Per-session reaction state. Consumes inbound events exactly once, in
/// arrival order, as the run loop hands them over; there is no buffer to
/// re-scan, so each reaction fires at most once per triggering event.
///
/// A fresh `Dispatcher` is built for every session start, which is what
/// resets the registration/voice flags and the stored palette.
pub(crate) struct Dispatcher {
    epoch: u64,
    epoch_handle: Arc<AtomicU64>,
    cmd_tx: mpsc::WeakSender<Command>,
    ui_tx: mpsc::Sender<UiEvent>,
    voice: VoiceId,
    instructions: String,
    tools_registered: bool,
    voice_applied: bool,
    instructions_applied: bool,
    palette: Option<ColorPalette>,
}

impl Dispatcher {
    pub(crate) fn new(
        epoch: u64,
        epoch_handle: Arc<AtomicU64>,
        cmd_tx: mpsc::WeakSender<Command>,
        ui_tx: mpsc::Sender<UiEvent>,
        settings: &Settings,
    ) -> Self {
        Self {
            epoch,
            epoch_handle,
            cmd_tx,
            ui_tx,
            voice: settings.voice,
            instructions: settings.instructions.clone(),
            tools_registered: false,
            voice_applied: false,
            instructions_applied: false,
            palette: None,
        }
    }

    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    #[cfg(test)]
    pub(crate) const fn palette(&self) -> Option<&ColorPalette> {
        self.palette.as_ref()
    }

    pub(crate) async fn handle(&mut self, event: ServerEvent, transport: &mut dyn Transport) {
        match event {
            ServerEvent::SessionCreated { .. } => self.on_session_created(transport).await,
            ServerEvent::ResponseDone { response, .. } => self.on_response_done(response),
            ServerEvent::Error { error, .. } => {
                tracing::warn!("Server reported error: {}", error.message);
                self.emit_ui(UiEvent::ServerError(error));
            }
            ServerEvent::SessionUpdated { .. } => {
                tracing::debug!("Session configuration acknowledged");
            }
            ServerEvent::Unknown(value) => {
                tracing::trace!(
                    "Ignoring event type: {}",
                    value.get("type").and_then(|t| t.as_str()).unwrap_or("?")
                );
            }
        }
    }

    /// Configure the freshly created session: tool registration, custom
    /// instructions, output voice. Each update is guarded by its own flag so
    /// a duplicate `session.created` (or a retried dispatch) is a no-op.
    async fn on_session_created(&mut self, transport: &mut dyn Transport) {
        if !self.tools_registered {
            self.send_update(transport, palette::registration_update()).await;
            self.tools_registered = true;
        }

        if !self.instructions_applied && !self.instructions.trim().is_empty() {
            let update = SessionUpdate::instructions(self.instructions.clone());
            self.send_update(transport, update).await;
            self.instructions_applied = true;
        }

        if !self.voice_applied {
            self.send_update(transport, SessionUpdate::voice(self.voice)).await;
            self.voice_applied = true;
        }
    }

    async fn send_update(&self, transport: &mut dyn Transport, update: SessionUpdate) {
        if let Err(err) = transport.send(ClientEvent::session_update(update)).await {
            tracing::warn!("Failed to send session.update: {err}");
        }
    }

    fn on_response_done(&mut self, response: Response) {
        let Some(output) = response.output else {
            return;
        };

        for item in output {
            let Item::FunctionCall { name, arguments, .. } = item else {
                continue;
            };
            if name != PALETTE_TOOL_NAME {
                continue;
            }

            match palette::parse_arguments(&arguments) {
                Ok(parsed) => {
                    self.palette = Some(parsed.clone());
                    self.emit_ui(UiEvent::PaletteReady(parsed));
                    self.schedule_follow_up();
                }
                Err(err) => {
                    tracing::warn!("Malformed palette invocation: {err}");
                    self.emit_ui(UiEvent::PaletteError {
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// UI delivery must never block the run loop: an undrained UI feed would
    /// otherwise park event dispatch on the full channel while the only
    /// consumer sits on the far side of the command channel. Overflow drops
    /// the event instead.
    fn emit_ui(&self, event: UiEvent) {
        if let Err(err) = self.ui_tx.try_send(event) {
            tracing::debug!("Dropping UI event: {err}");
        }
    }

    /// Schedule the scripted "ask for feedback" response. The sleeping task
    /// holds only a weak command sender and re-checks the session epoch when
    /// it wakes, so a session stopped (or restarted) during the delay simply
    /// drops the follow-up.
    fn schedule_follow_up(&self) {
        let cmd_tx = self.cmd_tx.clone();
        let epoch = self.epoch;
        let epoch_handle = Arc::clone(&self.epoch_handle);

        tokio::spawn(async move {
            tokio::time::sleep(palette::FOLLOW_UP_DELAY).await;
            if epoch_handle.load(Ordering::SeqCst) != epoch {
                tracing::debug!("Dropping palette follow-up for ended session");
                return;
            }
            if let Some(cmd_tx) = cmd_tx.upgrade() {
                let _ = cmd_tx.send(Command::FollowUp { epoch }).await;
            }
        });
    }
}
