use std::sync::{Arc, Weak};

use crate::transport::MicTrack;

/// Serializes the user-facing input surface: the pending text buffer, the
/// microphone mute toggle, and the pause toggle.
///
/// The explicit-send and Enter-key paths both drain the buffer through
/// [`take_pending`](Self::take_pending), so one user action can never produce
/// two sends.
#[derive(Debug, Default)]
pub struct InputMux {
    pending_text: String,
    mic: Weak<MicTrack>,
    mic_muted: bool,
    paused: bool,
}

impl InputMux {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt the microphone track of a freshly connected transport.
    pub fn attach_mic(&mut self, track: &Arc<MicTrack>) {
        self.mic = Arc::downgrade(track);
        self.mic_muted = !track.is_enabled();
    }

    /// Drop per-session input state when the session ends.
    pub fn reset(&mut self) {
        self.pending_text.clear();
        self.mic = Weak::new();
        self.mic_muted = false;
        self.paused = false;
    }

    pub fn set_pending_text(&mut self, text: impl Into<String>) {
        self.pending_text = text.into();
    }

    #[must_use]
    pub fn pending_text(&self) -> &str {
        &self.pending_text
    }

    /// Drain the buffer; `None` (and no clearing side effect beyond emptying
    /// an all-whitespace buffer) when there is nothing to send.
    pub fn take_pending(&mut self) -> Option<String> {
        if self.pending_text.trim().is_empty() {
            self.pending_text.clear();
            return None;
        }
        Some(std::mem::take(&mut self.pending_text))
    }

    /// Flip the enabled flag of the transport-owned mic track and mirror it
    /// into the muted flag. A no-op when no track is currently owned.
    pub fn toggle_mic(&mut self) -> bool {
        if let Some(track) = self.mic.upgrade() {
            let enabled = track.toggle();
            self.mic_muted = !enabled;
        }
        self.mic_muted
    }

    /// Flip the local paused flag. Deliberately does not touch the session's
    /// turn-detection configuration.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    #[must_use]
    pub const fn is_mic_muted(&self) -> bool {
        self.mic_muted
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }
}
