#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Session controller for a realtime voice assistant front end.
//!
//! The crate connects to the `OpenAI` Realtime API (ephemeral client secret
//! over REST, then a WebSocket event channel), runs at most one session at a
//! time, and drives the session from inbound server events: it registers the
//! `display_color_palette` tool and applies the configured voice when the
//! session is created, surfaces palette invocations to the embedding UI, and
//! schedules the scripted feedback follow-up. User text input, microphone
//! mute, and the pause toggle are multiplexed through the same controller.
//!
//! ```no_run
//! use voicebridge::{RealtimeConnector, SessionController, MemoryStore};
//!
//! # async fn run() -> voicebridge::Result<()> {
//! let connector = RealtimeConnector::new("sk-...")?;
//! let mut controller = SessionController::new(connector, MemoryStore::new());
//! controller.start().await?;
//! controller.send_text("show me an ocean palette").await?;
//! while let Some(event) = controller.next_ui_event().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod protocol;
pub mod transport;

pub use controller::{
    ColorPalette, InputMux, JsonFileStore, MemoryStore, SessionController, SessionState, Settings,
    SettingsStore, UiEvent, UiEventStream,
};
pub use error::{Error, Result, ServerError};
pub use protocol::client_events::ClientEvent;
pub use protocol::models::{
    AudioConfig, ContentPart, Item, ItemStatus, OutputAudioConfig, Response, ResponseConfig,
    ResponseStatus, Role, SessionKind, SessionUpdate, Tool, ToolChoiceMode, VoiceId,
};
pub use protocol::server_events::ServerEvent;
pub use transport::{Connector, MicTrack, RealtimeConnector, RealtimeTransport, Transport};
