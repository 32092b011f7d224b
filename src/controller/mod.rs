//! The session controller: lifecycle state machine, event dispatch, user
//! input multiplexing, the palette tool, preferences, and the UI event feed.

mod dispatcher;
mod input;
mod lifecycle;
pub mod palette;
mod settings;
mod ui;

pub use input::InputMux;
pub use lifecycle::{SessionController, SessionState};
pub use palette::{ColorPalette, PaletteArgs};
pub use settings::{
    INSTRUCTIONS_KEY, JsonFileStore, MemoryStore, Settings, SettingsStore, VOICE_KEY,
};
pub use ui::{UiEvent, UiEventStream};
