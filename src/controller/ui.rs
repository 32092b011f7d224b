use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::palette::ColorPalette;
use crate::error::ServerError;

/// State changes the embedding UI renders. Emitted in the order the
/// triggering events were processed.
#[derive(Debug, Clone)]
pub enum UiEvent {
    SessionStarted,
    SessionStopped,
    /// A valid `display_color_palette` invocation; replaces any palette shown
    /// for an earlier invocation.
    PaletteReady(ColorPalette),
    /// A malformed invocation; the palette panel should show an error state.
    PaletteError { message: String },
    ServerError(ServerError),
}

pub struct UiEventStream<'a> {
    rx: &'a mut mpsc::Receiver<UiEvent>,
}

impl<'a> UiEventStream<'a> {
    #[must_use]
    pub const fn new(rx: &'a mut mpsc::Receiver<UiEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for UiEventStream<'_> {
    type Item = UiEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}
