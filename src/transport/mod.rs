//! The transport seam: a trait pair the session controller talks through,
//! plus the real implementation (ephemeral credential exchange followed by a
//! realtime WebSocket).

pub mod rest;
pub mod ws;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::from_str;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::Result;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::server_events::ServerEvent;

const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// Handle to the hardware microphone track negotiated for the session.
///
/// The track is owned by the transport and may be swapped underneath the
/// controller; holders only ever flip the enabled flag through a `Weak`
/// reference and must tolerate the track being gone.
#[derive(Debug)]
pub struct MicTrack {
    enabled: AtomicBool,
}

impl MicTrack {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the enabled flag and return the new value.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }
}

impl Default for MicTrack {
    fn default() -> Self {
        Self::new()
    }
}

/// A live bidirectional event channel to the realtime model.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, event: ClientEvent) -> Result<()>;

    /// Next inbound event, `None` once the channel is closed.
    async fn next_event(&mut self) -> Result<Option<ServerEvent>>;

    /// The microphone track owned by this transport, if one was negotiated.
    fn mic_track(&self) -> Option<Arc<MicTrack>> {
        None
    }
}

/// Produces a fresh [`Transport`] for each session start.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

/// The production transport: a realtime WebSocket opened with an ephemeral
/// client secret.
pub struct RealtimeTransport {
    stream: ws::WsStream,
    mic: Arc<MicTrack>,
}

#[async_trait]
impl Transport for RealtimeTransport {
    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        let json = serde_json::to_string(&event)?;
        tracing::trace!("Sending event: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        self.stream.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => {
                    tracing::trace!(
                        "Received event: {}",
                        safe_truncate(&text, TRACE_LOG_MAX_BYTES)
                    );
                    return Ok(Some(from_str::<ServerEvent>(&text)?));
                }
                Message::Close(_) => {
                    tracing::info!("WebSocket connection closed by server");
                    return Ok(None);
                }
                Message::Ping(payload) => {
                    tracing::debug!("Received Ping, sending Pong");
                    self.stream.send(Message::Pong(payload)).await?;
                }
                _ => (),
            }
        }
        Ok(None)
    }

    fn mic_track(&self) -> Option<Arc<MicTrack>> {
        Some(Arc::clone(&self.mic))
    }
}

/// Connector that performs the full negotiation: mint an ephemeral client
/// secret over REST, then open the realtime WebSocket with it.
pub struct RealtimeConnector {
    rest: rest::RealtimeRestAdapter,
    model: String,
}

impl RealtimeConnector {
    /// # Errors
    /// Returns an error if the API key is not a valid header value.
    #[allow(clippy::result_large_err)]
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_model(api_key, crate::protocol::models::DEFAULT_MODEL)
    }

    /// # Errors
    /// Returns an error if the API key is not a valid header value.
    #[allow(clippy::result_large_err)]
    pub fn with_model(api_key: &str, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rest: rest::RealtimeRestAdapter::new(api_key)?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Connector for RealtimeConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let secret = self.rest.create_client_secret(&self.model).await?;
        let stream = ws::connect(&secret.value, Some(&self.model)).await?;
        Ok(Box::new(RealtimeTransport {
            stream,
            mic: Arc::new(MicTrack::new()),
        }))
    }
}

fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
