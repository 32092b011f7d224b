use reqwest::header::HeaderValue;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::error::Result;
use crate::protocol::models::DEFAULT_MODEL;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WS_BASE_URL: &str = "wss://api.openai.com/v1/realtime";

/// Open the realtime WebSocket, authorizing with either a long-lived API key
/// or an ephemeral client secret minted by [`crate::transport::rest`].
///
/// # Errors
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(bearer: &str, model: Option<&str>) -> Result<WsStream> {
    let mut url = Url::parse(WS_BASE_URL)?;
    url.query_pairs_mut()
        .append_pair("model", model.unwrap_or(DEFAULT_MODEL));

    let auth_header = HeaderValue::from_str(&format!("Bearer {bearer}"))?;

    let mut req = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        url.as_str(),
    )?;
    req.headers_mut()
        .insert(reqwest::header::AUTHORIZATION, auth_header);
    let (ws_stream, _) = connect_async(req).await?;

    tracing::info!("Connected to OpenAI Realtime");

    Ok(ws_stream)
}
