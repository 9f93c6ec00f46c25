//! TLS WebSocket connection helper

use futures_util::stream::{SplitSink, SplitStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::feed::errors::FeedError;

/// WebSocket stream with optional TLS
pub type TlsWebSocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsWriter = SplitSink<TlsWebSocketStream, Message>;
pub type WsReader = SplitStream<TlsWebSocketStream>;

/// Connect to a WebSocket endpoint with TLS (TLSv1.2 minimum)
///
/// Plain `ws://` URLs connect without TLS, which local tests rely on.
pub async fn connect_tls(url: &str) -> Result<TlsWebSocketStream, FeedError> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| FeedError::ConnectionFailed(format!("TLS error: {}", e)))?;

    let (ws_stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls)))
            .await
            .map_err(|e| FeedError::WebSocket(Box::new(e)))?;

    Ok(ws_stream)
}
