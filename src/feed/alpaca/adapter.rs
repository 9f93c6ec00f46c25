//! Alpaca market-data WebSocket feed
//!
//! Connection sequence: open socket, expect `connected`, send the auth
//! message, expect `authenticated`, then split the socket and hand the read
//! half to a background reader that maps frames into `MarketEvent`s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use super::config::AlpacaConfig;
use super::types::{map_message, Inbound};
use crate::config::Channel;
use crate::core::types::{MarketEvent, Symbol};
use crate::feed::errors::{FeedError, FeedResult};
use crate::feed::shared::{connect_tls, TlsWebSocketStream, WsReader, WsWriter};
use crate::feed::traits::MarketFeed;

/// Timeout for each handshake message from the server
const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Event buffer between the socket reader and the stream processor
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

type FatalSlot = Arc<std::sync::Mutex<Option<FeedError>>>;

// =============================================================================
// AlpacaFeed
// =============================================================================

pub struct AlpacaFeed {
    config: AlpacaConfig,
    channels: Vec<Channel>,
    /// Most symbols sent in one subscribe message
    max_per_message: usize,
    http_client: reqwest::Client,
    ws_sender: Option<Arc<Mutex<WsWriter>>>,
    reader_handle: Option<JoinHandle<()>>,
    connected: bool,
    subscriptions: Vec<Symbol>,
    event_tx: mpsc::Sender<MarketEvent>,
    event_rx: Option<mpsc::Receiver<MarketEvent>>,
    reader_alive: Arc<AtomicBool>,
    disconnect_notify: Arc<Notify>,
    fatal_error: FatalSlot,
}

impl AlpacaFeed {
    pub fn new(config: AlpacaConfig, channels: Vec<Channel>, max_per_message: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            config,
            channels,
            max_per_message: max_per_message.max(1),
            http_client,
            ws_sender: None,
            reader_handle: None,
            connected: false,
            subscriptions: Vec::new(),
            event_tx,
            event_rx: Some(event_rx),
            reader_alive: Arc::new(AtomicBool::new(false)),
            disconnect_notify: Arc::new(Notify::new()),
            fatal_error: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Symbols currently subscribed on this connection
    pub fn subscriptions(&self) -> &[Symbol] {
        &self.subscriptions
    }

    /// Reader task is running
    pub fn is_reader_alive(&self) -> bool {
        self.reader_alive.load(Ordering::Relaxed)
    }

    /// Check credentials against `GET /v2/account`
    pub async fn ping(&self) -> FeedResult<()> {
        let url = format!("{}/v2/account", self.config.rest_base_url());
        let response = self
            .http_client
            .get(&url)
            .header("APCA-API-KEY-ID", &self.config.api_key)
            .header("APCA-API-SECRET-KEY", &self.config.secret_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(feed = "alpaca", "Alpaca REST ping ok");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FeedError::Rejected {
                code: status.as_u16(),
                message: body,
            }),
            _ => Err(FeedError::ConnectionFailed(format!(
                "Alpaca REST ping returned {}: {}",
                status, body
            ))),
        }
    }

    // =========================================================================
    // Connection helpers
    // =========================================================================

    /// Read frames until one carries a control message
    async fn expect_control(stream: &mut TlsWebSocketStream, expected: &str) -> FeedResult<()> {
        loop {
            let next = timeout(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS), stream.next())
                .await
                .map_err(|_| FeedError::NetworkTimeout(HANDSHAKE_TIMEOUT_SECS * 1000))?;

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(FeedError::ConnectionFailed(format!(
                        "Socket closed while waiting for '{}'",
                        expected
                    )))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(FeedError::WebSocket(Box::new(e))),
            };

            for inbound in map_message(&text)? {
                if let Some(fatal) = inbound.fatal_error() {
                    return Err(fatal);
                }
                match inbound {
                    Inbound::Success(msg) if msg == expected => return Ok(()),
                    Inbound::Error { code, message } => {
                        return Err(FeedError::ConnectionFailed(format!(
                            "Alpaca error {}: {}",
                            code, message
                        )))
                    }
                    other => tracing::debug!(?other, "Ignoring message during handshake"),
                }
            }
        }
    }

    async fn handshake(&self, stream: &mut TlsWebSocketStream) -> FeedResult<()> {
        Self::expect_control(stream, "connected").await?;

        let auth = serde_json::json!({
            "action": "auth",
            "key": self.config.api_key,
            "secret": self.config.secret_key,
        });
        stream
            .send(Message::Text(auth.to_string()))
            .await
            .map_err(|e| FeedError::WebSocket(Box::new(e)))?;

        Self::expect_control(stream, "authenticated").await
    }

    /// Split the socket and spawn the background reader
    fn split_and_spawn_reader(&mut self, stream: TlsWebSocketStream) {
        let (ws_sender, ws_receiver) = stream.split();
        self.ws_sender = Some(Arc::new(Mutex::new(ws_sender)));

        let event_tx = self.event_tx.clone();
        let reader_alive = Arc::clone(&self.reader_alive);
        let disconnect_notify = Arc::clone(&self.disconnect_notify);
        let fatal_error = Arc::clone(&self.fatal_error);

        // Set before spawning so a connect() caller never observes a stale false
        reader_alive.store(true, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            Self::message_reader_loop(ws_receiver, event_tx, fatal_error).await;
            reader_alive.store(false, Ordering::Relaxed);
            tracing::warn!(feed = "alpaca", "Alpaca reader loop ended, reader_alive set to false");
            disconnect_notify.notify_one();
        });
        self.reader_handle = Some(handle);
    }

    /// Background reader; returns when the socket ends or a fatal error arrives
    async fn message_reader_loop(
        mut ws_receiver: WsReader,
        event_tx: mpsc::Sender<MarketEvent>,
        fatal_error: FatalSlot,
    ) {
        tracing::info!(feed = "alpaca", "Alpaca message_reader_loop started");

        while let Some(msg_result) = ws_receiver.next().await {
            let text = match msg_result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!(error = %e, "Binary message not UTF-8");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "WebSocket closed by server");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket error");
                    break;
                }
            };

            tracing::trace!(raw = %text, "Raw WS message");
            let items = match map_message(&text) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse WS message");
                    continue;
                }
            };

            for inbound in items {
                if let Some(fatal) = inbound.fatal_error() {
                    tracing::error!(error = %fatal, "Alpaca reported a fatal error");
                    if let Ok(mut slot) = fatal_error.lock() {
                        *slot = Some(fatal);
                    }
                    return;
                }
                match inbound {
                    Inbound::Event(event) => {
                        if event_tx.send(event).await.is_err() {
                            tracing::info!("Event receiver dropped, stopping reader");
                            return;
                        }
                    }
                    Inbound::Subscription(sub) => tracing::debug!(
                        trades = sub.trades.len(),
                        quotes = sub.quotes.len(),
                        bars = sub.bars.len(),
                        "Subscription confirmed"
                    ),
                    Inbound::Error { code, message } => {
                        tracing::warn!(code, message = %message, "Alpaca stream error")
                    }
                    Inbound::Success(msg) => tracing::debug!(msg = %msg, "Alpaca success message"),
                }
            }
        }
    }

    /// Build one `{action, trades?, quotes?, bars?}` message per chunk
    fn build_requests(&self, action: &str, symbols: &[Symbol]) -> Vec<serde_json::Value> {
        symbols
            .chunks(self.max_per_message)
            .map(|chunk| {
                let names: Vec<&str> = chunk.iter().map(|s| s.as_str()).collect();
                let mut msg = serde_json::Map::new();
                msg.insert("action".into(), serde_json::Value::from(action));
                for channel in &self.channels {
                    msg.insert(channel.as_str().into(), serde_json::json!(names));
                }
                serde_json::Value::Object(msg)
            })
            .collect()
    }

    async fn send_requests(&self, action: &str, symbols: &[Symbol]) -> FeedResult<()> {
        if !self.connected || !self.is_reader_alive() {
            return Err(FeedError::subscription_failed(symbols, "not connected"));
        }
        let ws_sender = self
            .ws_sender
            .as_ref()
            .ok_or_else(|| FeedError::subscription_failed(symbols, "WebSocket not connected"))?;

        let mut sender = ws_sender.lock().await;
        for request in self.build_requests(action, symbols) {
            sender
                .send(Message::Text(request.to_string()))
                .await
                .map_err(|e| FeedError::subscription_failed(symbols, e))?;
        }
        Ok(())
    }
}

// =============================================================================
// MarketFeed Implementation
// =============================================================================

#[async_trait]
impl MarketFeed for AlpacaFeed {
    async fn connect(&mut self) -> FeedResult<()> {
        let url = self.config.stream_url();
        tracing::info!(url = %url, "Connecting to Alpaca market-data WebSocket");

        let mut stream = connect_tls(&url).await?;
        self.handshake(&mut stream).await?;
        self.split_and_spawn_reader(stream);

        self.connected = true;
        tracing::info!(feed = "alpaca", "Alpaca WebSocket connected and authenticated");
        Ok(())
    }

    async fn disconnect(&mut self) -> FeedResult<()> {
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        if let Some(ws_sender) = self.ws_sender.take() {
            let mut sender = ws_sender.lock().await;
            let _ = sender.close().await;
        }

        self.connected = false;
        self.subscriptions.clear();
        self.reader_alive.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn reconnect(&mut self) -> FeedResult<()> {
        tracing::info!(feed = "alpaca", "Alpaca: reconnecting");
        self.disconnect().await?;
        self.connect().await
    }

    async fn subscribe(&mut self, symbols: &[Symbol]) -> FeedResult<()> {
        if symbols.is_empty() {
            return Ok(());
        }
        self.send_requests("subscribe", symbols).await?;
        for symbol in symbols {
            if !self.subscriptions.contains(symbol) {
                self.subscriptions.push(symbol.clone());
            }
        }
        tracing::info!(count = symbols.len(), total = self.subscriptions.len(), "Alpaca: subscribed");
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> FeedResult<()> {
        if symbols.is_empty() {
            return Ok(());
        }
        self.send_requests("unsubscribe", symbols).await?;
        self.subscriptions.retain(|s| !symbols.contains(s));
        tracing::info!(count = symbols.len(), total = self.subscriptions.len(), "Alpaca: unsubscribed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.is_reader_alive()
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<MarketEvent>> {
        self.event_rx.take()
    }

    fn disconnect_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.disconnect_notify)
    }

    fn take_fatal_error(&mut self) -> Option<FeedError> {
        self.fatal_error.lock().ok().and_then(|mut slot| slot.take())
    }

    fn name(&self) -> &'static str {
        "alpaca"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataFeed, FeedEnvironment};
    use tokio::net::TcpListener;

    fn config(stream_url: Option<String>, rest_url: Option<String>) -> AlpacaConfig {
        AlpacaConfig {
            api_key: "key".into(),
            secret_key: "secret".into(),
            environment: FeedEnvironment::Paper,
            data_feed: DataFeed::Iex,
            stream_url,
            rest_url,
        }
    }

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|n| Symbol::parse(n).unwrap()).collect()
    }

    /// Local stream server: greets, checks auth, then replays `frames`
    /// after the first client request and closes.
    async fn spawn_server(auth_reply: &'static str, frames: Vec<&'static str>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut received = Vec::new();

            ws.send(Message::Text(r#"[{"T":"success","msg":"connected"}]"#.into()))
                .await
                .unwrap();
            if let Some(Ok(Message::Text(auth))) = ws.next().await {
                received.push(auth);
            }
            ws.send(Message::Text(auth_reply.into())).await.unwrap();

            if let Some(Ok(Message::Text(request))) = ws.next().await {
                received.push(request);
                for frame in frames {
                    ws.send(Message::Text(frame.into())).await.unwrap();
                }
            }
            let _ = ws.close(None).await;
            received
        });
        (url, handle)
    }

    #[test]
    fn test_subscribe_requests_chunked_per_channel() {
        let feed = AlpacaFeed::new(config(None, None), vec![Channel::Trades, Channel::Bars], 2);
        let requests = feed.build_requests("subscribe", &symbols(&["AAPL", "MSFT", "GOOG"]));
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["action"], "subscribe");
        assert_eq!(requests[0]["trades"], serde_json::json!(["AAPL", "MSFT"]));
        assert_eq!(requests[0]["bars"], serde_json::json!(["AAPL", "MSFT"]));
        assert!(requests[0].get("quotes").is_none());
        assert_eq!(requests[1]["bars"], serde_json::json!(["GOOG"]));
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let mut feed = AlpacaFeed::new(config(None, None), vec![Channel::Bars], 10);
        let err = feed.subscribe(&symbols(&["AAPL"])).await.unwrap_err();
        assert!(matches!(err, FeedError::SubscriptionFailed { .. }));
    }

    #[tokio::test]
    async fn test_connect_subscribe_and_stream_events() {
        let (url, server) = spawn_server(
            r#"[{"T":"success","msg":"authenticated"}]"#,
            vec![
                r#"[{"T":"subscription","trades":[],"quotes":[],"bars":["AAPL"]}]"#,
                r#"[{"T":"b","S":"AAPL","o":1,"h":2,"l":0.5,"c":1.5,"v":100,"t":"2024-01-02T15:00:00Z"}]"#,
            ],
        )
        .await;

        let mut feed = AlpacaFeed::new(config(Some(url), None), vec![Channel::Bars], 200);
        let mut events = feed.take_event_receiver().unwrap();
        assert!(feed.take_event_receiver().is_none());
        let signal = feed.disconnect_signal();

        feed.connect().await.unwrap();
        assert!(feed.is_connected());
        feed.subscribe(&symbols(&["aapl"])).await.unwrap();
        assert_eq!(feed.subscriptions(), symbols(&["AAPL"]).as_slice());

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.symbol.as_str(), "AAPL");
        assert_eq!(event.bar.unwrap().close, 1.5);

        // Server closes after replaying: the reader ends and signals
        tokio::time::timeout(Duration::from_secs(5), signal.notified())
            .await
            .unwrap();
        assert!(!feed.is_connected());

        let received = server.await.unwrap();
        assert!(received[0].contains(r#""action":"auth""#));
        assert!(received[1].contains(r#""bars":["AAPL"]"#));
    }

    #[tokio::test]
    async fn test_auth_failure_is_rejected() {
        let (url, _server) = spawn_server(r#"[{"T":"error","code":402,"msg":"auth failed"}]"#, vec![]).await;

        let mut feed = AlpacaFeed::new(config(Some(url), None), vec![Channel::Bars], 200);
        let err = feed.connect().await.unwrap_err();
        assert!(matches!(err, FeedError::Rejected { code: 402, .. }), "got {err}");
        assert!(!feed.is_connected());
    }

    #[tokio::test]
    async fn test_fatal_stream_error_is_kept_for_the_caller() {
        let (url, _server) = spawn_server(
            r#"[{"T":"success","msg":"authenticated"}]"#,
            vec![r#"[{"T":"error","code":405,"msg":"symbol limit exceeded"}]"#],
        )
        .await;

        let mut feed = AlpacaFeed::new(config(Some(url), None), vec![Channel::Trades], 200);
        let signal = feed.disconnect_signal();
        feed.connect().await.unwrap();
        feed.subscribe(&symbols(&["AAPL"])).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), signal.notified())
            .await
            .unwrap();
        assert!(matches!(feed.take_fatal_error(), Some(FeedError::Rejected { code: 405, .. })));
        assert!(feed.take_fatal_error().is_none());
    }

    #[tokio::test]
    async fn test_ping_sends_key_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/account")
            .match_header("APCA-API-KEY-ID", "key")
            .match_header("APCA-API-SECRET-KEY", "secret")
            .with_status(200)
            .with_body(r#"{"status":"ACTIVE"}"#)
            .create_async()
            .await;

        let feed = AlpacaFeed::new(config(None, Some(server.url())), vec![Channel::Bars], 200);
        feed.ping().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping_unauthorized_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/account")
            .with_status(401)
            .with_body(r#"{"message":"unauthorized."}"#)
            .create_async()
            .await;

        let feed = AlpacaFeed::new(config(None, Some(server.url())), vec![Channel::Bars], 200);
        assert!(matches!(feed.ping().await, Err(FeedError::Rejected { code: 401, .. })));
    }
}
