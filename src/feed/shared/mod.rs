//! Helpers shared by feed implementations

pub mod websocket;

pub use websocket::{connect_tls, TlsWebSocketStream, WsReader, WsWriter};
