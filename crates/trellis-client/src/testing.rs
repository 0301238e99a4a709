//! In-process WebSocket server for connection tests.

use crate::config::{ClientConfig, DEFAULT_PROTOCOL};
use crate::protocol::ClientMessage;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

/// Accepts connections and hands each one to the test.
pub(crate) struct TestServer {
    pub url: String,
    accepted: mpsc::UnboundedReceiver<TestConnection>,
}

pub(crate) struct TestConnection {
    ws: WebSocketStream<TcpStream>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let callback = |_req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                    resp.headers_mut().insert(
                        "Sec-WebSocket-Protocol",
                        HeaderValue::from_static(DEFAULT_PROTOCOL),
                    );
                    Ok(resp)
                };
                if let Ok(ws) = accept_hdr_async(stream, callback).await {
                    if tx.send(TestConnection { ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            url: format!("ws://{}", addr),
            accepted,
        }
    }

    /// Client config pointed at this server with a short reconnect delay.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            reconnect_delay_ms: 50,
            ..ClientConfig::with_url(self.url.clone())
        }
    }

    /// Waits for the next connection.
    pub async fn accept(&mut self) -> TestConnection {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }

    /// Returns a connection if one arrives within `within`.
    pub async fn try_accept(&mut self, within: Duration) -> Option<TestConnection> {
        tokio::time::timeout(within, self.accepted.recv())
            .await
            .ok()
            .flatten()
    }
}

impl TestConnection {
    /// Reads the next client message.
    pub async fn recv(&mut self) -> ClientMessage {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a client message")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Returns a client message if one arrives within `within`.
    pub async fn try_recv(&mut self, within: Duration) -> Option<ClientMessage> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            match frame {
                Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Waits until the client closes the connection.
    pub async fn closed(&mut self) {
        loop {
            match tokio::time::timeout(WAIT, self.ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("client never closed the connection"),
            }
        }
    }

    /// Sends a raw text frame.
    pub async fn send_text(&mut self, text: impl Into<String>) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    /// Pushes a snapshot for a key.
    pub async fn push_graph(&mut self, public_key: &str, dot: &str) {
        let frame = serde_json::json!({
            "type": "graph",
            "body": { "public_key": public_key, "graph": dot }
        });
        self.send_text(frame.to_string()).await;
    }
}
