//! Websocket relay client.
//!
//! Joins the room by connecting to the relay with the username and room
//! name as query parameters, then runs two tasks: one draining outbound
//! envelopes to the socket, one feeding inbound text frames through the
//! room client. Either task ending marks the relay as disconnected and
//! clears all room state.

use crate::config::RoomConfig;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::room::RoomClient;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct RelayClient {
    room: Arc<RoomClient>,
    connected: Arc<AtomicBool>,
    sender_task: Option<JoinHandle<()>>,
    receiver_task: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect to the relay and start the envelope pump. `outbound` is
    /// the receiver half handed out by [`RoomClient::new`].
    pub async fn connect(
        room: Arc<RoomClient>,
        outbound: mpsc::UnboundedReceiver<Envelope>,
    ) -> Result<Self> {
        let url = Self::join_url(room.config())?;
        info!("Connecting to relay at {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Relay(format!("Failed to connect to relay: {}", e)))?;
        info!("Connected to relay");

        let (ws_sender, ws_receiver) = ws_stream.split();
        let connected = Arc::new(AtomicBool::new(true));
        room.on_relay_connected();

        let sender_task = tokio::spawn(Self::sender_task(ws_sender, outbound));
        let receiver_task = tokio::spawn(Self::receiver_task(
            ws_receiver,
            Arc::clone(&room),
            Arc::clone(&connected),
        ));

        Ok(Self {
            room,
            connected,
            sender_task: Some(sender_task),
            receiver_task: Some(receiver_task),
        })
    }

    /// Stop the pump tasks and clear room state. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(task) = self.sender_task.take() {
            task.abort();
        }
        if let Some(task) = self.receiver_task.take() {
            task.abort();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            self.room.on_relay_disconnected().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn room(&self) -> &Arc<RoomClient> {
        &self.room
    }

    /// Relay endpoint with the join parameters attached
    fn join_url(config: &RoomConfig) -> Result<Url> {
        let mut url = Url::parse(&config.relay_url)
            .map_err(|e| Error::Relay(format!("Invalid relay URL {}: {}", config.relay_url, e)))?;
        url.query_pairs_mut()
            .append_pair("username", &config.username)
            .append_pair("room", &config.room);
        Ok(url)
    }

    async fn sender_task(mut ws_sender: WsSink, mut outbound: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = outbound.recv().await {
            let json = match envelope.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize {} envelope: {}", envelope.kind(), e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(json)).await {
                error!("Failed to send to relay: {}", e);
                break;
            }
        }
        debug!("Relay sender task finished");
    }

    async fn receiver_task(
        mut ws_receiver: WsSource,
        room: Arc<RoomClient>,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => match Envelope::from_json(&text) {
                    Ok(envelope) => {
                        if let Err(e) = room.handle_envelope(envelope).await {
                            warn!("Error handling envelope: {}", e);
                        }
                    }
                    Err(e) => warn!("Malformed envelope from relay: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("Relay closed the connection");
                    break;
                }
                Ok(_) => {
                    // ping/pong and binary frames carry nothing for us
                }
                Err(e) => {
                    error!("Relay connection error: {}", e);
                    break;
                }
            }
        }

        if connected.swap(false, Ordering::SeqCst) {
            room.on_relay_disconnected().await;
        }
        debug!("Relay receiver task finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_carries_username_and_room() {
        let config = RoomConfig::new("ws://relay.example:8080/ws", "alice").with_room("lobby");
        let url = RelayClient::join_url(&config).unwrap();

        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/ws");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(pairs.contains(&("username".to_string(), "alice".to_string())));
        assert!(pairs.contains(&("room".to_string(), "lobby".to_string())));
    }

    #[test]
    fn test_join_url_escapes_names() {
        let config = RoomConfig::new("wss://relay.example/ws", "a b").with_room("general chat");
        let url = RelayClient::join_url(&config).unwrap();
        assert!(url.as_str().contains("username=a+b"));
        assert!(url.as_str().contains("room=general+chat"));
    }

    #[test]
    fn test_join_url_rejects_garbage() {
        let config = RoomConfig::new("not a url", "alice");
        assert!(RelayClient::join_url(&config).is_err());
    }
}
