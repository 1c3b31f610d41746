use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::socketio::{self, EnginePacket, SocketPacket};
use crate::types::{PlaybackStatePayload, SpectrumFrame, TrackMetadata};

/// Events received from the receiver's push channel
#[derive(Debug, Clone)]
pub enum PushEvent {
    Connected,
    Disconnected,
    MetadataUpdate(TrackMetadata),
    PlaybackState(bool),
    VisualizationData(SpectrumFrame),
}

/// Base delay between reconnection attempts (exponential backoff).
const RECONNECT_BASE_DELAY_SECS: u64 = 2;

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Used until the server's handshake says otherwise
const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(45);

/// Map a Socket.IO event onto a `PushEvent`. Unknown names yield `None`.
pub fn parse_event(name: &str, data: Value) -> Result<Option<PushEvent>, serde_json::Error> {
    let event = match name {
        "metadata_update" => PushEvent::MetadataUpdate(serde_json::from_value(data)?),
        "playback_state" => {
            let payload: PlaybackStatePayload = serde_json::from_value(data)?;
            PushEvent::PlaybackState(payload.playing())
        }
        "visualization_data" => PushEvent::VisualizationData(serde_json::from_value(data)?),
        _ => return Ok(None),
    };

    Ok(Some(event))
}

fn reconnect_delay(attempt: u32) -> Duration {
    let secs = RECONNECT_BASE_DELAY_SECS.saturating_mul(1u64 << attempt.min(6));
    Duration::from_secs(secs.min(MAX_RECONNECT_DELAY_SECS))
}

/// Socket.IO client feeding decoded events into a channel
pub struct PushClient {
    ws_url: String,
    event_tx: mpsc::Sender<PushEvent>,
}

impl PushClient {
    pub fn new(ws_url: String, event_tx: mpsc::Sender<PushEvent>) -> Self {
        Self { ws_url, event_tx }
    }

    /// Connection loop with reconnection logic. Runs until shutdown is
    /// signalled or the event receiver goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt = 0u32;

        loop {
            let mut connected = false;
            let result = tokio::select! {
                result = self.run_connection(&mut connected) => result,
                _ = shutdown.changed() => break,
            };

            if connected {
                attempt = 0;
                if self.event_tx.send(PushEvent::Disconnected).await.is_err() {
                    break;
                }
            }

            match result {
                Ok(()) => log::info!("Push channel closed by server"),
                Err(e) => log::warn!("Push channel error: {:#}", e),
            }

            if self.event_tx.is_closed() {
                break;
            }

            let delay = reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            log::info!("Reconnecting push channel in {:?}", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        log::info!("Push channel stopped");
    }

    async fn run_connection(&self, connected: &mut bool) -> Result<()> {
        log::info!("Connecting push channel at {}", self.ws_url);
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .context("Failed to open websocket")?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut silence_timeout = DEFAULT_SILENCE_TIMEOUT;

        loop {
            let message = match tokio::time::timeout(silence_timeout, ws_rx.next()).await {
                Ok(Some(message)) => message.context("Failed to read from websocket")?,
                Ok(None) => return Ok(()),
                Err(_) => anyhow::bail!("no ping from server within {:?}", silence_timeout),
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    log::debug!("Websocket closed: {:?}", frame);
                    return Ok(());
                }
                _ => continue,
            };

            let packet = match socketio::decode(text.as_str()) {
                Ok(packet) => packet,
                Err(e) => {
                    log::warn!("Ignoring malformed push packet: {} - {}", e, text.as_str());
                    continue;
                }
            };

            match packet {
                EnginePacket::Open(handshake) => {
                    log::debug!("Engine.IO session {}", handshake.sid);
                    silence_timeout =
                        Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
                    let connect = socketio::encode(&EnginePacket::Message(SocketPacket::Connect(None)));
                    ws_tx.send(Message::text(connect)).await?;
                }
                EnginePacket::Ping(data) => {
                    ws_tx
                        .send(Message::text(socketio::encode(&EnginePacket::Pong(data))))
                        .await?;
                }
                EnginePacket::Message(SocketPacket::Connect(_)) => {
                    log::info!("Connected to server");
                    *connected = true;
                    self.emit(PushEvent::Connected).await?;
                }
                EnginePacket::Message(SocketPacket::Event { name, data }) => {
                    match parse_event(&name, data) {
                        Ok(Some(event)) => self.emit(event).await?,
                        Ok(None) => log::debug!("Ignoring push event {}", name),
                        Err(e) => log::warn!("Malformed {} payload: {}", name, e),
                    }
                }
                EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                    anyhow::bail!("server refused connection: {}", data);
                }
                EnginePacket::Message(SocketPacket::Disconnect) | EnginePacket::Close => {
                    return Ok(());
                }
                EnginePacket::Pong(_) | EnginePacket::Noop => {}
            }
        }
    }

    async fn emit(&self, event: PushEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    const OPEN: &str =
        r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!(
            "ws://{}/socket.io/?EIO=4&transport=websocket",
            listener.local_addr().unwrap()
        );
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        while let Some(message) = ws.next().await {
            if let Message::Text(text) = message.unwrap() {
                return text.as_str().to_string();
            }
        }
        panic!("websocket closed before a text frame arrived");
    }

    #[test]
    fn parses_metadata_update() {
        let event = parse_event(
            "metadata_update",
            json!({"title": "Song", "artist": "Artist", "album": null, "artwork": null}),
        )
        .unwrap();

        match event {
            Some(PushEvent::MetadataUpdate(metadata)) => {
                assert_eq!(metadata.title, "Song");
                assert_eq!(metadata.album, "");
                assert_eq!(metadata.artwork_url, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn parses_playback_state_and_visualization() {
        assert!(matches!(
            parse_event("playback_state", json!(false)).unwrap(),
            Some(PushEvent::PlaybackState(false))
        ));

        match parse_event("visualization_data", json!({"spectrum": [-80.0], "rms_energy": 0.25})).unwrap() {
            Some(PushEvent::VisualizationData(frame)) => {
                assert_eq!(frame.bins, vec![-80.0]);
                assert_eq!(frame.rms_energy, 0.25);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unknown_events_are_skipped() {
        assert!(parse_event("something_else", json!({})).unwrap().is_none());
        assert!(parse_event("playback_state", json!("yes")).is_err());
    }

    #[test]
    fn reconnect_delay_grows_and_caps() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(2));
        assert_eq!(reconnect_delay(1), Duration::from_secs(4));
        assert_eq!(reconnect_delay(4), Duration::from_secs(32));
        assert_eq!(reconnect_delay(5), Duration::from_secs(60));
        assert_eq!(reconnect_delay(100), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn connection_answers_handshake_and_pings() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let mut replies = Vec::new();

            ws.send(Message::text(OPEN)).await.unwrap();
            replies.push(next_text(&mut ws).await);
            ws.send(Message::text(r#"40{"sid":"abc"}"#)).await.unwrap();
            ws.send(Message::text("2")).await.unwrap();
            replies.push(next_text(&mut ws).await);
            ws.send(Message::text(r#"42["playback_state",{"playing":true}]"#))
                .await
                .unwrap();
            ws.send(Message::text(r#"42["unrelated",1]"#)).await.unwrap();
            ws.send(Message::text("41")).await.unwrap();
            replies
        });

        let (tx, mut rx) = mpsc::channel(8);
        let client = PushClient::new(url, tx);
        let mut connected = false;
        client.run_connection(&mut connected).await.unwrap();

        assert!(connected);
        assert_eq!(server.await.unwrap(), vec!["40".to_string(), "3".to_string()]);
        assert!(matches!(rx.try_recv(), Ok(PushEvent::Connected)));
        assert!(matches!(rx.try_recv(), Ok(PushEvent::PlaybackState(true))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            ws.send(Message::text(
                r#"0{"sid":"abc","upgrades":[],"pingInterval":50,"pingTimeout":50}"#,
            ))
            .await
            .unwrap();
            next_text(&mut ws).await;
            ws.send(Message::text("40")).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, _rx) = mpsc::channel(8);
        let client = PushClient::new(url, tx);
        let mut connected = false;
        let err = client.run_connection(&mut connected).await.unwrap_err();

        assert!(connected);
        assert!(err.to_string().contains("no ping"));
        server.abort();
    }

    #[tokio::test]
    async fn run_reports_disconnect_and_stops_on_shutdown() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            ws.send(Message::text(OPEN)).await.unwrap();
            next_text(&mut ws).await;
            ws.send(Message::text("40")).await.unwrap();
            ws.send(Message::text("41")).await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(PushClient::new(url, tx).run(shutdown_rx));

        assert!(matches!(rx.recv().await, Some(PushEvent::Connected)));
        assert!(matches!(rx.recv().await, Some(PushEvent::Disconnected)));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        server.await.unwrap();
    }
}
