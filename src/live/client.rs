//! # Live Service Client
//!
//! One WebSocket connection to the speech service per session, driven by a
//! background tokio task.
//!
//! ## Connection Task:
//! 1. Connect to `{endpoint}?key={api_key}`
//! 2. Send the setup message
//! 3. Loop: forward queued outbound messages, parse inbound frames into events
//! 4. Exit when the outbound queue is dropped (local close) or the remote side
//!    closes; report the latter as `Closed`
//!
//! Everything the task learns is sent to the owning actor as a
//! [`SessionSignal::Provider`] carrying the epoch it was opened with.

use crate::error::SessionError;
use crate::live::protocol::{parse_server_frame, ClientMessage, LiveSetup};
use crate::live::SessionProvider;
use crate::session::events::{ProviderSignal, SessionSignal};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

struct Connection {
    epoch: u64,
    outbound: UnboundedSender<ClientMessage>,
}

/// [`SessionProvider`] backed by the hosted live API.
pub struct LiveClient {
    endpoint: String,
    api_key: String,
    signals: UnboundedSender<SessionSignal>,
    connection: Option<Connection>,
}

impl LiveClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, signals: UnboundedSender<SessionSignal>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            signals,
            connection: None,
        }
    }

    fn url(&self) -> Result<String, SessionError> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| SessionError::ConnectionFailure(format!("invalid live endpoint {}: {}", self.endpoint, e)))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url.into())
    }
}

impl SessionProvider for LiveClient {
    fn open(&mut self, epoch: u64, setup: &LiveSetup) -> Result<(), SessionError> {
        if self.api_key.is_empty() {
            return Err(SessionError::ConnectionFailure(
                "no API key configured for the live service".to_string(),
            ));
        }

        // A session is never layered on top of another
        self.close()?;

        let setup = ClientMessage::Setup(setup.clone())
            .to_json()
            .map_err(|e| SessionError::ConnectionFailure(format!("could not encode setup: {}", e)))?;

        let url = self.url()?;
        let (outbound, outbound_rx) = unbounded_channel();
        tokio::spawn(run_connection(
            url,
            setup,
            outbound_rx,
            self.signals.clone(),
            epoch,
        ));

        debug!(epoch, endpoint = %self.endpoint, "Live connection task spawned");
        self.connection = Some(Connection { epoch, outbound });
        Ok(())
    }

    fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| SessionError::Transport("no live connection".to_string()))?;

        connection
            .outbound
            .send(message)
            .map_err(|_| SessionError::Transport("live connection task has exited".to_string()))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if let Some(connection) = self.connection.take() {
            // Dropping the queue tells the task to send a close frame and exit
            drop(connection.outbound);
            debug!(epoch = connection.epoch, "Live connection closing");
        }
        Ok(())
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

async fn run_connection(
    url: String,
    setup: String,
    mut outbound: UnboundedReceiver<ClientMessage>,
    signals: UnboundedSender<SessionSignal>,
    epoch: u64,
) {
    let emit = |signal: ProviderSignal| {
        if signals.send(SessionSignal::Provider { epoch, signal }).is_err() {
            trace!(epoch, "Session is gone; dropping provider signal");
        }
    };

    let (socket, _response) = match connect_async(url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            error!(epoch, "Could not connect to live service: {}", e);
            emit(ProviderSignal::Failed(SessionError::ConnectionFailure(e.to_string())));
            return;
        }
    };
    info!(epoch, "Connected to live service");

    let (mut sink, mut stream) = socket.split();

    if let Err(e) = sink.send(Message::Text(setup)).await {
        error!(epoch, "Could not send setup: {}", e);
        emit(ProviderSignal::Failed(SessionError::ConnectionFailure(e.to_string())));
        return;
    }

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    let kind = message.kind();
                    match message.to_json() {
                        Ok(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!(epoch, kind, "{}", SessionError::Transport(e.to_string()));
                            }
                        }
                        Err(e) => warn!(epoch, kind, "Could not encode outbound message: {}", e),
                    }
                }
                None => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!(epoch, "Ignoring close frame failure: {}", e);
                    }
                    debug!(epoch, "Live connection closed locally");
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_frame(epoch, &text, &emit),
                // The live API delivers JSON in binary frames too
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => handle_frame(epoch, &text, &emit),
                    Err(e) => warn!(epoch, "Dropping non-UTF-8 binary frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    info!(epoch, reason = ?reason, "Live service closed the connection");
                    emit(ProviderSignal::Closed(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(epoch, "Live connection failed: {}", e);
                    emit(ProviderSignal::Closed(Some(e.to_string())));
                    break;
                }
                None => {
                    emit(ProviderSignal::Closed(None));
                    break;
                }
            },
        }
    }
}

fn handle_frame(epoch: u64, text: &str, emit: &impl Fn(ProviderSignal)) {
    match parse_server_frame(text) {
        Ok(events) if events.is_empty() => trace!(epoch, "Ignoring frame with no session events"),
        Ok(events) => emit(ProviderSignal::Events(events)),
        Err(e) => warn!(epoch, "Dropping unparseable frame: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::live::protocol::ServerEvent;
    use crate::session::prompt::build_setup;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn setup() -> LiveSetup {
        let config = AppConfig::default();
        build_setup(&config.live, &config.business)
    }

    async fn next_signal(rx: &mut UnboundedReceiver<SessionSignal>) -> (u64, ProviderSignal) {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(SessionSignal::Provider { epoch, signal })) => (epoch, signal),
            other => panic!("expected a provider signal, got {:?}", other),
        }
    }

    #[test]
    fn test_url_includes_key() {
        let (signals, _rx) = unbounded_channel();
        let client = LiveClient::new("wss://example.test/live", "abc", signals.clone());
        assert_eq!(client.url().unwrap(), "wss://example.test/live?key=abc");

        let client = LiveClient::new("wss://example.test/live?alt=json", "abc", signals.clone());
        assert_eq!(client.url().unwrap(), "wss://example.test/live?alt=json&key=abc");

        // A bare host still needs a path before the query
        let client = LiveClient::new("ws://127.0.0.1:9000", "abc", signals.clone());
        assert_eq!(client.url().unwrap(), "ws://127.0.0.1:9000/?key=abc");

        let client = LiveClient::new("wss://example.test/live", "a+b/c=d", signals.clone());
        assert_eq!(client.url().unwrap(), "wss://example.test/live?key=a%2Bb%2Fc%3Dd");

        let client = LiveClient::new("not a url", "abc", signals);
        assert!(matches!(client.url(), Err(SessionError::ConnectionFailure(_))));
    }

    #[test]
    fn test_open_without_key_fails() {
        let (signals, _rx) = unbounded_channel();
        let mut client = LiveClient::new("wss://example.test/live", "", signals);
        assert!(matches!(
            client.open(1, &setup()),
            Err(SessionError::ConnectionFailure(_))
        ));
    }

    #[test]
    fn test_send_without_connection_is_transport_error() {
        let (signals, _rx) = unbounded_channel();
        let mut client = LiveClient::new("wss://example.test/live", "abc", signals);
        assert!(matches!(
            client.send(ClientMessage::text("hello")),
            Err(SessionError::Transport(_))
        ));
        assert!(client.close().is_ok());
    }

    #[tokio::test]
    async fn test_connection_failure_is_signalled() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (signals, mut rx) = unbounded_channel();
        let mut client = LiveClient::new(format!("ws://{}", addr), "abc", signals);
        client.open(3, &setup()).unwrap();

        let (epoch, signal) = next_signal(&mut rx).await;
        assert_eq!(epoch, 3);
        assert!(matches!(
            signal,
            ProviderSignal::Failed(SessionError::ConnectionFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let first = ws.next().await.unwrap().unwrap().into_text().unwrap();
            let first: serde_json::Value = serde_json::from_str(&first).unwrap();
            assert!(first.get("setup").is_some());

            ws.send(Message::Text(r#"{"setupComplete": {}}"#.to_string()))
                .await
                .unwrap();

            let second = ws.next().await.unwrap().unwrap().into_text().unwrap();
            let second: serde_json::Value = serde_json::from_str(&second).unwrap();
            assert_eq!(second["clientContent"]["turns"][0]["parts"][0]["text"], "hello");

            ws.send(Message::Binary(
                br#"{"serverContent": {"outputTranscription": {"text": "Hi!"}}}"#.to_vec(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        });

        let (signals, mut rx) = unbounded_channel();
        let mut client = LiveClient::new(format!("ws://{}", addr), "abc", signals);
        client.open(7, &setup()).unwrap();

        let (epoch, signal) = next_signal(&mut rx).await;
        assert_eq!(epoch, 7);
        assert!(matches!(signal, ProviderSignal::Events(ref e) if e == &vec![ServerEvent::SetupComplete]));

        client.send(ClientMessage::text("hello")).unwrap();

        let (_, signal) = next_signal(&mut rx).await;
        match signal {
            ProviderSignal::Events(events) => {
                assert_eq!(events, vec![ServerEvent::OutputTranscript("Hi!".to_string())]);
            }
            other => panic!("unexpected signal: {:?}", other),
        }

        let (_, signal) = next_signal(&mut rx).await;
        assert!(matches!(signal, ProviderSignal::Closed(None)));

        server.await.unwrap();
    }
}
