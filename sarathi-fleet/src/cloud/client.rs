//! Cloud pub/sub client
//!
//! [`CloudClient`] is the seam to whatever transport carries the shadow
//! documents. Outcomes are never returned synchronously: they arrive on the
//! cloud queue as [`ClientEvent`]s.
//!
//! [`TcpShadowClient`] speaks newline-delimited JSON to a shadow relay:
//!
//! ```text
//! -> {"type":"hello","clientId":"sarathi-gateway"}
//! -> {"type":"publish","id":7,"kind":"update","ackRequired":true,"payload":{...}}
//! <- {"type":"puback","id":7}
//! <- {"type":"delta","payload":{"version":3,"state":{...}}}
//! ```

use super::qos::{QosKind, QosMessage};
use crate::config::CloudConfig;
use crate::error::{FleetError, Result};
use crate::events::{ClientEvent, CloudMsg, Outbox};
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub trait CloudClient: Send {
    /// Start a connection attempt; reports `Connected` or `ConnectFailed`.
    fn connect(&mut self) -> Result<()>;

    /// Drop the connection. No `Disconnected` event follows.
    fn disconnect(&mut self);

    fn publish(&mut self, message: &QosMessage) -> Result<()>;
}

/// JSON-lines client for a TCP shadow relay
pub struct TcpShadowClient {
    endpoint: String,
    client_id: String,
    timeout: Duration,
    events: Outbox<CloudMsg>,
    stream: Arc<Mutex<Option<TcpStream>>>,
    /// Bumped on every connect/disconnect; events from older sessions are muted
    session: Arc<AtomicU64>,
}

impl TcpShadowClient {
    pub fn new(config: &CloudConfig, events: Outbox<CloudMsg>) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            client_id: config.client_id.clone(),
            timeout: config.connect_timeout(),
            events,
            stream: Arc::new(Mutex::new(None)),
            session: Arc::new(AtomicU64::new(0)),
        }
    }

    fn close_stream(&self) {
        let stream = match self.stream.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stream) = stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl CloudClient for TcpShadowClient {
    fn connect(&mut self) -> Result<()> {
        self.close_stream();
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        let worker = SessionWorker {
            endpoint: self.endpoint.clone(),
            client_id: self.client_id.clone(),
            timeout: self.timeout,
            events: self.events.clone(),
            stream: Arc::clone(&self.stream),
            current: Arc::clone(&self.session),
            session,
        };
        thread::Builder::new()
            .name("cloud-session".into())
            .spawn(move || worker.run())?;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.session.fetch_add(1, Ordering::SeqCst);
        self.close_stream();
    }

    fn publish(&mut self, message: &QosMessage) -> Result<()> {
        let payload: Value = serde_json::from_slice(&message.payload)?;
        let kind = match message.kind {
            QosKind::ShadowUpdate => "update",
            QosKind::ShadowClear => "clear",
        };
        let line = json!({
            "type": "publish",
            "id": message.id,
            "kind": kind,
            "ackRequired": message.ack_required,
            "payload": payload,
        });

        let mut slot = self
            .stream
            .lock()
            .map_err(|_| FleetError::Cloud("stream lock poisoned".into()))?;
        let stream = slot
            .as_mut()
            .ok_or_else(|| FleetError::Cloud("not connected".into()))?;
        serde_json::to_writer(&mut *stream, &line)?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }
}

/// One connection attempt plus its reader loop
struct SessionWorker {
    endpoint: String,
    client_id: String,
    timeout: Duration,
    events: Outbox<CloudMsg>,
    stream: Arc<Mutex<Option<TcpStream>>>,
    current: Arc<AtomicU64>,
    session: u64,
}

impl SessionWorker {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.session
    }

    fn post(&self, event: ClientEvent) {
        if self.is_current() {
            self.events.post(CloudMsg::Client(event));
        }
    }

    fn run(self) {
        let reader = match self.open() {
            Ok(reader) => reader,
            Err(e) => {
                self.post(ClientEvent::ConnectFailed(e.to_string()));
                return;
            }
        };
        info!("Connected to shadow relay {}", self.endpoint);
        self.post(ClientEvent::Connected);

        for line in BufReader::new(reader).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("Shadow relay read failed: {}", e);
                    break;
                }
            };
            if !self.is_current() {
                return;
            }
            if let Some(event) = parse_line(&line) {
                self.post(event);
            }
        }
        self.post(ClientEvent::Disconnected);
    }

    /// Connect, greet, and park the write half for publishing.
    fn open(&self) -> Result<TcpStream> {
        let addr = self
            .endpoint
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| FleetError::Cloud(format!("cannot resolve {}", self.endpoint)))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_nodelay(true)?;

        let hello = json!({"type": "hello", "clientId": self.client_id});
        serde_json::to_writer(&mut stream, &hello)?;
        stream.write_all(b"\n")?;

        let reader = stream.try_clone()?;
        let mut slot = self
            .stream
            .lock()
            .map_err(|_| FleetError::Cloud("stream lock poisoned".into()))?;
        if !self.is_current() {
            return Err(FleetError::Cloud("superseded".into()));
        }
        *slot = Some(stream);
        Ok(reader)
    }
}

fn parse_line(line: &str) -> Option<ClientEvent> {
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("Malformed relay line: {}", e);
            return None;
        }
    };
    match message.get("type").and_then(Value::as_str) {
        Some("delta") => {
            let payload = message.get("payload")?;
            serde_json::to_vec(payload).ok().map(ClientEvent::Delta)
        }
        Some("puback") => message
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .map(ClientEvent::PubAck),
        other => {
            debug!("Relay message {:?} ignored", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, unbounded};
    use std::borrow::Cow;
    use std::net::TcpListener;

    fn next_client_event(rx: &Receiver<CloudMsg>) -> ClientEvent {
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            CloudMsg::Client(event) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn client_for(endpoint: String) -> (TcpShadowClient, Receiver<CloudMsg>) {
        let (tx, rx) = unbounded();
        let config = CloudConfig {
            endpoint,
            connect_timeout_ms: 500,
            ..CloudConfig::default()
        };
        (TcpShadowClient::new(&config, Outbox::new("cloud", tx)), rx)
    }

    #[test]
    fn test_parse_relay_lines() {
        assert_eq!(
            parse_line(r#"{"type":"puback","id":7}"#),
            Some(ClientEvent::PubAck(7))
        );
        let Some(ClientEvent::Delta(bytes)) =
            parse_line(r#"{"type":"delta","payload":{"version":2}}"#)
        else {
            panic!("expected delta");
        };
        assert_eq!(
            crate::codec::decode_delta(&bytes).map(|d| d.version),
            Some(2)
        );
        assert_eq!(parse_line(r#"{"type":"other"}"#), None);
        assert_eq!(parse_line("garbage"), None);
    }

    #[test]
    fn test_publish_without_connection_fails() {
        let (mut client, _rx) = client_for("127.0.0.1:1".into());
        let message = QosMessage {
            id: 1,
            kind: QosKind::ShadowUpdate,
            payload: Cow::Borrowed(b"{}"),
            ack_required: true,
        };
        assert!(matches!(client.publish(&message), Err(FleetError::Cloud(_))));
    }

    #[test]
    fn test_session_with_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let (mut client, rx) = client_for(endpoint);

        client.connect().unwrap();
        let (socket, _) = listener.accept().unwrap();
        let mut relay_reader = BufReader::new(socket.try_clone().unwrap());
        let mut relay = socket;

        let mut hello = String::new();
        relay_reader.read_line(&mut hello).unwrap();
        assert!(hello.contains("\"hello\""));
        assert_eq!(next_client_event(&rx), ClientEvent::Connected);

        let message = QosMessage {
            id: 5,
            kind: QosKind::ShadowClear,
            payload: Cow::Borrowed(crate::codec::REMOVE_ALL),
            ack_required: true,
        };
        client.publish(&message).unwrap();
        let mut line = String::new();
        relay_reader.read_line(&mut line).unwrap();
        let published: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(published["id"], 5);
        assert_eq!(published["kind"], "clear");
        assert_eq!(published["payload"], json!({"state": null}));

        relay.write_all(b"{\"type\":\"puback\",\"id\":5}\n").unwrap();
        assert_eq!(next_client_event(&rx), ClientEvent::PubAck(5));

        drop(relay);
        drop(relay_reader);
        assert_eq!(next_client_event(&rx), ClientEvent::Disconnected);
    }

    #[test]
    fn test_refused_connection_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);
        let (mut client, rx) = client_for(endpoint);
        client.connect().unwrap();
        assert!(matches!(
            next_client_event(&rx),
            ClientEvent::ConnectFailed(_)
        ));
    }
}
