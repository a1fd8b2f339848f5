//! WebSocket transport (feature `net`).
//!
//! Each named message travels as one JSON text frame:
//!
//! ```text
//! {"event": "clientInput", "data": { ... }}
//! ```
//!
//! The socket lives on a spawned tokio task. [`WsTransport`] itself only
//! holds the command sender, so `emit` never blocks; inbound traffic comes
//! back as epoch-tagged [`Inbound`] events on the channel handed out by
//! [`WsTransport::channel`]. All sockets share that channel, so a closing
//! socket may still deliver after the next one is open.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{ProtocolError, TransportError};
use crate::protocol::WireFrame;
use crate::transport::{Inbound, Transport, TransportEvent};

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

pub fn encode_frame(event: &str, data: Value) -> Result<String, TransportError> {
    serde_json::to_string(&WireFrame::new(event, data))
        .map_err(|e| TransportError::Send(e.to_string()))
}

pub fn decode_frame(text: &str) -> Result<WireFrame, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::malformed("frame", e))
}

/// Append `query` to `address` as URL query parameters.
pub fn with_query(address: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return address.to_string();
    }
    let params: Vec<String> = query
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect();
    let sep = if address.contains('?') { '&' } else { '?' };
    format!("{}{}{}", address, sep, params.join("&"))
}

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

enum Command {
    Send(String),
    Close,
}

pub struct WsTransport {
    inbound: mpsc::UnboundedSender<Inbound>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(inbound: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            inbound,
            commands: None,
            task: None,
        }
    }

    /// A transport plus the receiver its inbound events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Transport for WsTransport {
    /// Must be called from within a tokio runtime.
    fn open(
        &mut self,
        address: &str,
        query: &[(String, String)],
        epoch: u64,
    ) -> Result<(), TransportError> {
        self.close();
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            TransportError::ConnectFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }
        })?;
        let url = with_query(address, query);
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx);
        let inbound = EpochSender {
            epoch,
            tx: self.inbound.clone(),
        };
        self.task = Some(handle.spawn(socket_loop(url, rx, inbound)));
        Ok(())
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        let commands = self.commands.as_ref().ok_or(TransportError::NotOpen)?;
        let text = encode_frame(event, payload)?;
        commands
            .send(Command::Send(text))
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close);
        }
        // The socket loop exits once it sees Close.
        self.task = None;
    }

    fn is_open(&self) -> bool {
        self.commands.as_ref().is_some_and(|c| !c.is_closed())
            && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Inbound sender bound to one connection's epoch.
struct EpochSender {
    epoch: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EpochSender {
    /// `false` once the receiving side is gone.
    fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(Inbound::new(self.epoch, event)).is_ok()
    }
}

/// Owns the socket for one connection attempt.
#[tracing::instrument(skip(commands, inbound), fields(epoch = inbound.epoch))]
async fn socket_loop(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound: EpochSender,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            log::warn!("[ws] connect to {} failed: {}", url, e);
            let _ = inbound.send(TransportEvent::Error(e.to_string()));
            let _ = inbound.send(TransportEvent::Closed(None));
            return;
        }
    };
    log::info!("[ws] connected to {}", url);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        let _ = inbound.send(TransportEvent::Error(e.to_string()));
                        let _ = inbound.send(TransportEvent::Closed(None));
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.close().await;
                    log::debug!("[ws] closed by client");
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Ok(frame) => {
                        if !inbound.send(frame.into()) {
                            break;
                        }
                    }
                    Err(e) => log::warn!("[ws] dropping frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    let _ = inbound.send(TransportEvent::Closed(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = inbound.send(TransportEvent::Error(e.to_string()));
                    let _ = inbound.send(TransportEvent::Closed(None));
                    break;
                }
                None => {
                    let _ = inbound.send(TransportEvent::Closed(None));
                    break;
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
