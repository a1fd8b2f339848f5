//! Transport channel seam.
//!
//! A transport carries named messages (`event` + JSON payload) over one
//! persistent connection. Outbound traffic goes through [`Transport::emit`];
//! inbound traffic is delivered by whoever drives the client as
//! [`Inbound`] values passed to [`crate::SyncClient::handle_inbound`].
//! Keeping delivery outside the trait means the client never re-enters
//! itself from a callback.
//!
//! Every `open` is numbered with the session epoch it serves, and every
//! inbound event carries that number back. A socket that is still draining
//! after a forward or reconnect can then be told apart from the current one.

use serde_json::Value;

use crate::error::TransportError;
use crate::protocol::WireFrame;

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A named message from the server.
    Message { event: String, data: Value },
    /// The connection ended, with the peer's reason if it gave one.
    Closed(Option<String>),
    /// Socket-level failure; the connection should be considered gone.
    Error(String),
}

impl TransportEvent {
    pub fn message(event: impl Into<String>, data: Value) -> Self {
        TransportEvent::Message {
            event: event.into(),
            data,
        }
    }
}

impl From<WireFrame> for TransportEvent {
    fn from(frame: WireFrame) -> Self {
        TransportEvent::Message {
            event: frame.event,
            data: frame.data,
        }
    }
}

/// A [`TransportEvent`] tagged with the epoch of the connection that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub epoch: u64,
    pub event: TransportEvent,
}

impl Inbound {
    pub fn new(epoch: u64, event: TransportEvent) -> Self {
        Self { epoch, event }
    }
}

pub trait Transport {
    /// Open connection number `epoch` to `address`, passing `query` as
    /// connection parameters. Inbound events for this connection are tagged
    /// with `epoch`. Completion is signalled by the server's `connection`
    /// message, not by this call returning.
    fn open(
        &mut self,
        address: &str,
        query: &[(String, String)],
        epoch: u64,
    ) -> Result<(), TransportError>;

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Tear the connection down. Closing a closed transport is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(
        &mut self,
        address: &str,
        query: &[(String, String)],
        epoch: u64,
    ) -> Result<(), TransportError> {
        (**self).open(address, query, epoch)
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        (**self).emit(event, payload)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

// ---------------------------------------------------------------------------
// LocalTransport
// ---------------------------------------------------------------------------

/// In-memory transport that records everything it is asked to do.
///
/// Nothing is delivered anywhere; tests and embedders inspect
/// [`LocalTransport::emitted`] and feed inbound traffic to the client
/// themselves.
#[derive(Debug, Default)]
pub struct LocalTransport {
    open: bool,
    address: Option<String>,
    query: Vec<(String, String)>,
    epoch: u64,
    emitted: Vec<WireFrame>,
    opens: usize,
    closes: usize,
    refuse: Option<String>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with `reason`.
    pub fn refuse_next_open(&mut self, reason: impl Into<String>) {
        self.refuse = Some(reason.into());
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Epoch passed to the most recent successful `open`.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Tag `event` as coming from the current connection.
    pub fn inbound(&self, event: TransportEvent) -> Inbound {
        Inbound::new(self.epoch, event)
    }

    pub fn emitted(&self) -> &[WireFrame] {
        &self.emitted
    }

    /// Emitted frames with the given name, oldest first.
    pub fn emitted_named(&self, event: &str) -> Vec<&WireFrame> {
        self.emitted.iter().filter(|f| f.event == event).collect()
    }

    pub fn take_emitted(&mut self) -> Vec<WireFrame> {
        std::mem::take(&mut self.emitted)
    }

    pub fn open_count(&self) -> usize {
        self.opens
    }

    pub fn close_count(&self) -> usize {
        self.closes
    }
}

impl Transport for LocalTransport {
    fn open(
        &mut self,
        address: &str,
        query: &[(String, String)],
        epoch: u64,
    ) -> Result<(), TransportError> {
        if let Some(reason) = self.refuse.take() {
            return Err(TransportError::ConnectFailed {
                address: address.to_string(),
                reason,
            });
        }
        self.open = true;
        self.opens += 1;
        self.address = Some(address.to_string());
        self.query = query.to_vec();
        self.epoch = epoch;
        Ok(())
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.emitted.push(WireFrame::new(event, payload));
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
