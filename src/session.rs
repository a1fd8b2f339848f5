//! Connection lifecycle and the single authoritative client state.
//!
//! ```text
//! disconnected ─connect─▶ connecting ─connection─▶ connected ─assets─▶ loadingAssets
//!                              ▲                                            │
//!                              │                                            ▼
//!                          forwarding ◀──forward── running ◀──────────── (ready)
//!                                                  │  ▲  │
//!                                            blur  │  │  │ transition
//!                                                  ▼  │  ▼
//!                                               paused  transitioning
//! ```
//!
//! Every state may fall to `disconnected` (transport loss) or `error`
//! (server-reported). Only the owning [`crate::SyncClient`] mutates a
//! session; everyone else reads.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;
use crate::protocol::ConnectionInfo;
use crate::types::{EntityId, ScreenInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    LoadingAssets,
    Running,
    Paused,
    Transitioning,
    Forwarding,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::LoadingAssets => "loadingAssets",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Transitioning => "transitioning",
            SessionState::Forwarding => "forwarding",
            SessionState::Error => "error",
        }
    }

    /// States reached only after the server accepted the connection.
    pub fn is_connected_family(self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::LoadingAssets
                | SessionState::Running
                | SessionState::Paused
                | SessionState::Transitioning
        )
    }

    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        if self == to {
            return false;
        }
        match (self, to) {
            (_, Disconnected) | (_, Error) => true,
            (Disconnected, Connecting) | (Error, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, LoadingAssets) => true,
            (Running, LoadingAssets) | (Transitioning, LoadingAssets) => true,
            (LoadingAssets, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Transitioning) | (Transitioning, Running) => true,
            (from, Forwarding) => from.is_connected_family(),
            (Forwarding, Connecting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    server_address: String,
    client_id: Option<String>,
    initial_data: Option<Value>,
    screen_info: ScreenInfo,
    /// Bumped on every connect / forward.
    epoch: u64,
    last_error: Option<String>,
    attached_actor: Option<EntityId>,
    transition_deadline: Option<Instant>,
}

impl Session {
    pub fn new(server_address: impl Into<String>, screen_info: ScreenInfo) -> Self {
        Self {
            state: SessionState::Disconnected,
            server_address: server_address.into(),
            client_id: None,
            initial_data: None,
            screen_info,
            epoch: 0,
            last_error: None,
            attached_actor: None,
            transition_deadline: None,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn initial_data(&self) -> Option<&Value> {
        self.initial_data.as_ref()
    }

    pub fn screen_info(&self) -> &ScreenInfo {
        &self.screen_info
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn attached_actor(&self) -> Option<&EntityId> {
        self.attached_actor.as_ref()
    }

    pub fn transition_deadline(&self) -> Option<Instant> {
        self.transition_deadline
    }

    /// Input may be transmitted.
    pub fn can_send_input(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Inbound updates may be applied to the actor map.
    pub fn can_apply_updates(&self) -> bool {
        self.state == SessionState::Running
    }

    // -----------------------------------------------------------------------
    // Writes (owning client only)
    // -----------------------------------------------------------------------

    /// Move to `to`, returning the previous state.
    pub(crate) fn transition(&mut self, to: SessionState) -> Result<SessionState, SessionError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }
        log::debug!("[session] {} -> {}", from, to);
        self.state = to;
        if from == SessionState::Transitioning {
            self.transition_deadline = None;
        }
        Ok(from)
    }

    /// Start a fresh connection attempt to `address`; returns the new epoch.
    pub(crate) fn begin_connect(&mut self, address: &str) -> Result<u64, SessionError> {
        self.transition(SessionState::Connecting)?;
        self.server_address = address.to_string();
        self.client_id = None;
        self.initial_data = None;
        self.attached_actor = None;
        self.last_error = None;
        self.epoch += 1;
        Ok(self.epoch)
    }

    pub(crate) fn accept_connection(&mut self, info: &ConnectionInfo) -> Result<(), SessionError> {
        self.transition(SessionState::Connected)?;
        self.client_id = info.client_id.clone();
        self.initial_data = info.initial_data.clone();
        Ok(())
    }

    /// Fall back to `disconnected`, forgetting server-assigned identity.
    pub(crate) fn drop_connection(&mut self) {
        if self.state != SessionState::Disconnected {
            let _ = self.transition(SessionState::Disconnected);
        }
        self.client_id = None;
        self.attached_actor = None;
        self.transition_deadline = None;
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        if self.state != SessionState::Error {
            let _ = self.transition(SessionState::Error);
        }
        self.transition_deadline = None;
    }

    pub(crate) fn begin_transition(&mut self, deadline: Instant) -> Result<(), SessionError> {
        self.transition(SessionState::Transitioning)?;
        self.transition_deadline = Some(deadline);
        Ok(())
    }

    /// End an expired transition. Returns `true` if the state changed.
    pub(crate) fn expire_transition(&mut self, now: Instant) -> bool {
        match self.transition_deadline {
            Some(deadline) if self.state == SessionState::Transitioning && now >= deadline => {
                self.transition(SessionState::Running).is_ok()
            }
            _ => false,
        }
    }

    pub(crate) fn set_screen_info(&mut self, info: ScreenInfo) -> bool {
        if self.screen_info == info {
            return false;
        }
        self.screen_info = info;
        true
    }

    pub(crate) fn attach(&mut self, id: EntityId) {
        self.attached_actor = Some(id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn running_session() -> Session {
        let mut s = Session::new("ws://a", ScreenInfo::default());
        s.begin_connect("ws://a").unwrap();
        s.accept_connection(&ConnectionInfo {
            client_id: Some("c1".into()),
            ..Default::default()
        })
        .unwrap();
        s.transition(SessionState::LoadingAssets).unwrap();
        s.transition(SessionState::Running).unwrap();
        s
    }

    #[test]
    fn happy_path_reaches_running() {
        let s = running_session();
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(s.client_id(), Some("c1"));
        assert_eq!(s.epoch(), 1);
        assert!(s.can_send_input());
        assert!(s.can_apply_updates());
    }

    #[test]
    fn invalid_transition_leaves_state() {
        let mut s = Session::new("ws://a", ScreenInfo::default());
        let err = s.transition(SessionState::Running).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                from: SessionState::Disconnected,
                to: SessionState::Running
            }
        );
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn forwarding_only_from_connected_family() {
        assert!(SessionState::Running.can_transition_to(SessionState::Forwarding));
        assert!(SessionState::Paused.can_transition_to(SessionState::Forwarding));
        assert!(!SessionState::Connecting.can_transition_to(SessionState::Forwarding));
        assert!(!SessionState::Disconnected.can_transition_to(SessionState::Forwarding));
        assert!(SessionState::Forwarding.can_transition_to(SessionState::Connecting));
    }

    #[test]
    fn paused_gates_input_and_updates() {
        let mut s = running_session();
        s.transition(SessionState::Paused).unwrap();
        assert!(!s.can_send_input());
        assert!(!s.can_apply_updates());
    }

    #[test]
    fn drop_connection_clears_identity() {
        let mut s = running_session();
        s.attach(EntityId::Num(3));
        s.drop_connection();
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(s.client_id(), None);
        assert_eq!(s.attached_actor(), None);
    }

    #[test]
    fn transition_expires_at_deadline() {
        let mut s = running_session();
        let start = Instant::now();
        s.begin_transition(start + Duration::from_millis(500)).unwrap();
        assert!(!s.expire_transition(start + Duration::from_millis(499)));
        assert_eq!(s.state(), SessionState::Transitioning);
        assert!(s.expire_transition(start + Duration::from_millis(500)));
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(s.transition_deadline(), None);
    }

    #[test]
    fn error_then_reconnect_bumps_epoch() {
        let mut s = running_session();
        s.fail("kicked");
        assert_eq!(s.state(), SessionState::Error);
        assert_eq!(s.last_error(), Some("kicked"));
        s.begin_connect("ws://b").unwrap();
        assert_eq!(s.epoch(), 2);
        assert_eq!(s.server_address(), "ws://b");
        assert_eq!(s.last_error(), None);
    }

    #[test]
    fn screen_info_change_detection() {
        let mut s = Session::new("ws://a", ScreenInfo::default());
        assert!(!s.set_screen_info(ScreenInfo::default()));
        assert!(s.set_screen_info(ScreenInfo {
            screen_width: 800,
            ..Default::default()
        }));
    }
}
