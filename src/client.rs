//! `SyncClient`: composes session, input, reconciler and assets over one
//! transport.
//!
//! The client is a plain synchronous state machine. Whoever owns it feeds it
//! three kinds of stimulus and it reacts within the same call:
//!
//! ```text
//!   host input ──▶ on_input_event ──▶ InputAggregator ─┐
//!                                                       │ tick(now)
//!   transport  ──▶ handle_inbound (epoch check)         ▼
//!                   │  ServerMessage::decode      Transport::emit
//!                   ├─▶ Session (lifecycle, gating)
//!                   ├─▶ EntityReconciler ──▶ RenderSink::render
//!                   └─▶ AssetLoader ──▶ on_assets_ready
//! ```
//!
//! Caller-facing notifications (state changes, errors, headlines, chat)
//! are queued and collected with [`SyncClient::drain_events`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::assets::{AssetCatalog, AssetLoader, AssetRequest, LoadStatus};
use crate::error::{Result, SessionError, SyncError, TransportError};
use crate::input::{InputAggregator, InputEvent};
use crate::protocol::{events, AssetManifest, ConnectionInfo, FramePacket, ServerMessage};
use crate::reconciler::{Actor, EntityReconciler, ReconcileReport};
use crate::session::{Session, SessionState};
use crate::transport::{Inbound, Transport, TransportEvent};
use crate::types::{EntityId, InputFlush, ScreenInfo, SyncConfig, ViewState};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// One paint pass: live actors in paint order plus the camera.
#[derive(Debug)]
pub struct RenderFrame<'a> {
    pub actors: Vec<&'a Actor>,
    pub view: ViewState,
}

pub trait RenderSink {
    fn render(&mut self, frame: &RenderFrame<'_>);
}

impl<F> RenderSink for F
where
    F: FnMut(&RenderFrame<'_>),
{
    fn render(&mut self, frame: &RenderFrame<'_>) {
        self(frame)
    }
}

/// Notifications for the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged { from: SessionState, to: SessionState },
    Connected { client_id: Option<String> },
    /// Recoverable failure; the client is still usable.
    Error(String),
    Headline(String),
    Message(String),
    ViewResized(ViewState),
    Attached(EntityId),
    AssetsLoaded { sheets: usize },
    Forwarded { address: String },
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SyncClient<T: Transport> {
    config: SyncConfig,
    transport: T,
    session: Session,
    input: InputAggregator,
    reconciler: EntityReconciler,
    assets: AssetCatalog,
    loader: Box<dyn AssetLoader>,
    sink: Box<dyn RenderSink>,
    view: ViewState,
    events: VecDeque<SyncEvent>,
}

impl<T: Transport> SyncClient<T> {
    pub fn new(
        config: SyncConfig,
        transport: T,
        loader: Box<dyn AssetLoader>,
        sink: Box<dyn RenderSink>,
    ) -> Self {
        Self {
            input: InputAggregator::new(&config),
            reconciler: EntityReconciler::new(&config),
            session: Session::new("", ScreenInfo::default()),
            assets: AssetCatalog::new(),
            view: ViewState::default(),
            events: VecDeque::new(),
            config,
            transport,
            loader,
            sink,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn actors(&self) -> Vec<&Actor> {
        self.reconciler.actors()
    }

    pub fn reconciler(&self) -> &EntityReconciler {
        &self.reconciler
    }

    pub fn input(&self) -> &InputAggregator {
        &self.input
    }

    pub fn assets(&self) -> &AssetCatalog {
        &self.assets
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Take every queued notification, oldest first.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.events.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open a connection to `address`. Any current connection is dropped
    /// first.
    pub fn connect(&mut self, address: &str) -> Result<()> {
        match self.session.state() {
            SessionState::Disconnected | SessionState::Error | SessionState::Forwarding => {}
            _ => self.teardown(),
        }
        self.open_connection(address)
    }

    /// Close the connection and forget server-assigned state.
    pub fn disconnect(&mut self) {
        if self.session.state() == SessionState::Disconnected {
            return;
        }
        if self.transport.is_open() {
            let event = self.config.dialect.state_change_event();
            if let Err(e) = self.transport.emit(event, Value::from("disconnected")) {
                log::debug!("[client] disconnect notice not sent: {}", e);
            }
        }
        log::info!("[client] disconnecting from {}", self.session.server_address());
        self.teardown();
    }

    /// Window lost focus: keep aggregating input but stop sending it.
    pub fn pause(&mut self) -> Result<()> {
        self.set_state(SessionState::Paused)
    }

    /// Window regained focus. Discrete input recorded while paused is dropped.
    pub fn resume(&mut self) -> Result<()> {
        if self.session.state() != SessionState::Paused {
            return Err(SessionError::InvalidTransition {
                from: self.session.state(),
                to: SessionState::Running,
            }
            .into());
        }
        self.input.discard_events();
        self.set_state(SessionState::Running)
    }

    /// Scheduler boundary: end an expired transition and send coalesced input.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.session.expire_transition(now) {
            self.announce(SessionState::Transitioning, SessionState::Running)?;
        }
        self.flush_input()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Record one input occurrence. Transmitted at the next tick, or right
    /// away under [`InputFlush::Immediate`], and only while running.
    pub fn on_input_event(&mut self, event: InputEvent) -> Result<()> {
        if !self.input.record(event) {
            return Ok(());
        }
        if !self.session.can_send_input() {
            log::debug!("[client] input held, session {}", self.session.state());
            return Ok(());
        }
        if self.config.input_flush == InputFlush::Immediate {
            self.flush_input()?;
        }
        Ok(())
    }

    pub fn send_message(&mut self, text: impl Into<String>) -> Result<()> {
        self.on_input_event(InputEvent::Message(text.into()))
    }

    /// Send pending input now. Returns `true` if a message went out.
    pub fn flush_input(&mut self) -> Result<bool> {
        if !self.session.can_send_input() || !self.input.is_dirty() {
            return Ok(false);
        }
        let snapshot = self.input.flush();
        let payload =
            serde_json::to_value(&snapshot).map_err(|e| TransportError::Send(e.to_string()))?;
        self.send(self.config.dialect.input_event(), payload)?;
        Ok(true)
    }

    /// Record new screen properties and mirror them to the server.
    pub fn set_screen_info(&mut self, info: ScreenInfo) -> Result<()> {
        if self.session.set_screen_info(info)
            && self.session.state().is_connected_family()
            && self.transport.is_open()
        {
            self.send_info()?;
        }
        Ok(())
    }

    /// Emit an arbitrary named message (`playerjoin`, custom game events).
    pub fn trigger(&mut self, event: &str, payload: Value) -> Result<()> {
        if !self.transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }
        self.send(event, payload)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Dispatch an event from the transport. Events from a connection
    /// other than the current one are dropped.
    pub fn handle_inbound(&mut self, inbound: Inbound) {
        if inbound.epoch != self.session.epoch() {
            log::debug!(
                "[client] dropping {:?} from epoch {} (current {})",
                inbound.event,
                inbound.epoch,
                self.session.epoch()
            );
            return;
        }
        self.handle_transport_event(inbound.event);
    }

    /// Dispatch one event of the current connection. Bad messages are
    /// logged and dropped.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { event, data } => match ServerMessage::decode(&event, data) {
                Ok(msg) => {
                    if let Err(e) = self.handle_server_message(msg) {
                        log::warn!("[client] {} not handled: {}", event, e);
                    }
                }
                Err(e) => log::warn!("[client] dropping message: {}", e),
            },
            TransportEvent::Closed(reason) => {
                log::info!(
                    "[client] connection closed{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                self.teardown();
            }
            TransportEvent::Error(e) => self.fail_transport(TransportError::Socket(e)),
        }
    }

    pub fn handle_server_message(&mut self, msg: ServerMessage) -> Result<()> {
        log::trace!("[client] <- {}", msg.name());
        match msg {
            ServerMessage::Connection(info) => self.on_connection(info),
            ServerMessage::ConnectError(reason) => {
                let err = TransportError::ConnectFailed {
                    address: self.session.server_address().to_string(),
                    reason,
                };
                self.fail_transport(err);
                Ok(())
            }
            ServerMessage::Disconnect(reason) => {
                log::info!(
                    "[client] server disconnected us{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                self.teardown();
                Ok(())
            }
            ServerMessage::Error(message) => {
                log::warn!("[client] server error: {}", message);
                let from = self.session.state();
                self.transport.close();
                self.session.fail(message.clone());
                if from != SessionState::Error {
                    self.push(SyncEvent::StateChanged {
                        from,
                        to: SessionState::Error,
                    });
                }
                self.push(SyncEvent::Error(message));
                Ok(())
            }
            ServerMessage::Update(packet) => self.on_server_update(packet).map(|_| ()),
            ServerMessage::AssetUpdate(manifest) => self.request_assets(manifest),
            ServerMessage::ViewUpdate(v) => {
                self.view.view_scale = ViewState::fit_scale(self.session.screen_info(), v.width, v.height);
                self.push(SyncEvent::ViewResized(self.view));
                Ok(())
            }
            ServerMessage::Transition(t) => {
                if self.session.state() != SessionState::Running {
                    log::debug!("[client] transition ignored in {}", self.session.state());
                    return Ok(());
                }
                let deadline = Instant::now() + Duration::from_millis(t.duration);
                self.session.begin_transition(deadline)?;
                self.push(SyncEvent::StateChanged {
                    from: SessionState::Running,
                    to: SessionState::Transitioning,
                });
                Ok(())
            }
            ServerMessage::Headline(text) => {
                self.push(SyncEvent::Headline(text));
                Ok(())
            }
            ServerMessage::Forward(f) => self.forward(&f.address),
            ServerMessage::Attached(id) => {
                self.session.attach(id.clone());
                self.push(SyncEvent::Attached(id));
                Ok(())
            }
            ServerMessage::Message(text) => {
                self.push(SyncEvent::Message(text));
                Ok(())
            }
            ServerMessage::Ping => self.send(events::PONG, Value::Bool(false)),
        }
    }

    /// Reconcile one world packet and render. Dropped unless running.
    pub fn on_server_update(&mut self, packet: FramePacket) -> Result<Option<ReconcileReport>> {
        if !self.session.can_apply_updates() {
            log::debug!("[client] update dropped, session {}", self.session.state());
            return Ok(None);
        }
        let report = self.reconciler.apply(&packet, &self.assets)?;
        self.view.view_x = packet.view_x;
        self.view.view_y = packet.view_y;
        if let Some(scale) = packet.view_scale {
            self.view.view_scale = scale;
        }
        self.sink.render(&RenderFrame {
            actors: self.reconciler.actors(),
            view: self.view,
        });
        Ok(Some(report))
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    /// Load whatever part of `manifest` is not loaded yet.
    ///
    /// Moves to `loadingAssets` (except while paused, where loading happens
    /// in the background) and back to the operating state once everything
    /// is resolved.
    pub fn request_assets(&mut self, manifest: AssetManifest) -> Result<()> {
        let state = self.session.state();
        if !state.is_connected_family() {
            return Err(SessionError::InvalidTransition {
                from: state,
                to: SessionState::LoadingAssets,
            }
            .into());
        }
        if state != SessionState::Paused && state != SessionState::LoadingAssets {
            self.set_state(SessionState::LoadingAssets)?;
        }

        let missing = self.assets.missing(&manifest);
        if missing.is_empty() {
            log::debug!("[client] all {} sheets already loaded", manifest.animation_count());
            return self.finish_loading();
        }

        let request = AssetRequest {
            epoch: self.session.epoch(),
            manifest: missing,
            assets_url: self.config.assets_url.clone(),
        };
        log::info!("[client] loading {} sheets", request.manifest.animation_count());
        match self.loader.load(request) {
            LoadStatus::Ready(catalog) => self.install_assets(catalog),
            LoadStatus::Pending => Ok(()),
        }
    }

    /// Completion of a pending load. Returns `false` if it belonged to an
    /// earlier connection and was discarded.
    pub fn on_assets_ready(&mut self, epoch: u64, catalog: AssetCatalog) -> Result<bool> {
        if epoch != self.session.epoch() || !self.session.state().is_connected_family() {
            log::warn!(
                "[client] discarding asset load for epoch {} (current {}, {})",
                epoch,
                self.session.epoch(),
                self.session.state()
            );
            return Ok(false);
        }
        self.install_assets(catalog)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn on_connection(&mut self, info: ConnectionInfo) -> Result<()> {
        self.session.accept_connection(&info)?;
        log::info!(
            "[client] connected to {} as {}",
            self.session.server_address(),
            info.client_id.as_deref().unwrap_or("?")
        );
        self.push(SyncEvent::StateChanged {
            from: SessionState::Connecting,
            to: SessionState::Connected,
        });
        self.push(SyncEvent::Connected {
            client_id: info.client_id.clone(),
        });
        if let Some(scale) = info.view_scale() {
            self.view.view_scale = scale;
        }
        self.send_info()?;
        if let Some(manifest) = info.bundled_assets() {
            self.request_assets(manifest)?;
        }
        Ok(())
    }

    fn open_connection(&mut self, address: &str) -> Result<()> {
        let from = self.session.state();
        let epoch = self.session.begin_connect(address)?;
        self.push(SyncEvent::StateChanged {
            from,
            to: SessionState::Connecting,
        });
        log::info!("[client] connecting to {} (epoch {})", address, epoch);
        self.reconciler.clear();
        self.input.discard_events();
        let query = screen_query(self.session.screen_info());
        if let Err(e) = self.transport.open(address, &query, epoch) {
            self.fail_transport(e.clone());
            return Err(e.into());
        }
        Ok(())
    }

    fn forward(&mut self, address: &str) -> Result<()> {
        self.set_state(SessionState::Forwarding)?;
        log::info!("[client] forwarded to {}", address);
        self.transport.close();
        self.push(SyncEvent::Forwarded {
            address: address.to_string(),
        });
        self.open_connection(address)
    }

    fn install_assets(&mut self, catalog: AssetCatalog) -> Result<()> {
        let sheets = catalog.len();
        self.assets.merge(catalog);
        self.push(SyncEvent::AssetsLoaded { sheets });
        self.finish_loading()
    }

    /// Events recorded while loading are dropped, as on resume.
    fn finish_loading(&mut self) -> Result<()> {
        if self.session.state() == SessionState::LoadingAssets {
            self.input.discard_events();
            self.set_state(SessionState::Running)?;
        }
        Ok(())
    }

    fn send_info(&mut self) -> Result<()> {
        let info = serde_json::to_value(self.session.screen_info())
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.send(self.config.dialect.info_event(), info)
    }

    fn set_state(&mut self, to: SessionState) -> Result<()> {
        let from = self.session.transition(to)?;
        self.announce(from, to)
    }

    /// Queue the change and report it to the server where the server cares.
    fn announce(&mut self, from: SessionState, to: SessionState) -> Result<()> {
        self.push(SyncEvent::StateChanged { from, to });
        let wire = match to {
            SessionState::LoadingAssets => "loading",
            SessionState::Paused => "paused",
            SessionState::Running => self.config.dialect.operating_state(),
            _ => return Ok(()),
        };
        if self.transport.is_open() {
            self.send(self.config.dialect.state_change_event(), Value::from(wire))?;
        }
        Ok(())
    }

    fn send(&mut self, event: &str, payload: Value) -> Result<()> {
        if let Err(e) = self.transport.emit(event, payload) {
            self.fail_transport(e.clone());
            return Err(SyncError::Transport(e));
        }
        Ok(())
    }

    fn fail_transport(&mut self, err: TransportError) {
        log::warn!("[client] transport failure: {}", err);
        self.push(SyncEvent::Error(err.to_string()));
        self.teardown();
    }

    /// Close the transport, drop actors and fall back to `disconnected`.
    fn teardown(&mut self) {
        self.transport.close();
        self.reconciler.clear();
        let from = self.session.state();
        self.session.drop_connection();
        if from != SessionState::Disconnected {
            self.push(SyncEvent::StateChanged {
                from,
                to: SessionState::Disconnected,
            });
        }
    }

    fn push(&mut self, event: SyncEvent) {
        self.events.push_back(event);
    }
}

/// Connection parameters describing the screen.
fn screen_query(info: &ScreenInfo) -> Vec<(String, String)> {
    let mut q = vec![
        ("screenWidth".to_string(), info.screen_width.to_string()),
        ("screenHeight".to_string(), info.screen_height.to_string()),
        ("pixelRatio".to_string(), info.pixel_ratio.to_string()),
        ("touchDevice".to_string(), info.touch_device.to_string()),
    ];
    if let Some(o) = info.orientation {
        q.push(("orientation".to_string(), o.to_string()));
    }
    q
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ManifestLoader;
    use crate::transport::LocalTransport;
    use serde_json::json;

    fn client() -> SyncClient<LocalTransport> {
        SyncClient::new(
            SyncConfig::default(),
            LocalTransport::new(),
            Box::new(ManifestLoader),
            Box::new(|_: &RenderFrame<'_>| {}),
        )
    }

    fn connected() -> SyncClient<LocalTransport> {
        let mut c = client();
        c.connect("ws://a").unwrap();
        c.handle_transport_event(TransportEvent::message(
            "connection",
            json!({"clientId": "c1"}),
        ));
        c
    }

    #[test]
    fn connect_passes_screen_query() {
        let mut c = client();
        c.connect("ws://a").unwrap();
        assert_eq!(c.state(), SessionState::Connecting);
        assert_eq!(c.transport().address(), Some("ws://a"));
        assert!(c
            .transport()
            .query()
            .contains(&("screenWidth".to_string(), "1280".to_string())));
    }

    #[test]
    fn connection_sends_info_once() {
        let c = connected();
        assert_eq!(c.state(), SessionState::Connected);
        assert_eq!(c.session().client_id(), Some("c1"));
        let info = c.transport().emitted_named("clientInfo");
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].data["screenWidth"], json!(1280));
    }

    #[test]
    fn refused_open_surfaces_error() {
        let mut c = client();
        c.transport_mut().refuse_next_open("down");
        assert!(c.connect("ws://a").is_err());
        assert_eq!(c.state(), SessionState::Disconnected);
        assert!(c
            .drain_events()
            .iter()
            .any(|e| matches!(e, SyncEvent::Error(_))));
    }

    #[test]
    fn ping_gets_pong() {
        let mut c = connected();
        c.handle_transport_event(TransportEvent::message("ping", Value::Null));
        assert_eq!(c.transport().emitted_named("pong").len(), 1);
    }

    #[test]
    fn server_error_is_non_fatal() {
        let mut c = connected();
        c.handle_transport_event(TransportEvent::message("error", json!("room full")));
        assert_eq!(c.state(), SessionState::Error);
        assert_eq!(c.session().last_error(), Some("room full"));
        assert!(c.drain_events().contains(&SyncEvent::Error("room full".into())));
        c.connect("ws://a").unwrap();
        assert_eq!(c.state(), SessionState::Connecting);
    }

    #[test]
    fn malformed_message_is_dropped() {
        let mut c = connected();
        c.handle_transport_event(TransportEvent::message("viewUpdate", json!({"width": "x"})));
        c.handle_transport_event(TransportEvent::message("teleport", Value::Null));
        assert_eq!(c.state(), SessionState::Connected);
    }

    #[test]
    fn view_update_rescales() {
        let mut c = connected();
        c.handle_transport_event(TransportEvent::message(
            "viewUpdate",
            json!({"width": 2560, "height": 1440}),
        ));
        assert!((c.view().view_scale - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn closed_transport_clears_identity() {
        let mut c = connected();
        c.handle_transport_event(TransportEvent::Closed(Some("bye".into())));
        assert_eq!(c.state(), SessionState::Disconnected);
        assert_eq!(c.session().client_id(), None);
        assert!(!c.transport().is_open());
    }

    #[test]
    fn inbound_from_current_epoch_is_dispatched() {
        let mut c = connected();
        let ev = c.transport().inbound(TransportEvent::message("ping", Value::Null));
        assert_eq!(ev.epoch, c.session().epoch());
        c.handle_inbound(ev);
        assert_eq!(c.transport().emitted_named("pong").len(), 1);
    }

    #[test]
    fn input_recorded_while_loading_is_dropped() {
        let mut c = connected();
        c.on_input_event(InputEvent::KeyDown("a".into())).unwrap();
        assert!(c.input().is_dirty());
        c.handle_transport_event(TransportEvent::message(
            "assetUpdate",
            json!({"sprites": {}}),
        ));
        assert_eq!(c.state(), SessionState::Running);
        assert!(!c.flush_input().unwrap());
        assert!(c.input().held_keys().contains("a"));
    }

    #[test]
    fn screen_info_mirrored_when_connected() {
        let mut c = connected();
        c.transport_mut().take_emitted();
        c.set_screen_info(ScreenInfo {
            screen_width: 640,
            ..Default::default()
        })
        .unwrap();
        let info = c.transport().emitted_named("clientInfo");
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].data["screenWidth"], json!(640));
    }
}
