//! Actor Sync
//!
//! Client-side network-state synchronization for a server-authoritative
//! 2D game: session lifecycle, batched input upload, and reconciliation of
//! the server's visible-actor set into a local, paint-ordered actor map.
//!
//! ## Architecture
//!
//! ```text
//! SyncClient  (client.rs)           ← orchestration, event queue
//!   ├── Session          (session.rs)    ← lifecycle + gating
//!   ├── InputAggregator  (input.rs)      ← held keys, pointers, discrete events
//!   ├── EntityReconciler (reconciler.rs) ← delta / snapshot → sorted actors
//!   ├── AssetCatalog     (assets.rs)     ← loaded sprite sheets
//!   └── T: Transport     (transport.rs, ws.rs)
//! ```
//!
//! Rendering, image loading and host input capture stay outside the crate
//! behind [`RenderSink`], [`AssetLoader`] and [`InputEvent`].

// Core modules are I/O-free and always available.
pub mod assets;
pub mod client;
pub mod error;
pub mod input;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod transport;
pub mod types;

// WebSocket transport requires the `net` feature.
#[cfg(feature = "net")]
pub mod ws;

pub use assets::{AssetCatalog, AssetLoader, AssetRequest, LoadStatus, ManifestLoader, SpriteSheet};
pub use client::{RenderFrame, RenderSink, SyncClient, SyncEvent};
pub use error::{AssetError, ProtocolError, Result, SessionError, SyncError, TransportError};
pub use input::{InputAggregator, InputEvent, InputSnapshot, Swipe};
pub use protocol::{AssetManifest, EntityDescriptor, FramePacket, ServerMessage, SpriteRef};
pub use reconciler::{Actor, EntityReconciler, ReconcileReport};
pub use session::{Session, SessionState};
pub use transport::{Inbound, LocalTransport, Transport, TransportEvent};
pub use types::{
    EntityId, InputFlush, ProtocolDialect, ReconcileMode, ScreenInfo, SyncConfig, ViewState,
};
#[cfg(feature = "net")]
pub use ws::WsTransport;
