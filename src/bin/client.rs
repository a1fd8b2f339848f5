//! actor-sync-client binary
//!
//! Headless client: connects to a game server over WebSocket, resolves
//! assets from the manifest without downloading images, and logs every
//! rendered frame. Useful for soak-testing servers.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                        | Default   | Description                          |
//! |----------------------------|-----------|--------------------------------------|
//! | `SYNC_DIALECT`             | `node`    | `node` or `room` message names       |
//! | `SYNC_RECONCILE_MODE`      | `auto`    | `auto`, `delta` or `snapshot`        |
//! | `SYNC_EVICTION_THRESHOLD`  | `10`      | Snapshots an actor may be missing    |
//! | `SYNC_SWIPE_TIME_MS`       | `200`     | Max press duration for a swipe       |
//! | `SYNC_SWIPE_DISTANCE`      | `50.0`    | Min travel for a swipe (px)          |
//! | `SYNC_INPUT_FLUSH`         | `per_tick`| `per_tick` or `immediate`            |
//! | `SYNC_ASSETS_URL`          | ``        | Base URL for sprite images           |

use std::time::{Duration, Instant};

use actor_sync::{
    ManifestLoader, RenderFrame, RenderSink, ScreenInfo, SessionState, SyncClient, SyncConfig,
    SyncEvent, WsTransport,
};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "actor-sync-client", about = "Headless actor-sync client", version)]
struct Args {
    /// Server WebSocket address
    #[arg(long, env = "SYNC_SERVER", default_value = "ws://localhost:3000")]
    server: String,

    /// Optional TOML config file
    #[arg(long, env = "SYNC_CONFIG", default_value = "actor-sync.toml")]
    config: String,

    /// Tick rate (Hz) at which coalesced input is sent
    #[arg(long, env = "SYNC_TICK_RATE_HZ", default_value_t = 30.0, value_parser = parse_tick_rate)]
    tick_rate_hz: f64,

    /// Reported screen width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Reported screen height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Send `playerjoin` with this name once running
    #[arg(long, env = "SYNC_PLAYER_NAME")]
    name: Option<String>,

    /// Reconnect after this many seconds instead of exiting on disconnect
    #[arg(long, env = "SYNC_RECONNECT_SECS")]
    reconnect_secs: Option<u64>,
}

const MIN_TICK_RATE_HZ: f64 = 0.01;

/// The ticker period is `1 / hz`, so the rate must be finite and not tiny.
fn parse_tick_rate(s: &str) -> Result<f64, String> {
    let hz: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if hz.is_finite() && hz >= MIN_TICK_RATE_HZ {
        Ok(hz)
    } else {
        Err(format!("tick rate must be at least {} Hz, got {}", MIN_TICK_RATE_HZ, s))
    }
}

fn load_config(path: &str) -> Result<SyncConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("SYNC").try_parsing(true))
        .build()
        .context("reading configuration")?;
    cfg.try_deserialize::<SyncConfig>()
        .context("invalid configuration")
}

// ---------------------------------------------------------------------------
// Render sink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LogSink {
    frames: u64,
}

impl RenderSink for LogSink {
    fn render(&mut self, frame: &RenderFrame<'_>) {
        self.frames += 1;
        log::debug!(
            "frame {}: {} actors, view ({:.1}, {:.1}) x{:.2}",
            self.frames,
            frame.actors.len(),
            frame.view.view_x,
            frame.view.view_y,
            frame.view.view_scale,
        );
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("actor_sync=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    log::info!(
        "Starting actor-sync-client (server='{}', dialect={:?}, mode={:?}, flush={:?})",
        args.server,
        config.dialect,
        config.reconcile_mode,
        config.input_flush,
    );

    let (transport, mut inbound) = WsTransport::channel();
    let mut client = SyncClient::new(
        config,
        transport,
        Box::new(ManifestLoader),
        Box::new(LogSink::default()),
    );
    client.set_screen_info(ScreenInfo {
        screen_width: args.width,
        screen_height: args.height,
        ..Default::default()
    })?;
    client.connect(&args.server)?;

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / args.tick_rate_hz));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut joined = false;

    loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(event) => client.handle_inbound(event),
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(e) = client.tick(Instant::now()) {
                    log::warn!("tick: {}", e);
                }
            }
            _ = &mut shutdown => {
                log::info!("shutting down");
                client.disconnect();
                break;
            }
        }

        for event in client.drain_events() {
            match event {
                SyncEvent::StateChanged { to: SessionState::Running, .. } => {
                    if let (Some(name), false) = (&args.name, joined) {
                        if let Err(e) = client.trigger("playerjoin", json!({ "name": name })) {
                            log::warn!("playerjoin: {}", e);
                        }
                        joined = true;
                    }
                }
                SyncEvent::StateChanged { to: SessionState::Disconnected, .. } => {
                    joined = false;
                    let Some(secs) = args.reconnect_secs else {
                        log::info!("disconnected, exiting");
                        return Ok(());
                    };
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    let address = client.session().server_address().to_string();
                    if let Err(e) = client.connect(&address) {
                        log::warn!("reconnect to {} failed: {}", address, e);
                    }
                }
                SyncEvent::Error(e) => log::warn!("error: {}", e),
                SyncEvent::Headline(text) => log::info!("headline: {}", text),
                SyncEvent::Message(text) => log::info!("message: {}", text),
                other => log::debug!("{:?}", other),
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
