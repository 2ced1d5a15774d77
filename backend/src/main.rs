mod broadcast;
mod collision;
mod config;
mod events;
mod handlers;
mod ingress;
mod kalman;
mod lap;
mod persistence;
mod positioning;
mod race;
mod scoring;
mod tag;
mod track;
mod world;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{watch, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use config::Config;
use handlers::{health_check, time_sync, ws_handler, AppState};
use persistence::{run_lap_sink, LapSink};
use world::{now_secs, SharedWorld, World};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "race_backend=info".into()),
        )
        .init();

    let cfg = Config::from_env();
    info!(
        "🏁 UWB race control backend v{} starting — {}",
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    info!(
        "UDP {} | WS {} | {} anchors, {} tags | {} laps (defaults: wall={}s atk={}s vic={}s)",
        cfg.udp_port,
        cfg.ws_port,
        cfg.anchor_count,
        cfg.tag_count,
        cfg.total_laps,
        cfg.wall_hit_penalty,
        cfg.attacker_penalty,
        cfg.victim_bonus
    );
    match &cfg.lap_api_url {
        Some(url) => info!("lap persistence: {url}"),
        None => info!("lap persistence disabled (LAP_API_URL unset)"),
    }

    // Shared state bundle
    let world: SharedWorld = Arc::new(RwLock::new(World::new(cfg.clone())));

    // Shutdown signal shared by the background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Broadcast fan-out worker
    let (bus, bus_rx) = broadcast::channel();
    tokio::spawn(broadcast::run_broadcast(bus_rx, world.clone()));

    // Lap persistence worker
    let sink = LapSink::new();
    tokio::spawn(run_lap_sink(
        sink.clone(),
        cfg.lap_api_url.clone(),
        shutdown_rx.clone(),
    ));

    // Ingress — a bind failure here is fatal
    let udp = UdpSocket::bind(("0.0.0.0", cfg.udp_port))
        .await
        .with_context(|| format!("could not bind UDP port {}", cfg.udp_port))?;
    tokio::spawn(ingress::run_ingress(
        udp,
        world.clone(),
        bus.clone(),
        sink.clone(),
        shutdown_rx.clone(),
    ));

    // Periodic stats line
    tokio::spawn(run_stats_reporter(world.clone(), shutdown_rx.clone()));

    // CORS: comma-separated origins, or `*` for open deployments
    let cors = if cfg.cors_origins.trim() == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .cors_origins
            .split(',')
            .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app_state = AppState {
        world: world.clone(),
        bus: bus.clone(),
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/sync", get(time_sync))
        .with_state(app_state)
        .layer(cors);

    let addr = format!("0.0.0.0:{}", cfg.ws_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind WebSocket port {}", cfg.ws_port))?;
    info!("🚀 listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx, world.clone()))
    .await
    .context("server error")?;

    Ok(())
}

/// Wait for ctrl-c, log the final leaderboard and flip the shutdown signal.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>, world: SharedWorld) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
    {
        let w = world.read().await;
        let board = w.race.leaderboard();
        if !board.is_empty() {
            info!("final leaderboard:");
            for (i, row) in board.iter().enumerate() {
                info!(
                    "  {}. {:<8} ELP={:.2}s laps={}",
                    i + 1,
                    row.name,
                    row.best_elp,
                    row.laps_done
                );
            }
        }
    }
    let _ = shutdown_tx.send(true);
}

/// One status line per minute: packet counters, clients, active config and
/// the leaderboard head.
async fn run_stats_reporter(world: SharedWorld, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.tick().await; // immediate first tick
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        let w = world.read().await;
        let now = now_secs();
        info!(
            "stats — uptime {:.0}s | UDP {}/{} valid | clients {} | laps={} wall={}s atk={}s vic={}s",
            now - w.stats.start_time,
            w.stats.udp_packets_valid,
            w.stats.udp_packets_total,
            w.stats.ws_clients,
            w.race.config.total_laps,
            w.race.config.wall_hit_penalty,
            w.race.config.attacker_penalty,
            w.race.config.victim_bonus
        );
        for (i, row) in w.race.leaderboard().iter().take(3).enumerate() {
            info!(
                "  {}. {:<8} ELP={:.2}s laps={}",
                i + 1,
                row.name,
                row.best_elp,
                row.laps_done
            );
        }
    }
}
