//! CueLink - Device pairing and token exchange for browser extensions
//!
//! Lets the CueLink extension borrow a signed-in dashboard session through a
//! short pairing code and exchange it for a durable device token of its own.

use anyhow::Result;
use clap::Parser;
use cuelink_auth::{JwtSessionVerifier, PairingService, PairingStore, TokenService, TokenStore};
use cuelink_core::Config;
use cuelink_server::{
    create_router, rustls_config_from_files, rustls_config_self_signed, AppState,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// CueLink - Pair browser extensions with dashboard accounts
#[derive(Parser, Debug)]
#[command(name = "cuelink")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8443")]
    port: u16,

    /// Directory holding the pairing and token stores
    /// (default: the platform config directory under "cuelink")
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Secret the dashboard signs session tokens with
    /// Falls back to the CUELINK_SESSION_SECRET environment variable
    #[arg(long)]
    session_secret: Option<String>,

    /// How long a pairing code stays valid, in seconds
    #[arg(long, default_value = "300")]
    pairing_window: u64,

    /// How long an issued device token stays valid, in seconds
    #[arg(long, default_value = "86400")]
    token_ttl: u64,

    /// Device registrations allowed per client per minute
    #[arg(long, default_value = "10")]
    register_rate_limit: u32,

    /// Seconds between expired-record sweeps
    #[arg(long, default_value = "600")]
    sweep_interval: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable HTTPS (only sensible behind a TLS-terminating proxy)
    #[arg(long)]
    no_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    cert: Option<String>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; hyper is kept at info to avoid per-request spam
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.into())
                .add_directive("hyper=info".parse().unwrap()),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("CueLink v{}", env!("CARGO_PKG_VERSION"));

    // Without the dashboard's signing secret no link request could ever be
    // verified, so refuse to start rather than run a server nobody can pair
    // against
    let session_secret = args
        .session_secret
        .or_else(|| std::env::var("CUELINK_SESSION_SECRET").ok())
        .filter(|secret| !secret.is_empty());
    let Some(session_secret) = session_secret else {
        anyhow::bail!(
            "no session secret configured; pass --session-secret or set CUELINK_SESSION_SECRET"
        );
    };

    // Create configuration
    let config = Config::new()
        .with_port(args.port)
        .with_pairing_window_secs(args.pairing_window)
        .with_token_ttl_secs(args.token_ttl)
        .with_register_rate_limit(args.register_rate_limit)
        .with_sweep_interval_secs(args.sweep_interval);

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine a config directory"))?
            .join("cuelink"),
    };
    std::fs::create_dir_all(&data_dir)?;

    // Initialize persistent stores
    info!("Initializing stores in {}...", data_dir.display());
    let pairings = Arc::new(
        PairingStore::with_path(data_dir.join("pairings.json"))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open pairing store: {}", e))?,
    );
    let tokens = Arc::new(
        TokenStore::with_path(data_dir.join("tokens.json"))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open token store: {}", e))?,
    );
    info!(
        "Loaded {} device token(s), {} open pairing code(s)",
        tokens.count().await,
        pairings.count().await
    );

    let pairing = PairingService::new(
        pairings,
        tokens.clone(),
        config.pairing_window(),
        config.token_ttl(),
    );
    let token_service = TokenService::new(tokens, config.token_ttl());
    let verifier = Arc::new(JwtSessionVerifier::new(&session_secret));

    // Get local IP address for display
    let local_ip = get_local_ip().unwrap_or_else(|| "localhost".to_string());

    // Setup TLS from files, or fall back to a fresh self-signed certificate
    let use_tls = !args.no_tls;
    let tls_config = if use_tls {
        let tls = match (&args.cert, &args.key) {
            (Some(cert_path), Some(key_path)) => {
                info!("Loading TLS certificate from files...");
                rustls_config_from_files(Path::new(cert_path), Path::new(key_path))
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to load TLS certificate: {}", e))?
            }
            _ => {
                let hostnames = vec![local_ip.clone(), "localhost".to_string()];
                rustls_config_self_signed(&hostnames)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to generate TLS certificate: {}", e))?
            }
        };
        Some(tls)
    } else {
        warn!("TLS: DISABLED (--no-tls flag set)");
        None
    };

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        pairing.clone(),
        token_service.clone(),
        verifier,
    ));
    let router = create_router(state);

    // Sweep expired pairing codes and tokens in the background; the first
    // tick fires immediately and clears anything left over from a restart
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs.max(1));
    let sweep_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match pairing.sweep_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Swept {} expired pairing code(s)", n),
                Err(e) => warn!("Pairing sweep failed: {}", e),
            }
            match token_service.sweep_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Swept {} expired device token(s)", n),
                Err(e) => warn!("Token sweep failed: {}", e),
            }
        }
    });

    let protocol = if use_tls { "https" } else { "http" };
    let server_url = format!("{}://{}:{}", protocol, local_ip, config.port);

    info!("Starting server on port {}...", config.port);
    info!("");
    info!("  Pairing API: {}", server_url);
    info!("  Stores: {}", data_dir.display());
    if use_tls && args.cert.is_none() {
        info!("");
        info!("  NOTE: The dashboard must trust the self-signed certificate.");
    }
    info!("");
    info!("Press Ctrl+C to stop.");
    info!("");

    // Run server with graceful shutdown; peer addresses feed the register
    // rate limiter
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    if let Some(tls_config) = tls_config {
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();

        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let shutdown = async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        };

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
    }

    // Cleanup
    sweep_handle.abort();

    info!("Goodbye!");
    Ok(())
}

/// Get the local IP address
fn get_local_ip() -> Option<String> {
    use std::net::UdpSocket;

    // Connecting a UDP socket sends nothing but reveals which local address
    // routes outward
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip().to_string())
}
