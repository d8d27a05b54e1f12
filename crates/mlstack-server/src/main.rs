//! mlstack store server

use anyhow::Context;
use clap::Parser;
use mlstack_config::{DEFAULT_CONFIG_FILE, load_stack_config};
use mlstack_server::{AppState, routes};
use mlstack_stack::ActiveStore;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mlstack-server")]
#[command(about = "Serve the active stack's store over REST", long_about = None)]
struct Args {
    /// Stack configuration file
    #[arg(long, env = "MLSTACK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Address to listen on
    #[arg(long, env = "MLSTACK_SERVER_ADDR", default_value = "0.0.0.0:8237")]
    bind: SocketAddr,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = load_stack_config(&args.config)
        .with_context(|| format!("Failed to load stack configuration: {}", args.config))?;
    let store = ActiveStore::from_config(&config)
        .await
        .context("Failed to open the active store")?
        .into_shared();
    if store.flavor() == "rest" {
        warn!("the active store is itself a REST store; requests will be forwarded");
    }
    info!(flavor = store.flavor(), "store opened");

    let app = routes::router(AppState::new(store)).layer(
        ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        ),
    );

    info!("Starting server on {}", args.bind);
    let listener = TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
