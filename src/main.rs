//! jsonwire - JSON Wire Protocol command router
//!
//! **Default** (no subcommand) or `jsonwire serve`: runs the HTTP server with
//! the session-state commands this crate implements itself. Browser backends
//! embed the library and register their own handlers.
//!
//! `jsonwire routes` prints the standard route table; `jsonwire status`
//! queries a running server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser as ClapParser, Subcommand};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jsonwire::{
    api,
    client::{ClientError, WireClient},
    command::HandlerTable,
    config::{Config, ConfigError, MatcherKind},
    dispatch::ServerContext,
    resource::TreeError,
    routes::{wire_routes, RouteError},
};

const DEFAULT_LOG_FILTER: &str = "jsonwire=info,tower_http=info";

/// jsonwire - JSON Wire Protocol command router
///
/// Routes WebDriver JSON Wire requests to sessions and command handlers.
#[derive(ClapParser, Debug)]
#[command(name = "jsonwire", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct ServeArgs {
    /// Address to bind the HTTP server (overrides the config file)
    #[arg(long, env = "JSONWIRE_BIND")]
    bind: Option<SocketAddr>,

    /// Path to the TOML config file
    #[arg(long, env = "JSONWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// URL prefix to serve under, e.g. /wd/hub
    #[arg(long, env = "JSONWIRE_URL_BASE")]
    url_base: Option<String>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, env = "JSONWIRE_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Path matcher implementation
    #[arg(long, value_enum, env = "JSONWIRE_MATCHER")]
    matcher: Option<MatcherKind>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server (the default)
    Serve(ServeArgs),

    /// Print the standard JSON Wire route table
    Routes,

    /// Query the status of a running server
    Status {
        /// Base URL of the server, including any URL prefix
        #[arg(long, default_value = "http://127.0.0.1:4444")]
        url: String,
    },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid route table: {0}")]
    Routes(#[from] RouteError),

    #[error("invalid resource tree: {0}")]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => run_server(args).await,
        Some(Commands::Routes) => print_routes(),
        Some(Commands::Status { url }) => {
            init_tracing(None);
            run_status(url).await
        }
        None => run_server(cli.serve).await,
    }
}

fn init_tracing(default_filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| default_filter.unwrap_or(DEFAULT_LOG_FILTER).into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the config file and apply command-line overrides.
fn resolve_config(args: &ServeArgs) -> Result<Config, ConfigError> {
    let mut config = match args.config.as_ref().cloned().or_else(Config::default_path) {
        Some(path) => Config::load_or_default(&path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(url_base) = &args.url_base {
        config.server.url_base = Some(url_base.clone());
    }
    if let Some(max) = args.max_sessions {
        config.sessions.max_sessions = max;
    }
    if let Some(matcher) = args.matcher {
        config.routing.matcher = matcher;
    }
    Ok(config)
}

// ── Server mode ────────────────────────────────────────────────────

async fn run_server(args: ServeArgs) -> Result<(), ServerError> {
    let config = resolve_config(&args)?;
    init_tracing(config.logging.filter.as_deref());
    tracing::info!("jsonwire server starting");

    let context = Arc::new(ServerContext::from_config(
        &config,
        HandlerTable::with_builtins(),
    )?);
    let app = api::router(
        context.clone(),
        api::RouterConfig {
            url_base: config.server.url_base.clone(),
            body_limit: config.server.body_limit_bytes,
        },
    );

    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        url_base = config.server.url_base.as_deref().unwrap_or("/"),
        matcher = ?config.routing.matcher,
        "HTTP server listening"
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl+C");
                on_signal.cancel();
            }
            Err(e) => tracing::warn!(?e, "cannot listen for Ctrl+C"),
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // In-flight requests have drained; close whatever sessions remain.
    context.shutdown().await;
    tracing::info!("jsonwire server exiting");
    Ok(())
}

// ── Client commands ────────────────────────────────────────────────

fn print_routes() -> Result<(), ServerError> {
    let table = wire_routes()?;
    for route in table.routes() {
        println!(
            "{:<7} {:<56} {}",
            route.method.as_str(),
            route.template.as_str(),
            route.command
        );
    }
    Ok(())
}

async fn run_status(url: String) -> Result<(), ServerError> {
    let client = WireClient::new(url)?;
    let status = client.status().await?;
    let pretty = serde_json::to_string_pretty(&status).unwrap_or_else(|_| status.to_string());
    println!("{pretty}");
    Ok(())
}
