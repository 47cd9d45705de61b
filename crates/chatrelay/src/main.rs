use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatrelay::attachment::HttpFetcher;
use chatrelay::clock::{Clock, SystemClock};
use chatrelay::config::Config;
use chatrelay::conversation::InMemoryConversationStore;
use chatrelay::dispatcher::Dispatcher;
use chatrelay::llm::OpenAICompatibleProvider;
use chatrelay::relay::StreamRelay;
use chatrelay::server::{self, AppState};
use chatrelay::tenant::{self, ConversationMemory, GuildConfigStore, RateLimiter};

#[derive(Parser)]
#[command(name = "chatrelay", version, about = "Streaming chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the enabled chat gateways.
    Serve {
        /// Path to the YAML config file. Defaults apply when it is missing.
        #[arg(short, long, default_value = "chatrelay.yaml")]
        config: PathBuf,

        /// Override `server.port`.
        #[arg(short, long)]
        port: Option<u16>,

        /// Override `server.host`.
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Serve { config, port, host } => serve(config, port, host).await,
    }
}

async fn serve(config_path: PathBuf, port: Option<u16>, host: Option<String>) -> Result<()> {
    let mut config = Config::load(&config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.http_timeout_seconds))
        .build()
        .context("failed to build HTTP client")?;

    let api_key = config.upstream.api_key();
    if api_key.is_none() {
        warn!(
            env = %config.upstream.api_key_env,
            "Upstream API key not set; requests will be sent without authorization"
        );
    }
    let provider = Arc::new(OpenAICompatibleProvider::new(
        http.clone(),
        config.upstream.base_url.clone(),
        api_key,
    ));
    let conversations = Arc::new(InMemoryConversationStore::new(clock.clone()));
    let relay = StreamRelay::new(
        provider,
        conversations,
        clock.clone(),
        config.relay.to_relay_config(),
    );

    let limiter = RateLimiter::in_memory(config.rate_limit.window_seconds);
    let memory = ConversationMemory::in_memory(config.memory.limits());
    let guilds = GuildConfigStore::in_memory(config.guild_defaults.to_settings());
    let dispatcher = Dispatcher::new(
        relay,
        limiter.clone(),
        memory.clone(),
        guilds,
        Arc::new(HttpFetcher::new(http)),
        clock.clone(),
        config.dispatch_policy(),
    );

    let shutdown = CancellationToken::new();
    let sweep = tenant::spawn_sweep_task(
        memory,
        limiter,
        clock,
        config.memory.cleanup_interval(),
        shutdown.clone(),
    );

    start_gateways(&config, &dispatcher, &shutdown);

    let state = AppState::new(
        dispatcher,
        config.server.admin_token.clone(),
        config.server.keep_alive_interval_seconds,
    );
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server host/port")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "Chatrelay listening");

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await
        .context("server failure")?;

    shutdown.cancel();
    let _ = sweep.await;
    info!("Chatrelay stopped");
    Ok(())
}

#[cfg(feature = "gateway-discord")]
fn start_gateways(config: &Config, dispatcher: &Dispatcher, shutdown: &CancellationToken) {
    use chatrelay::gateway::{CHANNEL_CAPACITY, DiscordConfig, DiscordGateway, GatewayRouter};
    use tokio::sync::mpsc;
    use tracing::error;

    if !config.discord.enabled {
        info!("Discord gateway disabled");
        return;
    }
    let Some(token) = config.discord.token() else {
        warn!(
            env = %config.discord.token_env,
            "Discord token not set; Discord gateway not started"
        );
        return;
    };

    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
    GatewayRouter::new(dispatcher.clone(), command_tx).spawn(event_rx, shutdown.clone());

    let gateway = DiscordGateway::new(DiscordConfig { token });
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = gateway.run(event_tx, command_rx) => {
                if let Err(e) = result {
                    error!(error = %e, "Discord gateway exited");
                }
            }
            _ = shutdown.cancelled() => {}
        }
    });
    info!("Discord gateway started");
}

#[cfg(not(feature = "gateway-discord"))]
fn start_gateways(config: &Config, _dispatcher: &Dispatcher, _shutdown: &CancellationToken) {
    if config.discord.enabled {
        warn!("Discord gateway enabled in config but not compiled in");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
