mod command_agent;
mod config_commands;
mod console;
mod route_commands;
mod sessions_commands;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    anyhow::bail,
    async_trait::async_trait,
    clap::{Parser, Subcommand},
    courier_channels::{ConnectorEvent, ConnectorEventSink, TransportRegistry},
    courier_config::CourierConfig,
    courier_gateway::{ConnectorService, StopReason},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::{
    command_agent::CommandAgent,
    config_commands::ConfigAction,
    console::ConsoleTransport,
    route_commands::RouteArgs,
    sessions_commands::SessionsAction,
};

#[derive(Parser)]
#[command(
    name = "courier",
    about = "Courier: connect messaging channels to agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./courier.toml, then the user config dir).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable format.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with an agent on this terminal through the full connector runtime.
    Run {
        /// Shell command that produces the agent's reply.
        #[arg(long, env = "COURIER_AGENT_COMMAND")]
        agent_command: String,
        /// Seconds before an agent command is abandoned.
        #[arg(long, default_value_t = 300)]
        agent_timeout: u64,
    },
    /// Inspect or reset stored sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Show which agent and session a message would be routed to.
    Route(RouteArgs),
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Stdout belongs to the console channel.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CourierConfig> {
    match path {
        Some(path) => Ok(courier_config::load_config(path)?),
        None => Ok(courier_config::discover_and_load()),
    }
}

/// Prints connector status changes for the operator.
struct StatusSink;

#[async_trait]
impl ConnectorEventSink for StatusSink {
    async fn emit(&self, event: ConnectorEvent) {
        match &event {
            ConnectorEvent::LoggedOut { .. } | ConnectorEvent::GaveUp { .. } => {
                warn!(event = ?event, "connector stopped");
            },
            _ => info!(event = ?event, "connector status"),
        }
        eprintln!("{}", event.status_line());
    }
}

async fn run(
    mut config: CourierConfig,
    agent_command: String,
    agent_timeout: Duration,
) -> anyhow::Result<()> {
    if !config.channels.0.contains_key(console::CHANNEL) {
        config.channels.0.insert(
            console::CHANNEL.to_string(),
            [("default".to_string(), serde_json::json!({}))].into(),
        );
    }
    let config = Arc::new(config);

    #[cfg(feature = "metrics")]
    let metrics = courier_metrics::init_metrics(courier_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: Vec::new(),
    })?;

    let eof = CancellationToken::new();
    let mut registry = TransportRegistry::new();
    registry.register(Arc::new(ConsoleTransport::stdio(eof.clone())));

    let agent = Arc::new(CommandAgent::new(
        agent_command,
        agent_timeout,
        Arc::clone(&config),
    ));
    let mut service = ConnectorService::new(config, registry, agent, Arc::new(StatusSink))?;
    let started = service.start()?;
    info!(connectors = started, "courier running; type a message, Ctrl-D to quit");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                break;
            },
            () = eof.cancelled() => {
                info!("input closed, shutting down");
                break;
            },
            _ = poll.tick() => {
                if service.running() == 0 {
                    break;
                }
            },
        }
    }

    let exits = service.shutdown().await;

    #[cfg(feature = "metrics")]
    {
        let snapshot = metrics.render();
        if !snapshot.is_empty() {
            eprintln!("{snapshot}");
        }
    }

    let failed: Vec<String> = exits
        .iter()
        .filter(|e| !matches!(e.reason, Some(StopReason::Cancelled)))
        .map(|e| format!("{}/{}: {:?}", e.channel, e.account_id, e.reason))
        .collect();
    if !failed.is_empty() {
        bail!("connectors stopped: {}", failed.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    let config_path = cli.config.clone();
    match cli.command {
        Commands::Run {
            agent_command,
            agent_timeout,
        } => {
            run(
                load_config(config_path.as_deref())?,
                agent_command,
                Duration::from_secs(agent_timeout),
            )
            .await
        },
        Commands::Sessions { action } => {
            let config = Arc::new(load_config(config_path.as_deref())?);
            sessions_commands::handle_sessions(action, config).await
        },
        Commands::Route(args) => {
            route_commands::handle_route(&args, &load_config(config_path.as_deref())?)
        },
        Commands::Config { action } => {
            let path = config_path.or_else(courier_config::find_config_file);
            config_commands::handle_config(action, path.as_deref())
        },
    }
}
