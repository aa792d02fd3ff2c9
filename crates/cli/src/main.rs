mod config_commands;
mod server_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    toolgate_config::ToolgateConfig,
    toolgate_gateway::{AppState, McpHost},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "toolgate", about = "toolgate: MCP tools for chat, behind intent confirmation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: discover toolgate.{toml,json}).
    #[arg(long, global = true, env = "TOOLGATE_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Directory for the server registry and token store.
    #[arg(long, global = true, env = "TOOLGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the OAuth HTTP surface, /health, /metrics and the background
    /// maintenance tasks (default when no subcommand is provided).
    Serve,
    /// Print the intent detected in a message as JSON.
    Detect {
        message: String,
        /// Match against this user's servers.
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// MCP server registry.
    Servers {
        #[command(subcommand)]
        action: server_commands::ServerAction,
    },
    /// Discover and print a server's tools.
    Tools {
        server_id: String,
        /// Bypass the tool cache.
        #[arg(long)]
        refresh: bool,
    },
    /// Probe a server once and print the result.
    Health { server_id: String },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
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

/// Load the config and apply the command-line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<ToolgateConfig> {
    let mut config = toolgate_config::load(cli.config.as_deref())?;
    if let Some(bind) = &cli.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }
    Ok(config)
}

async fn serve(config: ToolgateConfig) -> anyhow::Result<()> {
    let host = Arc::new(McpHost::from_config(&config)?);
    let state = AppState::new(host);

    #[cfg(feature = "metrics")]
    let state = {
        let handle = toolgate_metrics::init_metrics(toolgate_metrics::MetricsRecorderConfig {
            enabled: true,
            global_labels: vec![("service".into(), "toolgate".into())],
        })?;
        state.with_metrics(handle)
    };

    toolgate_gateway::start_server(config, state).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "toolgate starting");

    let command = cli.command.take().unwrap_or(Commands::Serve);
    if let Commands::Config { action } = command {
        return config_commands::handle_config(action, cli.config.as_deref());
    }

    let config = load_config(&cli)?;
    match command {
        Commands::Serve => serve(config).await,
        Commands::Detect { message, user } => {
            let host = McpHost::from_config(&config)?;
            server_commands::handle_detect(&host, &user, &message)
        },
        Commands::Servers { action } => {
            let host = McpHost::from_config(&config)?;
            server_commands::handle_servers(&host, action)
        },
        Commands::Tools { server_id, refresh } => {
            let host = McpHost::from_config(&config)?;
            let result = server_commands::handle_tools(&host, &server_id, refresh).await;
            host.shutdown().await;
            result
        },
        Commands::Health { server_id } => {
            let host = McpHost::from_config(&config)?;
            let result = server_commands::handle_health(&host, &server_id).await;
            host.shutdown().await;
            result
        },
        Commands::Config { .. } => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_apply_on_top_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolgate.toml");
        std::fs::write(&path, "[server]\nport = 9000\nbind = \"0.0.0.0\"\n").unwrap();

        let cli = Cli::parse_from([
            "toolgate",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
            "--data-dir",
            "/tmp/toolgate-test",
            "serve",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(
            config.storage.data_dir.as_deref(),
            Some(std::path::Path::new("/tmp/toolgate-test"))
        );
    }

    #[test]
    fn detect_takes_a_user() {
        let cli = Cli::parse_from(["toolgate", "detect", "send an email", "--user", "u7"]);
        match cli.command {
            Some(Commands::Detect { message, user }) => {
                assert_eq!(message, "send an email");
                assert_eq!(user, "u7");
            },
            _ => panic!("expected detect"),
        }
    }
}
