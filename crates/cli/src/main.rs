mod config_commands;
mod datasources;
mod live_commands;

use std::{path::Path, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    dashlive_client::{ConnectOptions, WsTransport},
    dashlive_config::DashliveConfig,
    dashlive_live::{DataSourceScope, GrafanaScope, LiveScopes, LiveService, PluginScope},
    secrecy::Secret,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "dashlive", about = "dashlive: live channels for dashboards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of searching the standard locations.
    #[arg(long, global = true, env = "DASHLIVE_CONFIG")]
    config: Option<std::path::PathBuf>,
    /// Live endpoint URL (overrides config value).
    #[arg(long, global = true)]
    url: Option<String>,
    /// Bearer token (overrides config value).
    #[arg(long, global = true)]
    token: Option<String>,
    /// Seconds to wait for a channel to connect.
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a channel's events as JSON lines.
    Watch {
        /// Channel id, e.g. `grafana/testdata/random-2s-stream`.
        channel: String,
        /// Stop after this many data messages.
        #[arg(short, long)]
        count: Option<usize>,
    },
    /// Publish a JSON payload to a channel.
    Publish {
        channel: String,
        /// JSON payload.
        data: String,
    },
    /// Show who is subscribed to a channel.
    Presence { channel: String },
    /// List the namespaces of a scope (`ds`, `plugin`, `grafana`), or of all scopes.
    Namespaces { scope: Option<String> },
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

    // Logs go to stderr so stdout stays machine-readable.
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

/// Config from `path` (or the standard locations), then env, then flags.
pub(crate) fn load_effective_config(
    path: Option<&Path>,
    url: Option<&str>,
    token: Option<&str>,
) -> anyhow::Result<DashliveConfig> {
    let mut config = match path {
        Some(path) => {
            let mut config = dashlive_config::load_config(path)?;
            dashlive_config::apply_env_overrides(&mut config);
            config
        },
        None => dashlive_config::discover_and_load(),
    };
    if let Some(url) = url {
        config.server.url = url.to_string();
    }
    if let Some(token) = token {
        config.auth.token = Some(Secret::new(token.to_string()));
    }
    Ok(config)
}

/// Wire the transport and the built-in scope resolvers into a service.
fn build_service(config: &DashliveConfig) -> (LiveService, WsTransport) {
    let transport = WsTransport::new(ConnectOptions::from_config(config));
    let scopes = LiveScopes::new()
        .with(Arc::new(GrafanaScope::new()))
        .with(Arc::new(PluginScope::new()))
        .with(Arc::new(DataSourceScope::new(Arc::new(
            datasources::ConfiguredDataSources::new(&config.datasources),
        ))));
    let service = LiveService::new(Arc::new(transport.clone()), scopes, &config.channels);
    (service, transport)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "dashlive starting");

    if let Commands::Config { action } = cli.command {
        return config_commands::handle_config(action, cli.config.as_deref());
    }

    let config = load_effective_config(
        cli.config.as_deref(),
        cli.url.as_deref(),
        cli.token.as_deref(),
    )
    .context("failed to load config")?;
    let timeout = Duration::from_secs(cli.timeout);
    let (service, transport) = build_service(&config);

    let result = match cli.command {
        Commands::Watch { channel, count } => {
            live_commands::watch(&service, &channel, count).await
        },
        Commands::Publish { channel, data } => {
            live_commands::publish(&service, &channel, &data, timeout).await
        },
        Commands::Presence { channel } => {
            live_commands::presence(&service, &channel, timeout).await
        },
        Commands::Namespaces { scope } => {
            live_commands::namespaces(&service, scope.as_deref()).await
        },
        Commands::Config { .. } => Ok(()),
    };

    service.shutdown().await;
    transport.close();
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashlive.toml");
        std::fs::write(
            &path,
            "[server]\nurl = \"ws://file:3000/api/live/ws\"\n\n[auth]\ntoken = \"from-file\"\n",
        )
        .unwrap();

        let config = load_effective_config(Some(&path), None, None).unwrap();
        assert_eq!(config.auth.token(), Some("from-file"));

        let config =
            load_effective_config(Some(&path), Some("wss://flag/api/live/ws"), Some("from-flag"))
                .unwrap();
        assert_eq!(config.server.url, "wss://flag/api/live/ws");
        assert_eq!(
            config.auth.token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("from-flag")
        );
    }

    #[test]
    fn cli_parses_watch_with_count() {
        let cli = Cli::try_parse_from([
            "dashlive",
            "--url",
            "ws://localhost:3000/api/live/ws",
            "watch",
            "grafana/testdata/random-2s-stream",
            "--count",
            "3",
        ])
        .unwrap();
        let Commands::Watch { channel, count } = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(channel, "grafana/testdata/random-2s-stream");
        assert_eq!(count, Some(3));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_effective_config(Some(Path::new("/nonexistent/dashlive.toml")), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
