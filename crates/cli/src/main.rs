use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    toolcase_gateway::{GatewayState, run_server},
    toolcase_mcp::{Backend, McpBridge, print_config, run_stdio},
};

#[derive(Parser)]
#[command(name = "toolcase", about = "Sandboxed OS-action toolbox")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default when no subcommand is provided).
    Serve {
        /// Address to bind to (overrides config value).
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides config value).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the MCP stdio bridge against a gateway.
    Bridge {
        /// Gateway base URL (overrides config and TOOLCASE_BASE_URL).
        #[arg(long)]
        base_url: Option<String>,
        /// Print validated connection settings as JSON and exit.
        #[arg(long, default_value_t = false)]
        print_config: bool,
    },
    /// Print the effective configuration as JSON.
    PrintConfig,
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
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = toolcase_config::discover_and_load();

    match cli.command {
        None => serve(&config, None, None).await,
        Some(Commands::Serve { bind, port }) => serve(&config, bind, port).await,
        Some(Commands::Bridge {
            base_url,
            print_config: print_only,
        }) => {
            let base_url = base_url.unwrap_or_else(|| config.bridge.base_url.clone());
            let backend = match Backend::new(
                &base_url,
                Duration::from_secs(config.bridge.backend_timeout_s),
            ) {
                Ok(backend) => backend,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(2);
                },
            };

            if print_only {
                let settings = print_config(&backend).await;
                println!("{}", serde_json::to_string_pretty(&settings)?);
                return Ok(());
            }

            let mut bridge = McpBridge::new(backend, config.bridge.tools_cache_ttl_s);
            let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
            let mut writer = tokio::io::stdout();
            run_stdio(&mut bridge, &mut reader, &mut writer).await?;
            Ok(())
        },
        Some(Commands::PrintConfig) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

async fn serve(
    config: &toolcase_config::ToolcaseConfig,
    bind: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.gateway.bind.clone());
    let port = port.unwrap_or(config.gateway.port);
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind}:{port}"))?;

    let state = Arc::new(GatewayState::from_config(config)?);
    info!(version = env!("CARGO_PKG_VERSION"), "toolcase starting");
    run_server(state, addr).await
}
