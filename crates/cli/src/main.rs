mod auth_commands;
mod bike_commands;
mod context;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::context::AppContext;

#[derive(Parser)]
#[command(name = "ebike-flow", about = "Bosch eBike Flow command-line client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML, YAML or JSON). Defaults to the user config directory.
    #[arg(long, global = true, env = "EBIKE_FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Account whose tokens are used.
    #[arg(long, global = true, env = "EBIKE_FLOW_ACCOUNT")]
    account: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authentication management.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// List the bikes registered on the account.
    Bikes {
        #[arg(long)]
        json: bool,
    },
    /// Fetch and print the current state of a bike.
    Status {
        #[arg(long)]
        bike: Option<String>,
        /// Skip the live state-of-charge request.
        #[arg(long)]
        no_live: bool,
        #[arg(long)]
        json: bool,
    },
    /// Poll a bike on an interval and print every update.
    Watch {
        #[arg(long)]
        bike: Option<String>,
        /// Poll interval in seconds, overriding the config.
        #[arg(long, value_parser = clap::value_parser!(u64).range(30..))]
        interval: Option<u64>,
    },
    /// List recorded rides.
    Activities {
        #[arg(long)]
        bike: Option<String>,
        /// Fetch every page instead of only the most recent rides.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
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

    debug!(version = env!("CARGO_PKG_VERSION"), "ebike-flow starting");
    let ctx = AppContext::load(cli.config, cli.account)?;

    match cli.command {
        Commands::Auth { action } => auth_commands::handle_auth(&ctx, action).await,
        Commands::Bikes { json } => bike_commands::list_bikes(&ctx, json).await,
        Commands::Status {
            bike,
            no_live,
            json,
        } => bike_commands::show_status(&ctx, bike, no_live, json).await,
        Commands::Watch { bike, interval } => bike_commands::watch(&ctx, bike, interval).await,
        Commands::Activities { bike, all, json } => {
            bike_commands::activities(&ctx, bike, all, json).await
        },
    }
}
