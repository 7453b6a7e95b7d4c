//! Member collector CLI - main entry point

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use member_collector::commands::{self, CollectArgs};
use member_collector::export::ExportFormat;
use member_collector::{metrics, Config, Method};
use tracing::warn;

#[derive(Parser)]
#[command(name = "member_collector")]
#[command(about = "Telegram member collector and subscription bot", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Path to config.yml (defaults to ./config.yml or ../config.yml)
    #[arg(long, env = "COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect members of a channel or group and export them
    Collect {
        /// @name, t.me/name, or an invite link t.me/+hash
        channel: String,

        /// Invite link to join through when the name is private
        #[arg(long)]
        invite: Option<String>,

        /// Comma separated: participants,messages,comments,reactions or all
        #[arg(short, long, default_value = "all")]
        methods: String,

        /// Maximum members to return
        #[arg(short, long, default_value = "1000")]
        limit: usize,

        /// Output format: txt | csv | json | all
        #[arg(short, long, default_value = "txt")]
        format: String,

        /// Output directory (defaults to <data_dir>/exports)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Ignore and do not update the result cache
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },

    /// Create a new Telegram session (interactive)
    InitSession,

    /// Revoke the Telegram session and delete the session file
    Logout,

    /// Run the subscription bot
    Bot,

    /// List subscription plans
    Plans,

    /// Activate a plan for a user
    Grant {
        user_id: i64,
        plan: String,
    },

    /// Show a user's subscription and job stats
    Status {
        user_id: i64,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Collect { .. } => "collect",
            Commands::InitSession => "init_session",
            Commands::Logout => "logout",
            Commands::Bot => "bot",
            Commands::Plans => "plans",
            Commands::Grant { .. } => "grant",
            Commands::Status { .. } => "status",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("member_collector=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from_file(path)?,
        None => Config::new(),
    };

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(config, cli.command).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

async fn execute_command(config: Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Collect {
            channel,
            invite,
            methods,
            limit,
            format,
            output_dir,
            no_cache,
        } => {
            let args = CollectArgs {
                channel,
                invite,
                methods: Method::parse_list(&methods)?,
                limit,
                format: format.parse::<ExportFormat>()?,
                output_dir,
                use_cache: !no_cache,
            };
            commands::collect::run(&config, args).await?;
        }
        Commands::InitSession => {
            commands::init_session::run(&config).await?;
        }
        Commands::Logout => {
            commands::logout::run(&config).await?;
        }
        Commands::Bot => {
            commands::bot::run(config).await?;
        }
        Commands::Plans => {
            commands::admin::plans();
        }
        Commands::Grant { user_id, plan } => {
            commands::admin::grant(&config, user_id, &plan)?;
        }
        Commands::Status { user_id } => {
            commands::admin::status(&config, user_id)?;
        }
    }

    Ok(())
}
