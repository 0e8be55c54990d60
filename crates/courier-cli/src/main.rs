mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{channel::ChannelSubcommand, config::ConfigSubcommand, named_user::NamedUserSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "courier",
    about = "Run push action payloads and keep the named user in sync",
    version,
    propagate_version = true
)]
struct Cli {
    /// Courier root (default: auto-detect from .courier/)
    #[arg(long, global = true, env = "COURIER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .courier/ with a default config
    Init,

    /// Serve the HTTP API
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run an actions payload and wait for the batch to finish
    RunActions {
        /// JSON object mapping action names to values
        payload: String,
        /// How the run was triggered
        #[arg(long, default_value = "manual_invocation")]
        situation: String,
        /// Originating push message (JSON), attached as metadata
        #[arg(long)]
        push_message: Option<String>,
    },

    /// Manage the named user
    NamedUser {
        #[command(subcommand)]
        subcommand: NamedUserSubcommand,
    },

    /// Manage the device channel
    Channel {
        #[command(subcommand)]
        subcommand: ChannelSubcommand,
    },

    /// Inspect and validate the config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::RunActions {
            payload,
            situation,
            push_message,
        } => cmd::run_actions::run(
            &root,
            &payload,
            &situation,
            push_message.as_deref(),
            cli.json,
        ),
        Commands::NamedUser { subcommand } => cmd::named_user::run(&root, subcommand, cli.json),
        Commands::Channel { subcommand } => cmd::channel::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
