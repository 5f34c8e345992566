mod client;
mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{audit::AuditSubcommand, config::ConfigSubcommand, switch::Target};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "killswitch",
    about = "Coordinate versioned kill switches: serve, inspect, toggle and audit",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: nearest killswitch.yaml upward from cwd)
    #[arg(long, global = true, env = "KILLSWITCH_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL for client commands
    #[arg(
        long,
        global = true,
        env = "KILLSWITCH_URL",
        default_value = "http://127.0.0.1:3141"
    )]
    server: String,

    /// Identity proxy token sent as `Authorization: Bearer` (default:
    /// identity.token from the config)
    #[arg(long, global = true, env = "KILLSWITCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Header carrying the principal id (default: identity.header from the
    /// config, else x-principal-id)
    #[arg(long, global = true, env = "KILLSWITCH_PRINCIPAL_HEADER")]
    principal_header: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter killswitch.yaml
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run the HTTP server
    Serve {
        /// Override server.port from the config
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Show one switch (created inactive on first access)
    Get { key: String },

    /// List all switches
    List,

    /// Flip a switch
    Toggle {
        key: String,
        #[arg(long, env = "KILLSWITCH_PRINCIPAL")]
        principal: String,
    },

    /// Drive a switch to a specific state (no-op when already there)
    Set {
        key: String,
        #[arg(value_enum)]
        state: Target,
        #[arg(long, env = "KILLSWITCH_PRINCIPAL")]
        principal: String,
    },

    /// Stream state changes for a switch
    Watch {
        key: String,
        /// Exit after this many events
        #[arg(long)]
        count: Option<usize>,
    },

    /// Operator banner for the default switch
    Status,

    /// Run audit checks and inspect the audit log
    Audit {
        #[command(subcommand)]
        subcommand: AuditSubcommand,
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
        .init();

    let config_path = root::resolve_config(cli.config.as_deref());
    let identity = root::resolve_identity(
        &config_path,
        cli.principal_header.clone(),
        cli.token.clone(),
    );
    let client = client::Client::new(&cli.server, identity);

    let result = match cli.command {
        Commands::Init { force } => cmd::init::run(&config_path, force, cli.json),
        Commands::Serve { port } => cmd::serve::run(&config_path, port),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
        Commands::Get { key } => cmd::switch::get(&client, &key, cli.json),
        Commands::List => cmd::switch::list(&client, cli.json),
        Commands::Toggle { key, principal } => {
            cmd::switch::toggle(&client, &key, &principal, cli.json)
        }
        Commands::Set {
            key,
            state,
            principal,
        } => cmd::switch::set(&client, &key, state, &principal, cli.json),
        Commands::Watch { key, count } => cmd::switch::watch(&client, &key, count, cli.json),
        Commands::Status => cmd::switch::status(&client, cli.json),
        Commands::Audit { subcommand } => cmd::audit::run(&client, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
