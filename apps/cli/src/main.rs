//! Keygate CLI - admin tool for secret-key gated downloads
//!
//! Creates resources, hands out download URLs, and resets counters in the
//! same database the server reads.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use keygate_core::KeygateError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keygate - secret-key gated downloads
#[derive(Parser)]
#[command(name = "keygate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for Keygate
    #[arg(long, env = "KEYGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new gated resource
    Create {
        /// Title shown in messages
        #[arg(short, long)]
        title: Option<String>,

        /// Secret key (generated when omitted)
        #[arg(short, long)]
        key: Option<String>,

        /// Maximum number of downloads
        #[arg(short, long, default_value_t = 1)]
        limit: u32,

        /// File to serve
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Filename presented to clients
        #[arg(long)]
        file_name: Option<String>,

        /// Create the resource disabled
        #[arg(long)]
        inactive: bool,
    },

    /// List resources
    List {
        /// Show all details
        #[arg(short, long)]
        all: bool,
    },

    /// Show a resource with its usage and download URL
    Info {
        /// Resource ID
        id: i64,
    },

    /// Change the title or filename of a resource
    Update {
        /// Resource ID
        id: i64,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(long)]
        file_name: Option<String>,
    },

    /// Set the secret key
    SetKey {
        /// Resource ID
        id: i64,

        /// New secret key
        key: String,
    },

    /// Replace the secret key with a random one
    RotateKey {
        /// Resource ID
        id: i64,
    },

    /// Set the download limit
    SetLimit {
        /// Resource ID
        id: i64,

        /// New limit (at least 1)
        limit: u32,
    },

    /// Attach a file to a resource, or detach it
    SetFile {
        /// Resource ID
        id: i64,

        /// File to serve
        #[arg(required_unless_present = "clear")]
        path: Option<PathBuf>,

        /// Detach the current file
        #[arg(long, conflicts_with = "path")]
        clear: bool,
    },

    /// Enable a resource
    Enable {
        /// Resource ID
        id: i64,
    },

    /// Disable a resource; its URL stops working
    Disable {
        /// Resource ID
        id: i64,
    },

    /// Reset the counter and/or the list of clients that downloaded
    Reset {
        /// Resource ID
        id: i64,

        /// Reset the download counter to 0
        #[arg(long)]
        counter: bool,

        /// Clear the downloaded-by list
        #[arg(long)]
        clients: bool,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List clients that already downloaded a resource
    Clients {
        /// Resource ID
        id: i64,
    },

    /// Print the download URL of a resource
    Url {
        /// Resource ID
        id: i64,
    },

    /// Delete a resource
    Delete {
        /// Resource ID
        id: i64,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print a random secret key
    GenerateKey,

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<KeygateError>() {
                Some(err) if err.is_client_error() => {
                    eprintln!("{} {}", style("✗").red().bold(), err)
                }
                _ => eprintln!("{} {:#}", style("Error:").red().bold(), e),
            }
            ExitCode::from(exit_status(&e))
        }
    }
}

/// 2 for bad ids or arguments, 1 for everything else
fn exit_status(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<KeygateError>() {
        Some(err) if err.is_client_error() => 2,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<()> {

    if cli.verbose {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(EnvFilter::new("keygate_core=debug"))
            .init();
    }

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "keygate", &mut std::io::stdout());
        return Ok(());
    }
    if let Commands::GenerateKey = cli.command {
        println!("{}", keygate_core::generate_secret_key());
        return Ok(());
    }

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("keygate"))
            .unwrap_or_else(|| PathBuf::from(".keygate"))
    });

    let core = keygate_core::KeygateCore::new(data_dir).await?;

    match cli.command {
        Commands::Create {
            title,
            key,
            limit,
            file,
            file_name,
            inactive,
        } => {
            let options = keygate_types::ResourceOptions {
                title,
                secret_key: key,
                download_limit: Some(limit),
                file_path: file,
                file_name,
                active: Some(!inactive),
            };
            commands::create_resource(&core, options, cli.output).await?
        }

        Commands::List { all } => commands::list_resources(&core, all, cli.output).await?,

        Commands::Info { id } => commands::show_info(&core, id, cli.output).await?,

        Commands::Update {
            id,
            title,
            file_name,
        } => commands::update_resource(&core, id, title, file_name, cli.output).await?,

        Commands::SetKey { id, key } => commands::set_key(&core, id, &key, cli.output).await?,

        Commands::RotateKey { id } => commands::rotate_key(&core, id, cli.output).await?,

        Commands::SetLimit { id, limit } => {
            commands::set_limit(&core, id, limit, cli.output).await?
        }

        Commands::SetFile { id, path, clear } => {
            let path = if clear { None } else { path };
            commands::set_file(&core, id, path, cli.output).await?
        }

        Commands::Enable { id } => commands::set_active(&core, id, true, cli.output).await?,

        Commands::Disable { id } => commands::set_active(&core, id, false, cli.output).await?,

        Commands::Reset {
            id,
            counter,
            clients,
            yes,
        } => commands::reset(&core, id, counter, clients, yes, cli.output).await?,

        Commands::Clients { id } => commands::list_clients(&core, id, cli.output).await?,

        Commands::Url { id } => commands::show_url(&core, id, cli.output).await?,

        Commands::Delete { id, yes } => {
            commands::delete_resource(&core, id, yes, cli.output).await?
        }

        Commands::Config { action } => commands::config_action(&core, action, cli.output).await?,

        Commands::GenerateKey | Commands::Completions { .. } => {}
    }

    Ok(())
}
