use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mmr")]
#[command(about = "Marathon-match ledger reconciliation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Dispatch a single broker message (JSON file) against the ledger
    Process {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Path to the message JSON (envelope with topic/originator/timestamp/mime-type/payload)
        #[arg(long = "message-file")]
        message_file: String,
    },

    /// Dispatch messages from a JSONL file in order, one message per line
    Replay {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// JSONL input
        #[arg(long)]
        input: String,

        /// Continue past failed lines instead of stopping at the first one
        #[arg(long, default_value_t = false)]
        keep_going: bool,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply embedded SQL migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mmr_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mmr_db::status(&pool).await?;
                    println!("db_ok={} has_ledger_tables={}", s.ok, s.has_ledger_tables);
                }
                DbCmd::Migrate => {
                    mmr_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mmr_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Process {
            config_paths,
            message_file,
        } => {
            commands::dispatch::process(&config_paths, &message_file).await?;
        }

        Commands::Replay {
            config_paths,
            input,
            keep_going,
        } => {
            commands::dispatch::replay_file(&config_paths, &input, keep_going).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the key=value results.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
