//! Binary entrypoint for the PixelPet admin CLI.
//!
//! Commands:
//! - `init` - create a starter `pixelpet.toml` and seed the data directory
//! - `genkey <username> <pet>` - derive an unlock key for a key-gated pet
//! - `transfer <from> <to> <seconds>` - debit the sender and issue a token
//! - `redeem <to> <from> <token>` - verify, redeem, and credit a token
//! - `export <username> [-o <file>]` - encrypted backup of one account
//! - `import <file>` - restore an account from an encrypted backup
//! - `show <username>` - inspect a stored record
//!
//! See the library crate docs for module-level details: `pixelpet::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

use pixelpet::backup;
use pixelpet::config::Config;
use pixelpet::license;
use pixelpet::store::Store;
use pixelpet::tracker::format_hms;

#[derive(Parser)]
#[command(name = "pixelpet")]
#[command(about = "Durable user-state core for a desktop pixel pet companion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "pixelpet.toml", global = true)]
    config: PathBuf,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config file and seed the data directory
    Init,
    /// Derive the unlock key for a user/pet pair (administrator use)
    Genkey {
        /// Target account name
        username: String,
        /// Catalog name of the key-gated pet, e.g. "Gold Dragon"
        pet: String,
    },
    /// Debit the sender and issue a signed transfer token
    Transfer {
        from: String,
        to: String,
        /// Run time to move, in seconds
        seconds: u64,
    },
    /// Verify a transfer token, redeem it, and credit the recipient
    Redeem {
        to: String,
        from: String,
        token: String,
    },
    /// Export one account as an encrypted backup string
    Export {
        username: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import an account from an encrypted backup file
    Import { file: PathBuf },
    /// Print a stored record
    Show { username: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init => {
            if cli.config.exists() {
                return Err(anyhow!("{} already exists", cli.config.display()));
            }
            Config::write_starter(&cli.config)?;
            let config = Config::load(&cli.config)?;
            // Opening the store seeds users.json and both catalogs.
            let store = Store::open(config.store_config())?;
            store.stop()?;
            println!(
                "Initialized {} and data directory {}",
                cli.config.display(),
                config.storage.data_dir.display()
            );
        }
        Commands::Genkey { username, pet } => {
            let key = license::generate_unlock_key(&username, &pet);
            println!("User: {}", username);
            println!("Pet:  {}", pet);
            println!("Key:  {}", key);
        }
        Commands::Transfer { from, to, seconds } => {
            let store = open_store(&cli.config)?;
            store.debit_run_time(&from, seconds)?;
            let token = license::generate_transfer_key(&from, &to, seconds);
            store.stop()?;
            info!("issued transfer of {} from {} to {}", seconds, from, to);
            println!("{}", token);
        }
        Commands::Redeem { to, from, token } => {
            let store = open_store(&cli.config)?;
            let grant = license::verify_transfer_key(&to, &from, &token)?;
            // Mark before crediting; the mark is the single-use gate.
            store.redeem_transfer_key(&to, &grant.raw)?;
            store.credit_run_time(&to, grant.seconds)?;
            store.stop()?;
            println!("Credited {} to {}", format_hms(grant.seconds), to);
        }
        Commands::Export { username, output } => {
            let store = open_store(&cli.config)?;
            let record = store
                .get_user(&username)
                .ok_or_else(|| anyhow!("unknown user: {}", username))?;
            let artifact = backup::export_backup(&username, &record)?;
            store.stop()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &artifact)?;
                    println!("Exported {} to {}", username, path.display());
                }
                None => println!("{}", artifact),
            }
        }
        Commands::Import { file } => {
            let content = std::fs::read_to_string(&file)?;
            let payload = backup::import_backup(&content)?;
            let store = open_store(&cli.config)?;
            store.upsert_user(&payload.username, payload.record)?;
            store.stop()?;
            println!("Restored account {}", payload.username);
        }
        Commands::Show { username } => {
            let store = open_store(&cli.config)?;
            let record = store
                .get_user(&username)
                .ok_or_else(|| anyhow!("unknown user: {}", username))?;
            store.stop()?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}

fn open_store(config_path: &Path) -> Result<Store> {
    let config = Config::load_or_default(config_path)?;
    Ok(Store::open(config.store_config())?)
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}
