use clap::{Parser, Subcommand};
use tracing::{error, info};

use basisbot::app::App;
use basisbot::config::Config;
use basisbot::core::KeyStore;

#[derive(Parser)]
#[command(name = "basisbot", about = "Cross-venue take-and-hedge engine")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live engine.
    Run,
    /// Validate the configuration and exit.
    CheckConfig,
    /// Provision the key store: create the directory and/or a key pair.
    Keygen {
        /// Optional tag for the new key pair; defaults to its public key.
        #[arg(long)]
        tag: Option<String>,
        /// Create the key store directory first.
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    config.init_logging();

    match cli.command {
        Command::Run => {
            info!(config = %cli.config, "basisbot starting");
            if let Err(e) = App::run(config).await {
                error!(error = %e, "Fatal error");
                std::process::exit(if e.is_fatal() { 1 } else { 2 });
            }
            info!("basisbot stopped");
        }
        Command::CheckConfig => {
            // Load already validated; reaching here means it parsed.
            println!(
                "config ok: {} pairs, {} currencies",
                config.pairs.len(),
                config.currencies.len()
            );
        }
        Command::Keygen { tag, init } => {
            let key_store = KeyStore::new(config.key_store.path.clone());
            let result = (|| {
                if init {
                    key_store.create_directory()?;
                }
                key_store.verify_directory()?;
                key_store.create_keypair(tag.as_deref())
            })();
            match result {
                Ok(tag) => {
                    let pubkey = key_store.pubkey(&tag).expect("key just created");
                    println!("created key pair {} ({})", tag, pubkey);
                }
                Err(e) => {
                    eprintln!("keygen failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
