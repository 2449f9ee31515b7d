mod cli;
mod config;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use gophie_core::{ItemType, MenuItem, Session, SessionConfig, SettingsStore};

/// Command-line Gopher client.
///
/// Addresses use the format: [gopher://]host[:port][/selector]
///   e.g.  gopher.floodgap.com, sdf.org/1/users, host:7070/0/readme.txt
///
/// A `/<type>/` prefix at the head of the selector names the item type and is
/// never sent to the server.
///
/// Output is auto-JSON when stdout is piped. Force with --json.
#[derive(Parser, Debug)]
#[command(name = "gophie", version)]
struct Args {
    /// Force JSON output (auto-enabled when stdout is piped)
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of ~/.gophie.toml
    #[arg(long, global = true, env = "GOPHIE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a menu or document and print it
    Fetch {
        /// Address to fetch (default: the configured home address)
        address: Option<String>,

        /// Item type code to request (e.g. 1, 0, 7)
        #[arg(long = "type", short = 't')]
        item_type: Option<char>,
    },

    /// Run a full-text search against a search server (type 7)
    Search {
        /// Address of the search item
        address: String,

        /// Search query
        query: String,
    },

    /// Download an item to disk, showing progress on stderr
    Download {
        /// Address of the item to download
        address: String,

        /// Destination file (default: DOWNLOAD_PATH plus the item's file name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Open the file with the default application when done
        #[arg(long)]
        open: bool,

        /// Item type code (default: from the address prefix, else 9)
        #[arg(long = "type", short = 't')]
        item_type: Option<char>,
    },

    /// Fetch an item and save its raw bytes to a file
    Save {
        /// Address of the item to save
        address: String,

        /// File to write
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Tracing to stderr, never pollutes stdout
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let settings = config::load(args.config.as_deref());
    let json = cli::use_json(args.json);

    if let Err(e) = run(args.command, &settings, json).await {
        cli::handle_error(e, json);
    }
}

async fn run(command: Command, settings: &dyn SettingsStore, json: bool) -> Result<()> {
    let session_config = SessionConfig::from_settings(settings);
    debug!(config = ?session_config, "Session configured");
    let session = Session::new(session_config);

    match command {
        Command::Fetch { address, item_type } => {
            let address = cli::resolve_address(address.as_deref(), settings)?;
            let expected = cli::expected_type(&address, item_type, settings, ItemType::Unknown);
            cli::fetch(&session, address, expected, json).await
        }
        Command::Search { address, query } => {
            let address = cli::resolve_address(Some(&address), settings)?;
            cli::search(&session, address, &query, json).await
        }
        Command::Download {
            address,
            output,
            open,
            item_type,
        } => {
            let address = cli::resolve_address(Some(&address), settings)?;
            let itype = cli::expected_type(&address, item_type, settings, ItemType::Binary);
            let item = MenuItem::from_code(itype.to_char(), &address);
            cli::download(session, item, output, config::download_dir(settings), open, json).await
        }
        Command::Save { address, file } => {
            let address = cli::resolve_address(Some(&address), settings)?;
            // Raw bytes: skip menu decoding and content sniffing.
            let expected = cli::expected_type(&address, None, settings, ItemType::Binary);
            let expected = match expected {
                ItemType::Menu | ItemType::Unknown => ItemType::Binary,
                other => other,
            };
            cli::save(&session, address, expected, &file, json).await
        }
    }
}
