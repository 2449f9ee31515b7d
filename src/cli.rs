use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::debug;

use gophie_core::format::format_size;
use gophie_core::{
    Address, FsSink, GopherError, ItemType, MenuItem, Page, QueueEvent, Session, SessionEvent,
    SettingsStore, Transfer, TransferQueue, TransferStatus,
};

use crate::config;

/// Determine whether output should be JSON.
/// JSON is used when: --json flag is set, OR stdout is not a terminal (piped).
pub fn use_json(flag: bool) -> bool {
    flag || !io::stdout().is_terminal()
}

fn type_indicator(itype: ItemType) -> &'static str {
    match itype {
        ItemType::Menu => "[+]",
        ItemType::TextFile => "[T]",
        ItemType::Search => "[?]",
        ItemType::Html => "[H]",
        ItemType::Gif | ItemType::Image => "[I]",
        ItemType::Info => "   ",
        t if t.is_binary() => "[B]",
        _ => "[.]",
    }
}

fn print_items(items: &[MenuItem], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
    } else {
        for item in items {
            if item.item_type() == ItemType::Info {
                println!("      {}", item.display);
            } else {
                println!(
                    "{} {:<40} {}",
                    type_indicator(item.item_type()),
                    item.display,
                    item.url()
                );
            }
        }
    }
    Ok(())
}

/// Print a structured error and exit with code 1.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let msg = format!("{:#}", err);
        eprintln!("{}", json!({ "error": msg }));
    } else {
        eprintln!("error: {:#}", err);
    }
    std::process::exit(1);
}

/// Parses `input`, falling back to the configured home address.
pub fn resolve_address(input: Option<&str>, settings: &dyn SettingsStore) -> Result<Address> {
    let text = match input {
        Some(text) => text.to_string(),
        None => config::home_address(settings),
    };
    Address::parse(&text).with_context(|| format!("Invalid address {:?}", text))
}

/// Type requested for `address`: an explicit code wins, then the address's
/// type prefix (if enabled), then `fallback`.
pub fn expected_type(
    address: &Address,
    code: Option<char>,
    settings: &dyn SettingsStore,
    fallback: ItemType,
) -> ItemType {
    code.or_else(|| {
        if config::selector_prefix_enabled(settings) {
            address.type_prefix()
        } else {
            None
        }
    })
    .map(ItemType::from)
    .unwrap_or(fallback)
}

fn failure(error: GopherError, address: Option<&Address>) -> anyhow::Error {
    match error.user_message(address) {
        Some(message) => anyhow!(message),
        None => anyhow!(error),
    }
}

/// Drives one session operation to its terminal event. Ctrl-C cancels it.
async fn finish(session: &Session, mut events: mpsc::Receiver<SessionEvent>) -> Result<SessionEvent> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Progress { bytes, .. }) => debug!(bytes, "Progress"),
                Some(SessionEvent::Failed { error, address }) => {
                    return Err(failure(error, address.as_ref()));
                }
                Some(terminal) => return Ok(terminal),
                None => bail!("Fetch ended without a result"),
            },
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                session.cancel_fetch();
            }
        }
    }
}

async fn load_page(session: &Session, address: Address, expected: ItemType) -> Result<Page> {
    match finish(session, session.fetch_async(address, expected)).await? {
        SessionEvent::Loaded(page) => Ok(page),
        SessionEvent::Mismatch {
            requested,
            detected,
            address,
        } => bail!(
            "{} is a {}, not a {}; try `gophie download {}`",
            address.to_uri(),
            detected.name(),
            requested.name(),
            address
        ),
        other => bail!("Unexpected session event: {:?}", other),
    }
}

#[derive(Serialize)]
struct PageOutput {
    address: String,
    #[serde(rename = "type")]
    item_type: &'static str,
    mime: &'static str,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base64: Option<String>,
}

fn print_page(page: &Page, json: bool) -> Result<()> {
    let itype = page.content_type();
    if itype == ItemType::Menu {
        return print_items(page.items(), json);
    }

    let renderable = !itype.is_binary() && !matches!(itype, ItemType::Gif | ItemType::Image);
    if json {
        let out = PageOutput {
            address: page.address().to_uri(),
            item_type: itype.name(),
            mime: itype.mime(),
            size: page.len(),
            content: renderable.then(|| page.text_content()),
            base64: (!renderable).then(|| page.base64()),
        };
        println!("{}", serde_json::to_string(&out)?);
    } else if renderable {
        let text = page.text_content();
        print!("{}", text);
        // Ensure trailing newline for clean shell output
        if !text.ends_with('\n') {
            println!();
        }
    } else {
        bail!(
            "{} is a {} ({}); use `gophie save` to write it to a file",
            page.address(),
            itype.name(),
            format_size(page.len() as u64)
        );
    }
    Ok(())
}

pub async fn fetch(session: &Session, address: Address, expected: ItemType, json: bool) -> Result<()> {
    let page = load_page(session, address, expected).await?;
    print_page(&page, json)
}

pub async fn search(session: &Session, address: Address, query: &str, json: bool) -> Result<()> {
    let page = load_page(session, address.with_query(query), ItemType::Menu).await?;
    print_items(page.items(), json)
}

pub async fn save(
    session: &Session,
    address: Address,
    expected: ItemType,
    file: &Path,
    json: bool,
) -> Result<()> {
    let page = load_page(session, address, expected).await?;
    page.save_as(file, &FsSink)
        .await
        .with_context(|| format!("Failed to write {}", file.display()))?;

    if json {
        println!(
            "{}",
            json!({ "ok": true, "address": page.address().to_uri(), "path": file, "size": page.len() })
        );
    } else {
        println!("Saved {} ({})", file.display(), format_size(page.len() as u64));
    }
    Ok(())
}

pub async fn download(
    session: Session,
    item: MenuItem,
    output: Option<PathBuf>,
    download_dir: PathBuf,
    open: bool,
    json: bool,
) -> Result<()> {
    let destination = output.unwrap_or_else(|| download_dir.join(item.file_name_with_forced_ext()));
    let show_progress = !json && io::stderr().is_terminal();

    let queue = TransferQueue::new();
    let mut events = queue.subscribe();
    let transfer = queue.add(Transfer::with_session(item, &destination, session).open_when_done(open));
    transfer.start()?;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    let snapshot = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(QueueEvent::ProgressReported(_)) | Err(RecvError::Lagged(_)) => {
                    let snapshot = transfer.snapshot();
                    if snapshot.status != TransferStatus::Active {
                        break snapshot;
                    }
                    if show_progress {
                        eprint!("\r{}   ", snapshot.status_text());
                    }
                }
                Ok(QueueEvent::Updated) => {}
                Err(RecvError::Closed) => break transfer.wait().await,
            },
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                transfer.cancel();
            }
        }
    };
    if show_progress {
        eprintln!();
    }

    if snapshot.status == TransferStatus::Failed {
        let address = snapshot.item.address();
        // A cancelled download leaves a partial file behind.
        let _ = transfer.delete_file().await;
        return Err(match snapshot.error {
            Some(error) => failure(error, address.as_ref()),
            None => anyhow!("Download failed"),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!(
            "Saved {} ({})",
            snapshot.destination.display(),
            format_size(snapshot.bytes_loaded)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gophie_core::settings::SECTION_NAVIGATION;
    use gophie_core::MemorySettings;

    #[test]
    fn expected_type_precedence() {
        let settings = MemorySettings::new();
        let address = Address::parse("host/0/readme").unwrap();

        assert_eq!(expected_type(&address, Some('9'), &settings, ItemType::Unknown), ItemType::Binary);
        assert_eq!(expected_type(&address, None, &settings, ItemType::Unknown), ItemType::TextFile);

        let plain = Address::parse("host/readme").unwrap();
        assert_eq!(expected_type(&plain, None, &settings, ItemType::Unknown), ItemType::Unknown);

        let disabled = MemorySettings::new().with("SELECTOR_PREFIX_ENABLED", "no", SECTION_NAVIGATION);
        assert_eq!(expected_type(&address, None, &disabled, ItemType::Menu), ItemType::Menu);
    }

    #[test]
    fn address_falls_back_to_home() {
        let settings = MemorySettings::new().with("GOPHERHOME", "sdf.org:7070", SECTION_NAVIGATION);
        let address = resolve_address(None, &settings).unwrap();
        assert_eq!(address.host(), "sdf.org");
        assert_eq!(address.port(), 7070);

        assert!(resolve_address(Some("host:nope"), &settings).is_err());
    }

    #[test]
    fn indicators() {
        assert_eq!(type_indicator(ItemType::Menu), "[+]");
        assert_eq!(type_indicator(ItemType::Sound), "[B]");
        assert_eq!(type_indicator(ItemType::Telnet), "[.]");
    }
}
