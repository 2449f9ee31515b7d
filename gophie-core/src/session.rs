//! The fetch engine.
//!
//! A [`Session`] runs one network operation at a time on a background task
//! and reports back over an `mpsc` channel: any number of
//! [`SessionEvent::Progress`] events followed by exactly one terminal event.
//! The channel closes after the terminal event.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::address::Address;
use crate::error::GopherError;
use crate::item::ItemType;
use crate::page::{detect_binary_type, Charset, Page};
use crate::settings::{SettingsStore, SECTION_NETWORK};
use crate::sink::{FileSink, FileWriter, FsSink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const READ_BUFFER_SIZE: usize = 8 * 1024;
const MAX_PAGE_SIZE: usize = 2 * 1024 * 1024; // 2 MiB
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Covers name resolution and the TCP handshake.
    pub connect_timeout: Duration,
    /// Longest wait for any single read.
    pub read_timeout: Duration,
    pub read_buffer_size: usize,
    /// In-memory fetches larger than this fail. Downloads are not limited.
    pub max_page_size: usize,
    pub charset: Charset,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            read_buffer_size: READ_BUFFER_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            charset: Charset::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &dyn SettingsStore) -> Self {
        SessionConfig {
            connect_timeout: seconds_setting(settings, "CONNECT_TIMEOUT", CONNECT_TIMEOUT),
            read_timeout: seconds_setting(settings, "READ_TIMEOUT", READ_TIMEOUT),
            charset: Charset::from_settings(settings),
            ..SessionConfig::default()
        }
    }
}

fn seconds_setting(settings: &dyn SettingsStore, name: &str, default: Duration) -> Duration {
    let value = settings.setting(name, SECTION_NETWORK, &default.as_secs().to_string());
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            warn!(setting = name, value = %value, "Invalid timeout, using default");
            default
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Cumulative byte count so far.
    Progress { address: Address, bytes: u64 },
    Loaded(Page),
    /// A menu or unknown page was requested but the response looks like
    /// `detected`. The caller should download it instead.
    Mismatch {
        requested: ItemType,
        detected: ItemType,
        address: Address,
    },
    Failed {
        error: GopherError,
        address: Option<Address>,
    },
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::Progress { .. })
    }
}

struct ActiveFetch {
    generation: u64,
    token: CancellationToken,
}

pub struct Session {
    config: SessionConfig,
    sink: Arc<dyn FileSink>,
    active: Arc<Mutex<Option<ActiveFetch>>>,
    generation: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_sink(config, Arc::new(FsSink))
    }

    pub fn with_sink(config: SessionConfig, sink: Arc<dyn FileSink>) -> Self {
        Session {
            config,
            sink,
            active: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn FileSink> {
        &self.sink
    }

    /// Fetches `address` into memory. A menu or unknown request whose bytes
    /// sniff as binary ends in `Mismatch`; everything else ends in `Loaded`
    /// or `Failed`.
    ///
    /// Any operation still running on this session is cancelled first.
    pub fn fetch_async(&self, address: Address, expected: ItemType) -> mpsc::Receiver<SessionEvent> {
        let config = self.config.clone();
        self.spawn(address, move |address, tx| async move {
            fetch(&config, address, expected, &tx).await
        })
    }

    /// Streams `address` into `destination` through the session's file sink.
    /// Success is always `Loaded` with an empty binary page; the content is
    /// not inspected.
    pub fn download_async(&self, address: Address, destination: PathBuf) -> mpsc::Receiver<SessionEvent> {
        let config = self.config.clone();
        let sink = Arc::clone(&self.sink);
        self.spawn(address, move |address, tx| async move {
            download(&config, sink.as_ref(), address, destination, &tx).await
        })
    }

    /// Asks the running operation, if any, to stop. Returns immediately.
    ///
    /// The operation ends with `Failed(UserCancelled)` only if it notices the
    /// request before finishing on its own.
    pub fn cancel_fetch(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(active) = active {
            debug!(generation = active.generation, "Cancelling fetch");
            active.token.cancel();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn spawn<F, Fut>(&self, address: Address, run: F) -> mpsc::Receiver<SessionEvent>
    where
        F: FnOnce(Address, mpsc::Sender<SessionEvent>) -> Fut,
        Fut: std::future::Future<Output = Result<SessionEvent, GopherError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = active.take() {
                debug!(generation = previous.generation, "Cancelling previous fetch");
                previous.token.cancel();
            }
            *active = Some(ActiveFetch {
                generation,
                token: token.clone(),
            });
        }

        let work = run(address.clone(), tx.clone());
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(GopherError::UserCancelled),
                outcome = work => outcome,
            };

            let event = outcome.unwrap_or_else(|error| {
                debug!(address = %address, error = %error, "Fetch failed");
                SessionEvent::Failed {
                    error,
                    address: Some(address),
                }
            });

            {
                let mut active = active.lock().unwrap_or_else(PoisonError::into_inner);
                if active.as_ref().map(|a| a.generation) == Some(generation) {
                    *active = None;
                }
            }

            let _ = tx.send(event).await;
        });

        rx
    }
}

async fn connect(config: &SessionConfig, address: &Address) -> Result<TcpStream, GopherError> {
    if address.host().is_empty() {
        return Err(GopherError::HostUnknown);
    }

    let attempt = async {
        let targets: Vec<_> = lookup_host((address.host(), address.port()))
            .await
            .map_err(|e| {
                debug!(host = address.host(), error = %e, "Name resolution failed");
                GopherError::HostUnknown
            })?
            .collect();

        let mut last_error = GopherError::HostUnknown;
        for target in targets {
            match TcpStream::connect(target).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(addr = %target, error = %e, "Connect attempt failed");
                    last_error = GopherError::from(e);
                }
            }
        }
        Err(last_error)
    };

    let stream = timeout(config.connect_timeout, attempt)
        .await
        .map_err(|_| GopherError::ConnectionTimeout)??;
    debug!(address = %address, "Connected");
    Ok(stream)
}

/// I/O failures once connected are unclassified; only the connect step maps
/// error kinds onto the fetch taxonomy.
fn stream_error(err: io::Error) -> GopherError {
    GopherError::Exception(err.to_string())
}

async fn send_selector(stream: &mut TcpStream, address: &Address) -> Result<(), GopherError> {
    let request = format!("{}\r\n", address.wire_selector());
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(stream_error)
}

/// Reads one chunk, treating a stalled peer as a timeout. Zero means the
/// peer closed the stream.
async fn read_chunk(
    config: &SessionConfig,
    stream: &mut TcpStream,
    buf: &mut [u8],
) -> Result<usize, GopherError> {
    let n = timeout(config.read_timeout, stream.read(buf))
        .await
        .map_err(|_| GopherError::ConnectionTimeout)?
        .map_err(stream_error)?;
    Ok(n)
}

async fn fetch(
    config: &SessionConfig,
    address: Address,
    expected: ItemType,
    tx: &mpsc::Sender<SessionEvent>,
) -> Result<SessionEvent, GopherError> {
    let mut stream = connect(config, &address).await?;
    send_selector(&mut stream, &address).await?;

    let mut bytes = Vec::new();
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    loop {
        let n = read_chunk(config, &mut stream, &mut buf).await?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&buf[..n]);
        if bytes.len() > config.max_page_size {
            return Err(GopherError::Exception(format!(
                "Response exceeds {} bytes",
                config.max_page_size
            )));
        }
        let _ = tx
            .send(SessionEvent::Progress {
                address: address.clone(),
                bytes: bytes.len() as u64,
            })
            .await;
    }
    debug!(address = %address, bytes = bytes.len(), "Fetch complete");

    if matches!(expected, ItemType::Menu | ItemType::Unknown) {
        if let Some(detected) = detect_binary_type(&bytes) {
            debug!(address = %address, detected = detected.name(), "Response is not a menu");
            return Ok(SessionEvent::Mismatch {
                requested: expected,
                detected,
                address,
            });
        }
    }

    Ok(SessionEvent::Loaded(Page::with_charset(
        bytes,
        expected,
        address,
        config.charset,
    )))
}

async fn download(
    config: &SessionConfig,
    sink: &dyn FileSink,
    address: Address,
    destination: PathBuf,
    tx: &mpsc::Sender<SessionEvent>,
) -> Result<SessionEvent, GopherError> {
    let mut stream = connect(config, &address).await?;
    send_selector(&mut stream, &address).await?;

    let mut file: FileWriter = sink.create(&destination).await.map_err(stream_error)?;
    let mut total: u64 = 0;
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    loop {
        let n = read_chunk(config, &mut stream, &mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await.map_err(stream_error)?;
        total += n as u64;
        let _ = tx
            .send(SessionEvent::Progress {
                address: address.clone(),
                bytes: total,
            })
            .await;
    }
    file.shutdown().await.map_err(stream_error)?;
    debug!(address = %address, bytes = total, path = %destination.display(), "Download complete");

    Ok(SessionEvent::Loaded(Page::new(Vec::new(), ItemType::Binary, address)))
}
