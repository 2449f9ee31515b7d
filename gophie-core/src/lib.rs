pub mod address;
pub mod error;
pub mod format;
pub mod item;
pub mod page;
pub mod queue;
pub mod session;
pub mod settings;
pub mod sink;
pub mod transfer;

pub use address::{Address, DEFAULT_PORT};
pub use error::{AddressError, GopherError, MenuLineError, TransferError};
pub use item::{ItemType, MenuItem};
pub use page::{detect_binary_type, Charset, Page};
pub use queue::{QueueEvent, TransferQueue};
pub use session::{Session, SessionConfig, SessionEvent};
pub use settings::{MemorySettings, SettingsStore};
pub use sink::{DesktopOpener, FileSink, FsSink, SystemOpener};
pub use transfer::{Transfer, TransferId, TransferSnapshot, TransferStatus};
