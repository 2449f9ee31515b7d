//! Seams to the outside world: where downloaded bytes go and how finished
//! files are handed to the desktop.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait FileSink: Send + Sync {
    /// Create (or truncate) `path` for streaming writes.
    async fn create(&self, path: &Path) -> io::Result<FileWriter>;

    /// Write a whole buffer to `path` in one go.
    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Writes to the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSink;

#[async_trait]
impl FileSink for FsSink {
    async fn create(&self, path: &Path) -> io::Result<FileWriter> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(file))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, bytes).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

pub trait DesktopOpener: Send + Sync {
    /// Open `path` with the operating system's default handler.
    fn open(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl DesktopOpener for SystemOpener {
    fn open(&self, path: &Path) -> io::Result<()> {
        open::that(path)
    }
}
