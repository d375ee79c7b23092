//! Byte sources that parts are read from

use std::io::{self, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// Random-access source of upload content
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Total length in bytes
    fn size(&self) -> u64;

    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes>;
}

/// Local file, read one part at a time
pub struct FileSource {
    path: PathBuf,
    size: u64,
    file: Mutex<File>,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            path,
            size,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PartSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        check_range(&range, self.size)?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl PartSource for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        check_range(&range, self.len() as u64)?;
        Ok(self.slice(range.start as usize..range.end as usize))
    }
}

fn check_range(range: &Range<u64>, size: u64) -> io::Result<()> {
    if range.start > range.end || range.end > size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {:?} outside source of {} bytes", range, size),
        ));
    }
    Ok(())
}

/// Content type sent with `create`, from the file extension
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
