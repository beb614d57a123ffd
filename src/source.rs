use std::future::Future;
use std::io;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + Send + 'a>>;

/// Positioned reads of the artifact being uploaded.
///
/// Every read names its own offset, so concurrent workers never share a
/// cursor. A read past the end returns fewer bytes than requested.
pub trait RangedReader: Send + Sync {
    fn size(&self) -> u64;

    fn read_range(&self, offset: u64, len: u64) -> ReadFuture<'_>;
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        Ok(FileSource {
            path: path.to_owned(),
            size: metadata.len(),
        })
    }

    async fn read_at(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let mut f = fs::File::open(&self.path).await?;
        f.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity(len.min(self.size) as usize);
        f.take(len).read_to_end(&mut buffer).await?;

        Ok(buffer)
    }
}

impl RangedReader for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, len: u64) -> ReadFuture<'_> {
        Box::pin(self.read_at(offset, len))
    }
}

#[cfg(test)]
impl RangedReader for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_range(&self, offset: u64, len: u64) -> ReadFuture<'_> {
        let start = (offset as usize).min(self.len());
        let end = start.saturating_add(len as usize).min(self.len());
        let bytes = self[start..end].to_vec();
        Box::pin(async move { Ok(bytes) })
    }
}

/// Base64 MD5 of a part body, as sent in a `Content-MD5` header.
pub fn content_md5(bytes: &[u8]) -> String {
    let hash: [u8; 16] = md5::compute(bytes).into();
    base64::encode(hash)
}
