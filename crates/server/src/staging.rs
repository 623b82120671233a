//! Session-scoped local spool for the inbound stream.
//!
//! When enabled, the request body is written to a temporary file before any
//! block is staged, and blocks are then cut from that file. The file lives
//! exactly as long as the [`SpoolFile`] value: dropping it removes the file
//! unless `retain` is configured.

use crate::error::{UploadError, UploadResult};
use cask_core::config::StagingConfig;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const SPOOL_BUFFER_SIZE: usize = 64 * 1024;

fn spool_error(e: io::Error) -> UploadError {
    UploadError::Internal(format!("spool file error: {e}"))
}

/// A temporary on-disk copy of one upload's source stream.
#[derive(Debug)]
pub struct SpoolFile {
    file: Option<NamedTempFile>,
    path: PathBuf,
    retain: bool,
}

impl SpoolFile {
    /// Create an empty spool file in the configured directory.
    pub async fn create(config: &StagingConfig) -> io::Result<Self> {
        let dir = config.dir();
        tokio::fs::create_dir_all(&dir).await?;
        let file = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix("cask-spool-")
                .suffix(".part")
                .tempfile_in(&dir)
        })
        .await
        .map_err(|e| io::Error::other(format!("spool task failed: {e}")))??;
        let path = file.path().to_path_buf();

        Ok(Self {
            file: Some(file),
            path,
            retain: config.retain,
        })
    }

    /// Where the spool file lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self) -> io::Result<&NamedTempFile> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::other("spool file already released"))
    }

    /// Copy `reader` to the spool file and flush it to disk.
    ///
    /// Returns the number of bytes written. A failure reading `reader` is
    /// reported as a source read error; a failure writing the spool is
    /// internal.
    pub async fn fill<R>(&mut self, reader: &mut R) -> UploadResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let std_file = self
            .handle()
            .and_then(|f| f.as_file().try_clone())
            .map_err(spool_error)?;
        let mut out = tokio::fs::File::from_std(std_file);

        let mut buf = vec![0u8; SPOOL_BUFFER_SIZE];
        let mut written = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(|source| {
                UploadError::Read(cask_core::Error::Read {
                    offset: written,
                    source,
                })
            })?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await.map_err(spool_error)?;
            written += n as u64;
        }

        out.flush().await.map_err(spool_error)?;
        out.sync_all().await.map_err(spool_error)?;
        tracing::debug!(path = %self.path.display(), bytes = written, "Source spooled");
        Ok(written)
    }

    /// Open an independent reader positioned at the start of the file.
    pub fn reader(&self) -> io::Result<tokio::fs::File> {
        let std_file = self.handle()?.reopen()?;
        Ok(tokio::fs::File::from_std(std_file))
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        if self.retain {
            match file.keep() {
                Ok((_, path)) => {
                    tracing::info!(path = %path.display(), "Retained spool file");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to retain spool file"
                    );
                }
            }
            return;
        }

        if let Err(e) = file.close() {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove spool file"
            );
        }
    }
}
