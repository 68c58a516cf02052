//! Chunked multipart HTTP upload.
//!
//! The file goes out as a series of 1 MiB multipart POSTs. Every chunk carries
//! the whole-file MD5, a check flag, its byte offset, the session id and the
//! total size. The first non-success response aborts the upload.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::deliverable::DeliverableFile;
use crate::destination::DestinationIdentity;
use crate::error::{DispatchError, Result};
use crate::transport::Transport;

/// Protocol tag that selects this transport.
pub const PROTOCOL_TAG: &str = "openCentauriCarbon";

/// Bytes per POST.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Port the device's upload endpoint listens on.
pub const UPLOAD_PORT: u16 = 3030;

/// Path of the upload endpoint.
pub const UPLOAD_PATH: &str = "/uploadFile/upload";

/// The device needs time to recover between upload sessions.
pub const CHUNKED_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Uploads files in fixed-size chunks over HTTP multipart.
#[derive(Debug, Clone)]
pub struct ChunkedHttpTransport {
    client: reqwest::Client,
    port: u16,
    chunk_size: usize,
    settle: Duration,
    dry_run: bool,
}

impl Default for ChunkedHttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedHttpTransport {
    /// Transport targeting the standard port.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            port: UPLOAD_PORT,
            chunk_size: CHUNK_SIZE,
            settle: CHUNKED_SETTLE_DELAY,
            dry_run: false,
        }
    }

    /// Override the device port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the chunk size. Zero is raised to one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Override the settle delay.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Log the upload instead of performing it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Upload URL for a device address.
    pub fn upload_url(&self, address: &str) -> String {
        format!("http://{}:{}{}", address, self.port, UPLOAD_PATH)
    }
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl Transport for ChunkedHttpTransport {
    fn kind(&self) -> &'static str {
        "chunked-http"
    }

    fn settle_delay(&self) -> Duration {
        self.settle
    }

    async fn prepare(&self, file: &DeliverableFile) -> Result<()> {
        file.digest().await.map(|_| ())
    }

    async fn transfer(&self, target: &DestinationIdentity, file: &DeliverableFile) -> Result<()> {
        let url = self.upload_url(&target.address);
        let md5 = file.digest().await?.to_string();
        let uuid = file.session_id().to_string();
        let total_size = file.total_size().to_string();
        let file_name = file.file_name();

        tracing::info!(
            "Sending to: {} using {} chunked upload",
            target.address,
            PROTOCOL_TAG
        );

        if self.dry_run {
            tracing::info!("DEBUG send disabled for {}", target.address);
            return Ok(());
        }

        let mut source = tokio::fs::File::open(file.path()).await?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut offset: u64 = 0;

        loop {
            let read = read_chunk(&mut source, &mut buf).await?;
            if read == 0 {
                break;
            }

            let form = Form::new()
                .text("S-File-MD5", md5.clone())
                .text("Check", "1")
                .text("Offset", offset.to_string())
                .text("Uuid", uuid.clone())
                .text("TotalSize", total_size.clone())
                .part(
                    "File",
                    Part::bytes(buf[..read].to_vec()).file_name(file_name.clone()),
                );

            let response = self.client.post(&url).multipart(form).send().await?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if !status.is_success() {
                tracing::warn!(
                    "{} upload failed at offset {}: {} {}",
                    target.address,
                    offset,
                    status,
                    body
                );
                return Err(DispatchError::TransferFailed {
                    address: target.address.clone(),
                    reason: format!("HTTP {} at offset {}", status, offset),
                });
            }

            offset += read as u64;
        }

        tracing::info!("File sent to {}", target.address);
        Ok(())
    }
}
