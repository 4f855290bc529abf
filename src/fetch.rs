use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;

use crate::payload::{Payload, PayloadKind};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("payload is not valid text: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),
    #[error("fetch failed: {0}")]
    Other(String),
}

/// Called with the cumulative byte count after every received chunk.
pub type ChunkCallback<'a> = &'a mut (dyn FnMut(u64) + Send);

/// Seam between the download manager and the network. Production code uses
/// [`HttpFetcher`]; tests script responses in memory.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        kind: PayloadKind,
        on_chunk: ChunkCallback<'a>,
    ) -> BoxFuture<'a, Result<Payload, FetchError>>;
}

impl<F: Fetcher + ?Sized> Fetcher for std::sync::Arc<F> {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        kind: PayloadKind,
        on_chunk: ChunkCallback<'a>,
    ) -> BoxFuture<'a, Result<Payload, FetchError>> {
        (**self).fetch(url, kind, on_chunk)
    }
}

/// Streams a URL into memory with incremental progress reporting. The whole
/// body is buffered before the caller sees it, so a failed transfer never
/// yields a partial payload.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        kind: PayloadKind,
        on_chunk: ChunkCallback<'a>,
    ) -> BoxFuture<'a, Result<Payload, FetchError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(url)
                .timeout(self.timeout)
                .send()
                .await?
                .error_for_status()?;

            let mut body: Vec<u8> = Vec::new();
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let bytes = chunk?;
                body.extend_from_slice(&bytes);
                on_chunk(body.len() as u64);
            }

            match kind {
                PayloadKind::Binary => Ok(Payload::Binary(body)),
                PayloadKind::Text => Ok(Payload::Text(String::from_utf8(body)?)),
            }
        })
    }
}
