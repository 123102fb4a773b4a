//! Retrieval of Contents feeds.
//!
//! A feed is opened as a byte stream (HTTP or local file), decompressed on
//! the fly and parsed line by line, so the decompressed document never has to
//! fit in memory.

use std::pin::Pin;

use apt_contents::{AsyncContentsReader, Compression, ContentsEntry};
use futures::{Stream, TryStreamExt};
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::config::{FeedConfig, IngestConfig};
use crate::error::{IndexError, IndexResult};

/// Buffered, decompressed feed contents.
pub type FeedReader = BufReader<Pin<Box<dyn tokio::io::AsyncRead + Send>>>;

/// Stream of parsed entries produced by [`FeedFetcher::entries`].
pub type EntryStream = Pin<Box<dyn Stream<Item = IndexResult<ContentsEntry>> + Send>>;

/// Opens archive feeds and turns them into entry streams.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    max_skip_ratio: f64,
}

impl FeedFetcher {
    /// Create a fetcher from the ingestion configuration.
    pub fn new(config: &IngestConfig) -> IndexResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("debfind/", env!("CARGO_PKG_VERSION")))
            .timeout(config.fetch_timeout())
            .build()?;
        Ok(Self {
            client,
            max_skip_ratio: config.max_skip_ratio,
        })
    }

    /// Open the feed and return its decompressed contents.
    ///
    /// The returned reader is not restartable; a failure while reading it
    /// means the feed has to be fetched again from the start.
    pub async fn open(&self, feed: &FeedConfig) -> IndexResult<FeedReader> {
        let compression = Compression::from_path(feed.url.path());
        debug!("Opening {} ({} compression)", feed.url, compression);

        let raw: Pin<Box<dyn AsyncBufRead + Send>> = match feed.url.scheme() {
            "http" | "https" => {
                let response = self
                    .client
                    .get(feed.url.clone())
                    .send()
                    .await?
                    .error_for_status()?;
                if let Some(length) = response.content_length() {
                    info!("Downloading {} ({} bytes)", feed.url, length);
                }
                let body = response.bytes_stream().map_err(std::io::Error::other);
                Box::pin(StreamReader::new(body))
            }
            "file" => {
                let path = feed.url.to_file_path().map_err(|_| {
                    IndexError::Configuration(format!("Invalid file URL: {}", feed.url))
                })?;
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| IndexError::Fetch(format!("{}: {}", path.display(), e)))?;
                Box::pin(BufReader::new(file))
            }
            scheme => {
                return Err(IndexError::Configuration(format!(
                    "Unsupported feed URL scheme: {}",
                    scheme
                )))
            }
        };

        Ok(BufReader::new(compression.decoder(raw)))
    }

    /// Parse a decompressed feed into a lazy stream of entries.
    ///
    /// The stream ends with an error instead of completing if the feed turns
    /// out to be corrupt or empty.
    pub fn entries<R>(&self, reader: R) -> EntryStream
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let mut reader = AsyncContentsReader::with_max_skip_ratio(reader, self.max_skip_ratio);
        Box::pin(async_stream::try_stream! {
            while let Some(entry) = reader.next_entry().await.map_err(IndexError::from)? {
                yield entry;
            }
            let stats = reader.stats();
            info!("Feed exhausted: {} entries, {} malformed lines skipped", stats.entries, stats.skipped);
        })
    }

    /// Open `feed` and stream its entries.
    pub async fn fetch(&self, feed: &FeedConfig) -> IndexResult<EntryStream> {
        let reader = self.open(feed).await?;
        Ok(self.entries(reader))
    }
}
