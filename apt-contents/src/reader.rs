//! Streaming async reader for Contents indices.

use std::collections::VecDeque;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::contents::{parse_line, ContentsEntry, ContentsLine, ContentsStats};
use crate::{ContentsError, Result, DEFAULT_MAX_SKIP_RATIO, HEADER_SCAN_LINES};

/// Reads [`ContentsEntry`] values one line at a time from a decompressed index.
///
/// Only the current line (and, before the first entry is returned, a short
/// window of leading lines) is held in memory.
pub struct AsyncContentsReader<R> {
    reader: R,
    buf: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    scanned_preamble: bool,
    finished: bool,
    max_skip_ratio: f64,
    stats: ContentsStats,
}

impl<R: AsyncBufRead + Unpin> AsyncContentsReader<R> {
    /// Create a reader using [`DEFAULT_MAX_SKIP_RATIO`].
    pub fn new(reader: R) -> Self {
        Self::with_max_skip_ratio(reader, DEFAULT_MAX_SKIP_RATIO)
    }

    /// Create a reader that fails once more than `max_skip_ratio` of the
    /// lines turn out to be malformed.
    pub fn with_max_skip_ratio(reader: R, max_skip_ratio: f64) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            pending: VecDeque::new(),
            scanned_preamble: false,
            finished: false,
            max_skip_ratio,
            stats: ContentsStats::default(),
        }
    }

    /// Counters for the lines read so far.
    pub fn stats(&self) -> ContentsStats {
        self.stats
    }

    /// Return the next entry, or `None` once the index is exhausted.
    ///
    /// Malformed lines are counted and skipped. Reaching the end of the index
    /// with too many malformed lines, or with no entries at all, is an error.
    pub async fn next_entry(&mut self) -> Result<Option<ContentsEntry>> {
        if self.finished {
            return Ok(None);
        }
        if !self.scanned_preamble {
            self.scan_preamble().await?;
        }

        loop {
            let line = match self.pending.pop_front() {
                Some(line) => line,
                None => {
                    if !self.read_raw_line().await? {
                        return self.finish().map(|()| None);
                    }
                    std::mem::take(&mut self.buf)
                }
            };

            match classify(&line) {
                ContentsLine::Entry(entry) => {
                    self.stats.entries += 1;
                    return Ok(Some(entry));
                }
                ContentsLine::Blank => {}
                ContentsLine::Header | ContentsLine::Malformed => self.stats.skipped += 1,
            }
        }
    }

    /// Buffer the first lines of the index and drop everything up to and
    /// including a `FILE LOCATION` header if one shows up.
    async fn scan_preamble(&mut self) -> Result<()> {
        self.scanned_preamble = true;
        while self.pending.len() < HEADER_SCAN_LINES {
            if !self.read_raw_line().await? {
                break;
            }
            let line = std::mem::take(&mut self.buf);
            if classify(&line) == ContentsLine::Header {
                self.pending.clear();
                return Ok(());
            }
            self.pending.push_back(line);
        }
        Ok(())
    }

    async fn read_raw_line(&mut self) -> Result<bool> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        Ok(n > 0)
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if self.stats.entries == 0 {
            return Err(ContentsError::EmptyFeed);
        }
        if self.stats.skip_ratio() > self.max_skip_ratio {
            return Err(ContentsError::CorruptFeed {
                skipped: self.stats.skipped,
                total: self.stats.total(),
            });
        }
        Ok(())
    }
}

fn classify(line: &[u8]) -> ContentsLine {
    match std::str::from_utf8(line) {
        Ok(line) => parse_line(line),
        Err(_) => ContentsLine::Malformed,
    }
}
