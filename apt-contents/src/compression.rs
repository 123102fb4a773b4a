//! Compression support for Contents indices.

/// Supported compression formats for Contents indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    Gzip,
    /// Bzip2 compression.
    Bzip2,
}

impl Compression {
    /// Get the file extension for this compression format.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
        }
    }

    /// Guess the compression format from a file name or URL path.
    pub fn from_path(path: &str) -> Self {
        Self::all()
            .iter()
            .copied()
            .filter(|c| *c != Compression::None)
            .find(|c| path.ends_with(c.extension()))
            .unwrap_or(Compression::None)
    }

    /// Wrap a buffered reader in a streaming decompressor.
    #[cfg(feature = "async")]
    pub fn decoder<R>(self, reader: R) -> std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>
    where
        R: tokio::io::AsyncBufRead + Send + 'static,
    {
        use async_compression::tokio::bufread::{BzDecoder, GzipDecoder};

        match self {
            Compression::None => Box::pin(reader),
            Compression::Gzip => {
                let mut decoder = GzipDecoder::new(reader);
                decoder.multiple_members(true);
                Box::pin(decoder)
            }
            Compression::Bzip2 => {
                let mut decoder = BzDecoder::new(reader);
                decoder.multiple_members(true);
                Box::pin(decoder)
            }
        }
    }

    /// Get all supported compression formats.
    pub fn all() -> &'static [Compression] {
        &[Compression::None, Compression::Gzip, Compression::Bzip2]
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(
            Compression::from_path("dists/xenial/Contents-amd64.gz"),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_path("/srv/mirror/Contents-i386.bz2"),
            Compression::Bzip2
        );
        assert_eq!(Compression::from_path("Contents-arm64"), Compression::None);
        assert_eq!(Compression::from_path("Contents.gz.sig"), Compression::None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Compression::Gzip.to_string(), "gzip");
        assert_eq!(Compression::None.extension(), "");
    }
}
