//! # APT Contents Library
//!
//! A Rust library for reading the `Contents-<arch>` indices published by APT
//! archives. Each line of such an index maps a file path to the packages
//! that ship it:
//!
//! ```text
//! usr/bin/dpkg                                admin/dpkg
//! usr/share/doc/libfoo/README                 libs/libfoo1,universe/libdevel/libfoo-dev
//! ```
//!
//! ## Features
//!
//! - Line classification with area/section qualifiers stripped from package names
//! - Support for gzip, bzip2 and uncompressed indices
//! - Streaming async reader that never holds the decompressed document in memory
//! - Malformed line accounting with a configurable corruption threshold
//!
//! ## Example
//!
//! ```rust
//! use apt_contents::{parse_line, ContentsLine};
//!
//! match parse_line("usr/bin/dpkg   admin/dpkg") {
//!     ContentsLine::Entry(entry) => {
//!         assert_eq!(entry.path, "/usr/bin/dpkg");
//!         assert_eq!(entry.packages, vec!["dpkg".to_string()]);
//!     }
//!     other => panic!("unexpected line: {:?}", other),
//! }
//! ```

pub mod compression;
pub mod contents;
pub mod error;

#[cfg(feature = "async")]
pub mod reader;

pub use compression::Compression;
pub use contents::{parse_line, ContentsEntry, ContentsLine, ContentsStats};
pub use error::{ContentsError, Result};

#[cfg(feature = "async")]
pub use reader::AsyncContentsReader;

/// Default fraction of malformed lines tolerated before a feed is judged corrupt.
pub const DEFAULT_MAX_SKIP_RATIO: f64 = 0.01;

/// Number of leading lines scanned for an old-style `FILE LOCATION` preamble.
pub const HEADER_SCAN_LINES: usize = 64;
