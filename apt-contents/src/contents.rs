//! Parsing of individual Contents index lines.

use serde::{Deserialize, Serialize};

/// A single file path and the packages that ship it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentsEntry {
    /// Absolute path of the file.
    pub path: String,
    /// Bare package names, without area or section qualifiers.
    pub packages: Vec<String>,
}

impl ContentsEntry {
    /// Create a new entry, normalising the path to be absolute.
    pub fn new<P: Into<String>>(path: P, packages: Vec<String>) -> Self {
        Self {
            path: normalize_path(path.into()),
            packages,
        }
    }
}

/// Classification of one line of a Contents index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentsLine {
    /// A path with at least one package.
    Entry(ContentsEntry),
    /// The `FILE  LOCATION` column header that ends an old-style preamble.
    Header,
    /// An empty or whitespace-only line.
    Blank,
    /// A line that could not be parsed.
    Malformed,
}

/// Counters kept while reading an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentsStats {
    /// Entries successfully parsed.
    pub entries: u64,
    /// Lines skipped because they were malformed.
    pub skipped: u64,
}

impl ContentsStats {
    /// Total number of lines that counted towards the skip ratio.
    pub fn total(&self) -> u64 {
        self.entries + self.skipped
    }

    /// Fraction of counted lines that were malformed.
    pub fn skip_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.skipped as f64 / total as f64,
        }
    }
}

/// Parse a single line of a Contents index.
///
/// The location column is the last whitespace separated field, so paths
/// containing spaces are preserved. Each comma separated location has the
/// form `[[area/]section/]name`; only `name` is kept.
pub fn parse_line(line: &str) -> ContentsLine {
    let line = line.trim_end();
    if line.trim_start().is_empty() {
        return ContentsLine::Blank;
    }

    let Some(split) = line.rfind(char::is_whitespace) else {
        return ContentsLine::Malformed;
    };
    let path = line[..split].trim();
    let location = &line[split + 1..];

    if path.is_empty() || location.is_empty() {
        return ContentsLine::Malformed;
    }

    if path == "FILE" && location == "LOCATION" {
        return ContentsLine::Header;
    }

    let mut packages: Vec<String> = Vec::new();
    for qualified in location.split(',') {
        let name = qualified.rsplit('/').next().unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        if !packages.iter().any(|p| p == name) {
            packages.push(name.to_string());
        }
    }

    if packages.is_empty() {
        return ContentsLine::Malformed;
    }

    ContentsLine::Entry(ContentsEntry::new(path, packages))
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path.trim_start_matches("./"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(line: &str) -> ContentsEntry {
        match parse_line(line) {
            ContentsLine::Entry(entry) => entry,
            other => panic!("expected entry for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_parse_simple_line() {
        let e = entry("usr/bin/dpkg                                            admin/dpkg");
        assert_eq!(e.path, "/usr/bin/dpkg");
        assert_eq!(e.packages, vec!["dpkg"]);
    }

    #[test]
    fn test_parse_multiple_packages() {
        let e = entry("usr/share/doc/kde/README\tuniverse/kde/plasma-workspace,kde/kde-cli-tools,kde-cli-tools");
        assert_eq!(e.packages, vec!["plasma-workspace", "kde-cli-tools"]);
    }

    #[test]
    fn test_parse_path_with_spaces() {
        let e = entry("usr/share/fonts/My Font Regular.ttf   fonts/fonts-mine");
        assert_eq!(e.path, "/usr/share/fonts/My Font Regular.ttf");
        assert_eq!(e.packages, vec!["fonts-mine"]);
    }

    #[test]
    fn test_parse_trailing_newline() {
        let e = entry("etc/apt/sources.list admin/apt\r\n");
        assert_eq!(e.path, "/etc/apt/sources.list");
        assert_eq!(e.packages, vec!["apt"]);
    }

    #[test]
    fn test_parse_header_and_blank() {
        assert_eq!(
            parse_line("FILE                                                    LOCATION"),
            ContentsLine::Header
        );
        assert_eq!(parse_line(""), ContentsLine::Blank);
        assert_eq!(parse_line("   \t"), ContentsLine::Blank);
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(parse_line("usr/bin/lonely"), ContentsLine::Malformed);
        assert_eq!(parse_line("usr/bin/ls admin/,utils/"), ContentsLine::Malformed);
        assert_eq!(parse_line("   admin/dpkg"), ContentsLine::Malformed);
    }

    #[test]
    fn test_stats_ratio() {
        let stats = ContentsStats {
            entries: 99,
            skipped: 1,
        };
        assert_eq!(stats.total(), 100);
        assert!((stats.skip_ratio() - 0.01).abs() < f64::EPSILON);
        assert_eq!(ContentsStats::default().skip_ratio(), 0.0);
    }
}
