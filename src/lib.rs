//! Debian Contents index service.
//!
//! Downloads the `Contents` index of each configured archive, stores it as
//! an immutable namespace in an embedded database and answers glob queries
//! over it. Every refresh builds a new namespace and swaps it in atomically,
//! so queries always see one complete index.

#![deny(missing_docs)]

pub mod builder;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod refresh;
pub mod search;
pub mod store;
pub mod web;

pub use error::{IndexError, IndexResult};
