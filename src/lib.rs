//! `multiget` fetches a single file from several mirror URLs at once.
//!
//! The crate is organized around a single-threaded, cooperative event loop
//! (`client::Client`) that owns a memory-mapped output file, a pool of
//! keep-alive HTTP/1.1 connections (`connection::Connection`), and a set of
//! outstanding byte ranges (`chunk::ChunkSet`) that is repartitioned across
//! connections as they go idle.

pub mod chunk;
pub mod client;
pub mod connection;
pub mod error;
pub mod options;
pub mod parser;
pub mod progress;
pub mod resolver;
pub mod url;

pub use client::Client;
pub use error::ClientError;
pub use options::Options;

/// Default `User-Agent` sent with every HEAD/GET unless overridden with `-u`.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:102.0) Gecko/20100101 Firefox/102.0";
