//! Multi-volume PDF library: scans a directory tree into books and volumes,
//! keeps per-user reading progress and serves both over HTTP.

pub mod aggregate;
pub mod backfill;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod logging;
pub mod lookup;
pub mod models;
pub mod parser;
pub mod projector;
pub mod reading;
pub mod scanner;
pub mod server;

pub use error::{LibraryError, LookupError, Result};
