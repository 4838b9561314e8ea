//! Runtime settings, read from flags with environment fallbacks. `.env` is
//! loaded by the binary before parsing.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LibraryError, Result};
use crate::library::ListingQuery;
use crate::lookup::{MetadataClient, GOOGLE_BOOKS_URL};
use crate::scanner::ScanOptions;

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// SQLite catalog file. Its directory is created on first use.
    #[arg(long, env = "DB_PATH", default_value = "instance/library.db")]
    pub db_path: PathBuf,

    /// Directory tree holding the PDFs.
    #[arg(long, env = "PDF_ROOT_PATH")]
    pub pdf_root: Option<PathBuf>,

    #[arg(long, env = "SHELF_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Runtime worker threads.
    #[arg(long, env = "SHELF_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Files committed per scan batch; zero or less means 50.
    #[arg(
        long,
        env = "SHELF_SCAN_BATCH_SIZE",
        default_value_t = 50,
        allow_negative_numbers = true
    )]
    pub scan_batch_size: i64,

    /// Pause after each committed scan batch.
    #[arg(long, env = "SHELF_SCAN_THROTTLE_MS", default_value_t = 100)]
    pub scan_throttle_ms: u64,

    /// Count pages during the scan instead of on first open.
    #[arg(
        long,
        env = "SHELF_SCAN_COUNT_PAGES",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub scan_count_pages: bool,

    #[arg(long, env = "SHELF_LOOKUP_TIMEOUT_SECS", default_value_t = 6)]
    pub lookup_timeout_secs: u64,

    #[arg(long, env = "SHELF_LOOKUP_BASE_URL", default_value = GOOGLE_BOOKS_URL)]
    pub lookup_base_url: String,

    /// Files sampled for the recommended shelf.
    #[arg(long, env = "SHELF_RECOMMEND_COUNT", default_value_t = 6)]
    pub recommend_count: u32,

    /// Books per page of the full listing.
    #[arg(long, env = "SHELF_PAGE_SIZE", default_value_t = 24)]
    pub page_size: u32,
}

impl Settings {
    /// Settings for an explicit database and PDF root, everything else at
    /// its default.
    pub fn new(db_path: impl Into<PathBuf>, pdf_root: Option<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            pdf_root,
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            workers: 1,
            scan_batch_size: 50,
            scan_throttle_ms: 100,
            scan_count_pages: false,
            lookup_timeout_secs: 6,
            lookup_base_url: GOOGLE_BOOKS_URL.to_string(),
            recommend_count: 6,
            page_size: 24,
        }
    }

    /// The configured PDF root, which must be an existing directory.
    pub fn pdf_root(&self) -> Result<&Path> {
        match self.pdf_root.as_deref() {
            Some(root) if root.is_dir() => Ok(root),
            Some(root) => Err(LibraryError::RootMissing(root.display().to_string())),
            None => Err(LibraryError::RootMissing(
                "PDF_ROOT_PATH is not configured".to_string(),
            )),
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::new(
            self.scan_batch_size,
            Duration::from_millis(self.scan_throttle_ms),
            self.scan_count_pages,
        )
    }

    pub fn lookup_client(&self) -> MetadataClient {
        MetadataClient::new(
            &self.lookup_base_url,
            Duration::from_secs(self.lookup_timeout_secs.max(1)),
        )
    }

    pub fn listing_query(&self, search: Option<String>, page: Option<u32>) -> ListingQuery {
        ListingQuery {
            search,
            page: page.unwrap_or(1).max(1),
            per_page: self.page_size.max(1),
            recommend: self.recommend_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn defaults_apply_without_flags() {
        let settings = Harness::parse_from(["shelf"]).settings;
        assert_eq!(settings.db_path, PathBuf::from("instance/library.db"));
        assert_eq!(settings.bind.port(), 8000);
        assert_eq!(settings.scan_options().batch_size, 50);
        assert!(!settings.scan_count_pages);
        assert_eq!(settings.lookup_base_url, GOOGLE_BOOKS_URL);
    }

    #[test]
    fn non_positive_batch_size_is_corrected() {
        let settings = Harness::parse_from(["shelf", "--scan-batch-size", "-5"]).settings;
        assert_eq!(settings.scan_batch_size, -5);
        assert_eq!(settings.scan_options().batch_size, 50);
    }

    #[test]
    fn missing_pdf_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::new(dir.path().join("library.db"), None);
        assert!(matches!(settings.pdf_root(), Err(LibraryError::RootMissing(_))));

        let settings = Settings::new(
            dir.path().join("library.db"),
            Some(dir.path().join("missing")),
        );
        assert!(settings.pdf_root().is_err());

        let settings = Settings::new(dir.path().join("library.db"), Some(dir.path().to_path_buf()));
        assert_eq!(settings.pdf_root().unwrap(), dir.path());
    }
}
