use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

use crate::aggregate::{self, AggregateReport};
use crate::catalog::{Catalog, NewFile};
use crate::error::{LibraryError, Result};
use crate::parser::{parse_file_stem, PageCounter};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);
const UNKNOWN_AUTHOR: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub batch_size: usize,
    /// Pause after every committed batch.
    pub throttle: Duration,
    /// Count pages while ingesting instead of leaving them to the reader.
    pub count_pages: bool,
}

impl ScanOptions {
    /// Non-positive batch sizes fall back to the default.
    pub fn new(batch_size: i64, throttle: Duration, count_pages: bool) -> Self {
        let batch_size = usize::try_from(batch_size)
            .ok()
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        Self {
            batch_size,
            throttle,
            count_pages,
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            throttle: DEFAULT_THROTTLE,
            count_pages: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub added_count: usize,
    pub added: Vec<String>,
    pub skipped_count: usize,
    pub errors: Vec<ScanFailure>,
}

/// Outcome of a scan followed by the volume-count pass. An aggregation
/// failure is reported here; the files added by the scan stay committed.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub message: String,
    #[serde(flatten)]
    pub scan: ScanReport,
    pub aggregation: Option<AggregateReport>,
    pub aggregation_error: Option<String>,
}

/// Walks `root` and ingests every PDF whose path is not yet cataloged.
///
/// Each file is ingested inside its own savepoint: a failure discards that
/// file's rows only and is recorded in the report. Rows are committed every
/// `batch_size` additions, then the scan sleeps for `throttle`.
pub fn scan(
    conn: &mut Connection,
    root: &Path,
    options: &ScanOptions,
    counter: &dyn PageCounter,
) -> Result<ScanReport> {
    if !root.is_dir() {
        return Err(LibraryError::RootMissing(root.display().to_string()));
    }

    let mut known = Catalog::new(conn).all_file_paths()?;
    let mut report = ScanReport::default();
    let mut pending = 0usize;

    log::info!(
        "scan started root={} known={} batch_size={}",
        root.display(),
        known.len(),
        options.batch_size
    );

    let mut tx = conn.transaction()?;
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                log::warn!("scan could not read {}: {}", path, err);
                report.errors.push(ScanFailure {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() || !is_pdf(path) {
            continue;
        }

        let Some(path_str) = path.to_str() else {
            let path = path.display().to_string();
            log::warn!("skipping non UTF-8 path {}", path);
            report.errors.push(ScanFailure {
                path,
                reason: "file path is not valid UTF-8".to_string(),
            });
            continue;
        };
        if known.contains(path_str) {
            report.skipped_count += 1;
            continue;
        }

        let sp = tx.savepoint()?;
        let outcome = ingest_file(&sp, path, path_str, options, counter)
            .and_then(|()| sp.commit().map_err(LibraryError::from));
        match outcome {
            Ok(()) => {
                log::debug!("added {}", path_str);
                known.insert(path_str.to_string());
                report.added.push(path_str.to_string());
                report.added_count += 1;
                pending += 1;
            }
            Err(err) => {
                log::warn!("failed to ingest {}: {}", path_str, err);
                report.errors.push(ScanFailure {
                    path: path_str.to_string(),
                    reason: err.to_string(),
                });
            }
        }

        if pending >= options.batch_size {
            tx.commit()?;
            log::info!("scan committed batch of {} files", pending);
            pending = 0;
            if !options.throttle.is_zero() {
                std::thread::sleep(options.throttle);
            }
            tx = conn.transaction()?;
        }
    }
    tx.commit()?;

    log::info!(
        "scan finished added={} skipped={} errors={}",
        report.added_count,
        report.skipped_count,
        report.errors.len()
    );
    Ok(report)
}

/// Scan followed by the volume-count pass.
pub fn scan_library(
    conn: &mut Connection,
    root: &Path,
    options: &ScanOptions,
    counter: &dyn PageCounter,
) -> Result<ScanSummary> {
    let scan = scan(conn, root, options, counter)?;
    let (aggregation, aggregation_error) = match aggregate::recount_volumes(conn) {
        Ok(report) => (Some(report), None),
        Err(err) => {
            log::error!("volume count update failed: {}", err);
            (None, Some(err.to_string()))
        }
    };

    let mut message = format!("Scan complete. Added {} new files.", scan.added_count);
    if !scan.errors.is_empty() {
        message.push_str(&format!(" {} files failed.", scan.errors.len()));
    }
    if aggregation_error.is_some() {
        message.push_str(" Volume counts were not updated.");
    }

    Ok(ScanSummary {
        message,
        scan,
        aggregation,
        aggregation_error,
    })
}

fn ingest_file(
    conn: &Connection,
    path: &Path,
    path_str: &str,
    options: &ScanOptions,
    counter: &dyn PageCounter,
) -> Result<()> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .ok_or_else(|| LibraryError::InvalidInput(format!("no usable file name: {}", path_str)))?;
    let parsed = parse_file_stem(stem);
    let title = parsed.title.trim();

    let catalog = Catalog::new(conn);
    let book = match catalog.find_book_by_title(title)? {
        Some(book) => book,
        None => catalog.create_book(title, UNKNOWN_AUTHOR)?,
    };

    let total_pages = if options.count_pages {
        counter.count_pages(path)?
    } else {
        0
    };

    catalog.insert_file(&NewFile {
        book_id: book.id,
        file_path: path_str,
        volume_number: parsed.volume,
        total_pages,
        title: Some(stem),
        author: book.author.as_deref(),
    })?;
    Ok(())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::collections::HashSet;
    use std::fs;

    struct FixedCounter {
        fail_on: Option<&'static str>,
    }

    impl PageCounter for FixedCounter {
        fn count_pages(&self, path: &Path) -> Result<i64> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if Some(name) == self.fail_on {
                return Err(LibraryError::Pdf(format!("corrupt pdf: {}", name)));
            }
            Ok(12)
        }
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"%PDF-1.4").unwrap();
    }

    fn quick(count_pages: bool) -> ScanOptions {
        ScanOptions::new(2, Duration::ZERO, count_pages)
    }

    #[test]
    fn non_positive_batch_size_uses_default() {
        assert_eq!(ScanOptions::new(0, Duration::ZERO, false).batch_size, 50);
        assert_eq!(ScanOptions::new(-3, Duration::ZERO, false).batch_size, 50);
        assert_eq!(ScanOptions::new(7, Duration::ZERO, false).batch_size, 7);
    }

    #[test]
    fn missing_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = db::open_in_memory().unwrap();
        let err = scan(
            &mut conn,
            &dir.path().join("missing"),
            &quick(false),
            &FixedCounter { fail_on: None },
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::RootMissing(_)));
    }

    #[test]
    fn volumes_are_grouped_under_one_book() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A - 01.pdf");
        touch(dir.path(), "A - 02.pdf");
        touch(dir.path(), "B.pdf");
        touch(dir.path(), "notes.txt");

        let mut conn = db::open_in_memory().unwrap();
        let summary =
            scan_library(&mut conn, dir.path(), &quick(false), &FixedCounter { fail_on: None })
                .unwrap();
        assert_eq!(summary.scan.added_count, 3);
        assert!(summary.scan.errors.is_empty());
        assert_eq!(summary.message, "Scan complete. Added 3 new files.");

        let catalog = Catalog::new(&conn);
        let a = catalog.find_book_by_title("A").unwrap().unwrap();
        let b = catalog.find_book_by_title("B").unwrap().unwrap();
        assert_eq!(a.total_volumes, 2);
        assert_eq!(b.total_volumes, 1);
        assert_eq!(a.author.as_deref(), Some("Unknown"));

        let files = catalog.files_for_books(&[a.id]).unwrap();
        let volumes: Vec<i64> = files.iter().map(|f| f.volume_number).collect();
        assert_eq!(volumes.len(), 2);
        assert!(volumes.contains(&1) && volumes.contains(&2));
        assert!(files.iter().all(|f| f.total_pages == 0));
        let titles: HashSet<_> = files.iter().filter_map(|f| f.title.clone()).collect();
        assert!(titles.contains("A - 01") && titles.contains("A - 02"));
    }

    #[test]
    fn rescan_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A - 01.pdf", "A - 02.pdf", "B.pdf", "C 3.PDF", "D_04.pdf"] {
            touch(dir.path(), name);
        }
        let mut conn = db::open_in_memory().unwrap();
        let counter = FixedCounter { fail_on: None };

        let first = scan(&mut conn, dir.path(), &quick(false), &counter).unwrap();
        assert_eq!(first.added_count, 5);
        let before = Catalog::new(&conn).all_file_paths().unwrap();

        let second = scan(&mut conn, dir.path(), &quick(false), &counter).unwrap();
        assert_eq!(second.added_count, 0);
        assert_eq!(second.skipped_count, 5);
        assert_eq!(Catalog::new(&conn).all_file_paths().unwrap(), before);
    }

    #[test]
    fn same_title_in_different_directories_merges() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shelf one")).unwrap();
        fs::create_dir_all(dir.path().join("shelf two/nested")).unwrap();
        touch(&dir.path().join("shelf one"), "Saga_01.pdf");
        touch(&dir.path().join("shelf two/nested"), "Saga 02.pdf");

        let mut conn = db::open_in_memory().unwrap();
        scan_library(&mut conn, dir.path(), &quick(false), &FixedCounter { fail_on: None })
            .unwrap();

        let catalog = Catalog::new(&conn);
        let saga = catalog.find_book_by_title("Saga").unwrap().unwrap();
        assert_eq!(saga.total_volumes, 2);
        assert_eq!(catalog.volume_counts().unwrap().len(), 1);
    }

    #[test]
    fn one_unreadable_pdf_does_not_abort_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Ok - 01.pdf", "Ok - 02.pdf", "Broken - 01.pdf", "Fine.pdf"] {
            touch(dir.path(), name);
        }

        let mut conn = db::open_in_memory().unwrap();
        let summary = scan_library(
            &mut conn,
            dir.path(),
            &quick(true),
            &FixedCounter {
                fail_on: Some("Broken - 01.pdf"),
            },
        )
        .unwrap();

        assert_eq!(summary.scan.added_count, 3);
        assert_eq!(summary.scan.errors.len(), 1);
        assert!(summary.scan.errors[0].path.ends_with("Broken - 01.pdf"));
        assert!(summary.message.contains("1 files failed"));

        let catalog = Catalog::new(&conn);
        // the book created for the failed file was rolled back with it
        assert!(catalog.find_book_by_title("Broken").unwrap().is_none());
        assert!(catalog.all_files().unwrap().iter().all(|f| f.total_pages == 12));
    }

    #[test]
    fn failed_recount_keeps_scanned_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A - 01.pdf");
        touch(dir.path(), "A - 02.pdf");

        let mut conn = db::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER block_recount BEFORE UPDATE OF total_volumes ON book
             BEGIN SELECT RAISE(ABORT, 'recount blocked'); END;",
        )
        .unwrap();

        let summary =
            scan_library(&mut conn, dir.path(), &quick(false), &FixedCounter { fail_on: None })
                .unwrap();
        assert_eq!(summary.scan.added_count, 2);
        assert!(summary.aggregation.is_none());
        assert!(summary
            .aggregation_error
            .as_deref()
            .is_some_and(|err| err.contains("recount blocked")));
        assert_eq!(
            summary.message,
            "Scan complete. Added 2 new files. Volume counts were not updated."
        );

        let catalog = Catalog::new(&conn);
        assert_eq!(catalog.all_files().unwrap().len(), 2);
        let a = catalog.find_book_by_title("A").unwrap().unwrap();
        assert_eq!(a.total_volumes, 1);
    }

    #[test]
    fn oversized_volume_suffix_is_clamped_and_terminal() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Saga 99999999999999999999.pdf");

        let mut conn = db::open_in_memory().unwrap();
        scan_library(&mut conn, dir.path(), &quick(false), &FixedCounter { fail_on: None })
            .unwrap();

        let files = Catalog::new(&conn).all_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].volume_number, crate::parser::filename::MAX_VOLUME);
        assert_eq!(crate::reading::next_volume(&conn, files[0].id).unwrap(), None);
    }
}
