use rusqlite::Connection;
use std::path::Path;

use crate::catalog::{with_savepoint, Catalog};
use crate::models::BookFile;
use crate::parser::PageCounter;

/// Fills in `total_pages` for a file that has never been counted.
///
/// Best effort: a PDF that cannot be opened is logged, nothing is written and
/// the file comes back with `total_pages == 0`. Two requests racing on the
/// same file both write the same count.
pub fn ensure_page_count(conn: &Connection, counter: &dyn PageCounter, mut file: BookFile) -> BookFile {
    if !file.needs_page_count() {
        return file;
    }

    let counted = with_savepoint(conn, "backfill_pages", |conn| {
        let pages = counter.count_pages(Path::new(&file.file_path))?;
        Catalog::new(conn).set_total_pages(file.id, pages)?;
        Ok(pages)
    });

    match counted {
        Ok(pages) => {
            log::info!("counted {} pages for file {}", pages, file.id);
            file.total_pages = pages;
        }
        Err(err) => {
            log::warn!(
                "could not count pages of {} (file {}): {}",
                file.file_path,
                file.id,
                err
            );
        }
    }
    file
}
