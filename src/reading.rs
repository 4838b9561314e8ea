//! Reader entry point and per-user progress.

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Component, Path};

use crate::backfill;
use crate::catalog::Catalog;
use crate::error::{LibraryError, Result};
use crate::models::{FileView, ReadingState};
use crate::parser::PageCounter;
use crate::projector;

/// URL prefix the PDF root is mounted under.
pub const PDF_MOUNT: &str = "/pdfs";

#[derive(Debug, Clone, Serialize)]
pub struct ReaderView {
    pub file: FileView,
    pub state: ReadingState,
    pub pdf_url: String,
    pub next_file_id: Option<i64>,
}

/// Opens a file for `user_id`: checks it lives under `pdf_root`, backfills
/// its page count, and creates or refreshes the user's reading state.
pub fn open_reader(
    conn: &Connection,
    counter: &dyn PageCounter,
    user_id: i64,
    file_id: i64,
    pdf_root: &Path,
) -> Result<ReaderView> {
    let catalog = Catalog::new(conn);
    let file = catalog
        .file(file_id)?
        .ok_or_else(|| LibraryError::not_found("file", file_id))?;
    let pdf_url = pdf_url(pdf_root, Path::new(&file.file_path))?;

    let file = backfill::ensure_page_count(conn, counter, file);
    let book = catalog
        .book(file.book_id)?
        .ok_or_else(|| LibraryError::not_found("book", file.book_id))?;
    let state = catalog.touch_reading_state(user_id, file.id, Utc::now())?;
    let next_file_id = catalog.next_volume(file.book_id, file.volume_number)?;

    Ok(ReaderView {
        file: projector::file_view(&file, &book, Some(&state)),
        state,
        pdf_url,
        next_file_id,
    })
}

/// Moves an existing reading state to `current_page`. There is no implicit
/// create: a user must have opened the file first.
pub fn update_progress(
    conn: &Connection,
    user_id: i64,
    file_id: i64,
    current_page: i64,
) -> Result<ReadingState> {
    if current_page < 1 {
        return Err(LibraryError::InvalidInput(format!(
            "current_page must be at least 1, got {}",
            current_page
        )));
    }
    Catalog::new(conn)
        .update_reading_page(user_id, file_id, current_page, Utc::now())?
        .ok_or_else(|| LibraryError::not_found("reading state", file_id))
}

/// Id of the file holding the following volume of the same book. `None` is a
/// normal answer for the last volume.
pub fn next_volume(conn: &Connection, file_id: i64) -> Result<Option<i64>> {
    let catalog = Catalog::new(conn);
    let file = catalog
        .file(file_id)?
        .ok_or_else(|| LibraryError::not_found("file", file_id))?;
    catalog.next_volume(file.book_id, file.volume_number)
}

/// URL of `file_path` under the PDF mount, each segment percent-encoded.
/// Paths outside `pdf_root` or containing `..` are rejected.
pub fn pdf_url(pdf_root: &Path, file_path: &Path) -> Result<String> {
    let outside = || LibraryError::InvalidPath(file_path.display().to_string());
    let relative = file_path.strip_prefix(pdf_root).map_err(|_| outside())?;

    let mut url = String::from(PDF_MOUNT);
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            return Err(outside());
        };
        let segment = segment.to_str().ok_or_else(outside)?;
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    if url.len() == PDF_MOUNT.len() {
        return Err(outside());
    }
    Ok(url)
}
