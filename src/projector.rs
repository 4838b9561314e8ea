//! Turns an arbitrary set of file rows into per-book listing groups with one
//! user's progress attached. The caller decides which files go in.

use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};

use crate::catalog::Catalog;
use crate::error::Result;
use crate::models::{Book, BookFile, BookGroup, FileView, ReadingState};

/// Loads the owning books and the user's reading states for `files` (one
/// query each) and groups them.
pub fn project(conn: &Connection, files: Vec<BookFile>, user_id: i64) -> Result<Vec<BookGroup>> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let catalog = Catalog::new(conn);

    let file_ids: Vec<i64> = files.iter().map(|file| file.id).collect();
    let states = catalog.reading_states_for_files(user_id, &file_ids)?;

    let mut book_ids: Vec<i64> = files.iter().map(|file| file.book_id).collect();
    book_ids.sort_unstable();
    book_ids.dedup();
    let books = catalog.books_by_ids(&book_ids)?;

    Ok(group_files(files, &books, &states))
}

/// Pure grouping step. Files whose book is missing from `books` are dropped.
pub fn group_files(
    files: Vec<BookFile>,
    books: &HashMap<i64, Book>,
    states: &HashMap<i64, ReadingState>,
) -> Vec<BookGroup> {
    let mut partitions: BTreeMap<i64, Vec<BookFile>> = BTreeMap::new();
    for file in files {
        partitions.entry(file.book_id).or_default().push(file);
    }

    let mut groups: Vec<BookGroup> = partitions
        .into_iter()
        .filter_map(|(book_id, mut files)| {
            let Some(book) = books.get(&book_id) else {
                log::warn!("{} files reference missing book {}", files.len(), book_id);
                return None;
            };
            files.sort_by_key(|file| (file.volume_number, file.id));
            files.dedup_by_key(|file| file.id);

            let views: Vec<FileView> = files
                .iter()
                .map(|file| file_view(file, book, states.get(&file.id)))
                .collect();
            let cover_file = views
                .iter()
                .find(|view| view.volume_number == 1)
                .or_else(|| views.first())?
                .clone();

            Some(BookGroup {
                book: book.clone(),
                volume_count: views.len(),
                files: views,
                cover_file,
            })
        })
        .collect();

    // byte-wise title order, not locale aware
    groups.sort_by(|a, b| {
        a.book
            .title
            .cmp(&b.book.title)
            .then(a.book.id.cmp(&b.book.id))
    });
    groups
}

/// Resolves file-level overrides against the book and attaches progress.
pub fn file_view(file: &BookFile, book: &Book, state: Option<&ReadingState>) -> FileView {
    FileView {
        id: file.id,
        book_id: file.book_id,
        title: file.title.clone().unwrap_or_else(|| book.title.clone()),
        author: file.author.clone().or_else(|| book.author.clone()),
        cover_url: file.cover_url.clone().or_else(|| book.cover_url.clone()),
        volume_number: file.volume_number,
        current_page: state.map(|state| state.current_page).unwrap_or(0),
        total_pages: file.total_pages,
    }
}
