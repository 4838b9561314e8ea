//! Listing selection and catalog edits. Every bucket of the home listing is
//! built by the same projector; only the file selection differs.

use rusqlite::Connection;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::{LibraryError, Result};
use crate::models::{Book, BookFile, BookGroup, FileView, MetadataPatch, User};
use crate::projector;

pub const DEFAULT_PER_PAGE: u32 = 24;
pub const DEFAULT_RECOMMEND: u32 = 6;
const MAX_PER_PAGE: u32 = 200;

#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
    pub recommend: u32,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            search: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            recommend: DEFAULT_RECOMMEND,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HomeView {
    pub last_read: Option<FileView>,
    pub reading: Vec<BookGroup>,
    pub new: Vec<BookGroup>,
    pub recommended: Vec<BookGroup>,
    pub all: Vec<BookGroup>,
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
    pub total_books: i64,
    pub total_pages: i64,
}

pub fn login(conn: &Connection, username: &str) -> Result<User> {
    let username = username.trim();
    if username.is_empty() {
        return Err(LibraryError::InvalidInput("username is required".to_string()));
    }
    let user = Catalog::new(conn).find_or_create_user(username)?;
    log::info!("user {} signed in as {}", user.id, user.username);
    Ok(user)
}

pub fn home(conn: &Connection, user_id: i64, query: &ListingQuery) -> Result<HomeView> {
    let catalog = Catalog::new(conn);
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, MAX_PER_PAGE);
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let last_read = last_read(conn, user_id)?;
    let reading = projector::project(conn, catalog.files_of_books_in_progress(user_id)?, user_id)?;
    let new = projector::project(conn, catalog.files_of_unread_books(user_id)?, user_id)?;
    let recommended = projector::project(conn, catalog.random_files(query.recommend)?, user_id)?;

    let (book_ids, total_books) = catalog.book_page(search.as_deref(), page, per_page)?;
    let all = projector::project(conn, catalog.files_for_books(&book_ids)?, user_id)?;
    let per_page_i64 = i64::from(per_page);
    let total_pages = (total_books + per_page_i64 - 1) / per_page_i64;

    Ok(HomeView {
        last_read,
        reading,
        new,
        recommended,
        all,
        search,
        page,
        per_page,
        total_books,
        total_pages,
    })
}

/// The file the user touched most recently, with progress attached.
pub fn last_read(conn: &Connection, user_id: i64) -> Result<Option<FileView>> {
    let catalog = Catalog::new(conn);
    let Some(state) = catalog.last_read_state(user_id)? else {
        return Ok(None);
    };
    let Some(file) = catalog.file(state.file_id)? else {
        return Ok(None);
    };
    let Some(book) = catalog.book(file.book_id)? else {
        return Ok(None);
    };
    Ok(Some(projector::file_view(&file, &book, Some(&state))))
}

pub fn update_book_metadata(conn: &Connection, book_id: i64, patch: &MetadataPatch) -> Result<Book> {
    let book = Catalog::new(conn)
        .update_book(book_id, &clean_patch(patch))?
        .ok_or_else(|| LibraryError::not_found("book", book_id))?;
    log::info!("updated metadata of book {}", book_id);
    Ok(book)
}

pub fn update_file_metadata(
    conn: &Connection,
    file_id: i64,
    patch: &MetadataPatch,
) -> Result<BookFile> {
    let file = Catalog::new(conn)
        .update_file(file_id, &clean_patch(patch))?
        .ok_or_else(|| LibraryError::not_found("file", file_id))?;
    log::info!("updated metadata of file {}", file_id);
    Ok(file)
}

/// Removes the book with its files and every reading state on them.
pub fn delete_book(conn: &Connection, book_id: i64) -> Result<()> {
    if !Catalog::new(conn).delete_book(book_id)? {
        return Err(LibraryError::not_found("book", book_id));
    }
    log::info!("deleted book {}", book_id);
    Ok(())
}

/// Blank strings count as absent.
fn clean_patch(patch: &MetadataPatch) -> MetadataPatch {
    let keep = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    MetadataPatch {
        title: keep(&patch.title),
        author: keep(&patch.author),
        cover_url: keep(&patch.cover_url),
    }
}
