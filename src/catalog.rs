//! Repository over the catalog tables.
//!
//! Every cross-entity read is an explicit call here; nothing is loaded lazily.
//! `Catalog` borrows a plain `Connection`, so it works the same on a
//! connection, a transaction or a savepoint.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::models::{Book, BookFile, MetadataPatch, ReadingState, User};

/// Upper bound on bound parameters per `IN (...)` query.
const IN_CHUNK: usize = 500;

const FILE_COLUMNS: &str =
    "id, book_id, file_path, volume_number, total_pages, title, author, cover_url";
const BOOK_COLUMNS: &str = "id, title, author, total_volumes, cover_url";
const STATE_COLUMNS: &str = "id, user_id, file_id, current_page, last_read_at";

pub struct NewFile<'a> {
    pub book_id: i64,
    pub file_path: &'a str,
    pub volume_number: i64,
    pub total_pages: i64,
    pub title: Option<&'a str>,
    pub author: Option<&'a str>,
}

/// One row of the volume-count comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeCount {
    pub book_id: i64,
    pub total_volumes: i64,
    pub file_count: i64,
}

pub struct Catalog<'c> {
    conn: &'c Connection,
}

impl<'c> Catalog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // users

    pub fn find_or_create_user(&self, username: &str) -> Result<User> {
        self.conn.execute(
            "INSERT INTO user (username) VALUES (?1) ON CONFLICT(username) DO NOTHING",
            params![username],
        )?;
        let user = self.conn.query_row(
            "SELECT id, username FROM user WHERE username = ?1",
            params![username],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                })
            },
        )?;
        Ok(user)
    }

    pub fn user(&self, user_id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username FROM user WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // books

    pub fn book(&self, book_id: i64) -> Result<Option<Book>> {
        let sql = format!("SELECT {} FROM book WHERE id = ?1", BOOK_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![book_id], book_from_row)
            .optional()?)
    }

    /// Exact title match; the oldest book wins when titles collide.
    pub fn find_book_by_title(&self, title: &str) -> Result<Option<Book>> {
        let sql = format!(
            "SELECT {} FROM book WHERE title = ?1 ORDER BY id LIMIT 1",
            BOOK_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![title], book_from_row)
            .optional()?)
    }

    /// Inserts a book and returns it with its assigned id, usable by file rows
    /// in the same uncommitted transaction.
    pub fn create_book(&self, title: &str, author: &str) -> Result<Book> {
        self.conn.execute(
            "INSERT INTO book (title, author, total_volumes) VALUES (?1, ?2, 1)",
            params![title, author],
        )?;
        Ok(Book {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            author: Some(author.to_string()),
            total_volumes: 1,
            cover_url: None,
        })
    }

    pub fn books_by_ids(&self, book_ids: &[i64]) -> Result<HashMap<i64, Book>> {
        let mut books = HashMap::with_capacity(book_ids.len());
        for chunk in book_ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT {} FROM book WHERE id IN ({})",
                BOOK_COLUMNS,
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), book_from_row)?;
            for row in rows {
                let book = row?;
                books.insert(book.id, book);
            }
        }
        Ok(books)
    }

    /// One page of book ids ordered by title, optionally filtered by a
    /// case-insensitive substring of the title, plus the unpaged total.
    /// Case folding is Unicode lowercase through `fold_case`, registered by
    /// `db::open`.
    pub fn book_page(
        &self,
        search: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<i64>, i64)> {
        let search = search
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);
        let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);
        let filter = "(?1 IS NULL OR instr(fold_case(title), ?1) > 0)";

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM book WHERE {}", filter),
            params![search],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM book WHERE {} ORDER BY title, id LIMIT ?2 OFFSET ?3",
            filter
        ))?;
        let ids = stmt
            .query_map(params![search, i64::from(per_page), offset], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok((ids, total))
    }

    pub fn update_book(&self, book_id: i64, patch: &MetadataPatch) -> Result<Option<Book>> {
        let changed = self.conn.execute(
            "UPDATE book SET
                title = COALESCE(?2, title),
                author = COALESCE(?3, author),
                cover_url = COALESCE(?4, cover_url)
             WHERE id = ?1",
            params![book_id, patch.title, patch.author, patch.cover_url],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.book(book_id)
    }

    /// Removes a book, its files and every reading state on those files as
    /// one unit.
    pub fn delete_book(&self, book_id: i64) -> Result<bool> {
        with_savepoint(self.conn, "delete_book", |conn| {
            conn.execute(
                "DELETE FROM reading_state WHERE file_id IN (SELECT id FROM file WHERE book_id = ?1)",
                params![book_id],
            )?;
            conn.execute("DELETE FROM file WHERE book_id = ?1", params![book_id])?;
            let removed = conn.execute("DELETE FROM book WHERE id = ?1", params![book_id])?;
            Ok(removed > 0)
        })
    }

    pub fn volume_counts(&self) -> Result<Vec<VolumeCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.total_volumes, COUNT(f.id)
             FROM book b LEFT JOIN file f ON f.book_id = b.id
             GROUP BY b.id
             ORDER BY b.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(VolumeCount {
                    book_id: row.get(0)?,
                    total_volumes: row.get(1)?,
                    file_count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_total_volumes(&self, book_id: i64, total_volumes: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE book SET total_volumes = ?2 WHERE id = ?1",
            params![book_id, total_volumes],
        )?;
        Ok(())
    }

    // files

    /// Every known file path, read in one query.
    pub fn all_file_paths(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT file_path FROM file")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(paths)
    }

    pub fn insert_file(&self, file: &NewFile<'_>) -> Result<BookFile> {
        self.conn.execute(
            "INSERT INTO file (book_id, file_path, volume_number, total_pages, title, author)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.book_id,
                file.file_path,
                file.volume_number,
                file.total_pages,
                file.title,
                file.author
            ],
        )?;
        Ok(BookFile {
            id: self.conn.last_insert_rowid(),
            book_id: file.book_id,
            file_path: file.file_path.to_string(),
            volume_number: file.volume_number,
            total_pages: file.total_pages,
            title: file.title.map(str::to_string),
            author: file.author.map(str::to_string),
            cover_url: None,
        })
    }

    pub fn file(&self, file_id: i64) -> Result<Option<BookFile>> {
        let sql = format!("SELECT {} FROM file WHERE id = ?1", FILE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![file_id], file_from_row)
            .optional()?)
    }

    pub fn all_files(&self) -> Result<Vec<BookFile>> {
        self.files_where("1 = 1", params![])
    }

    pub fn files_for_books(&self, book_ids: &[i64]) -> Result<Vec<BookFile>> {
        let mut files = Vec::new();
        for chunk in book_ids.chunks(IN_CHUNK) {
            let predicate = format!("book_id IN ({})", placeholders(chunk.len()));
            files.extend(self.files_where(&predicate, params_from_iter(chunk.iter()))?);
        }
        Ok(files)
    }

    /// Files of every book the user has opened at least one volume of.
    pub fn files_of_books_in_progress(&self, user_id: i64) -> Result<Vec<BookFile>> {
        self.files_where(
            "book_id IN (SELECT f.book_id FROM file f
                         JOIN reading_state rs ON rs.file_id = f.id
                         WHERE rs.user_id = ?1)",
            params![user_id],
        )
    }

    /// Files of every book the user has not opened at all.
    pub fn files_of_unread_books(&self, user_id: i64) -> Result<Vec<BookFile>> {
        self.files_where(
            "book_id NOT IN (SELECT f.book_id FROM file f
                             JOIN reading_state rs ON rs.file_id = f.id
                             WHERE rs.user_id = ?1)",
            params![user_id],
        )
    }

    pub fn random_files(&self, limit: u32) -> Result<Vec<BookFile>> {
        let sql = format!(
            "SELECT {} FROM file ORDER BY RANDOM() LIMIT ?1",
            FILE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![i64::from(limit)], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// The file holding the next volume of the same book, lowest id first.
    pub fn next_volume(&self, book_id: i64, volume_number: i64) -> Result<Option<i64>> {
        let Some(next) = volume_number.checked_add(1) else {
            return Ok(None);
        };
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM file WHERE book_id = ?1 AND volume_number = ?2
                 ORDER BY id LIMIT 1",
                params![book_id, next],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_total_pages(&self, file_id: i64, total_pages: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE file SET total_pages = ?2 WHERE id = ?1",
            params![file_id, total_pages],
        )?;
        Ok(())
    }

    pub fn update_file(&self, file_id: i64, patch: &MetadataPatch) -> Result<Option<BookFile>> {
        let changed = self.conn.execute(
            "UPDATE file SET
                title = COALESCE(?2, title),
                author = COALESCE(?3, author),
                cover_url = COALESCE(?4, cover_url)
             WHERE id = ?1",
            params![file_id, patch.title, patch.author, patch.cover_url],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.file(file_id)
    }

    fn files_where<P: rusqlite::Params>(&self, predicate: &str, params: P) -> Result<Vec<BookFile>> {
        let sql = format!(
            "SELECT {} FROM file WHERE {} ORDER BY id",
            FILE_COLUMNS, predicate
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params, file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    // reading state

    pub fn reading_state(&self, user_id: i64, file_id: i64) -> Result<Option<ReadingState>> {
        let sql = format!(
            "SELECT {} FROM reading_state WHERE user_id = ?1 AND file_id = ?2",
            STATE_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![user_id, file_id], state_from_row)
            .optional()?)
    }

    /// Progress of one user on the given files, keyed by file id.
    pub fn reading_states_for_files(
        &self,
        user_id: i64,
        file_ids: &[i64],
    ) -> Result<HashMap<i64, ReadingState>> {
        let mut states = HashMap::new();
        for chunk in file_ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT {} FROM reading_state WHERE user_id = ? AND file_id IN ({})",
                STATE_COLUMNS,
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let values = std::iter::once(&user_id).chain(chunk.iter());
            let rows = stmt.query_map(params_from_iter(values), state_from_row)?;
            for row in rows {
                let state = row?;
                states.insert(state.file_id, state);
            }
        }
        Ok(states)
    }

    pub fn last_read_state(&self, user_id: i64) -> Result<Option<ReadingState>> {
        let sql = format!(
            "SELECT {} FROM reading_state WHERE user_id = ?1
             ORDER BY last_read_at DESC, id DESC LIMIT 1",
            STATE_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![user_id], state_from_row)
            .optional()?)
    }

    /// Find-or-create on `(user_id, file_id)`. A new row starts at page 1;
    /// an existing row keeps its page and gets a fresh `last_read_at`.
    pub fn touch_reading_state(
        &self,
        user_id: i64,
        file_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ReadingState> {
        self.conn.execute(
            "INSERT INTO reading_state (user_id, file_id, current_page, last_read_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(user_id, file_id)
             DO UPDATE SET last_read_at = MAX(last_read_at, excluded.last_read_at)",
            params![user_id, file_id, now.timestamp_millis()],
        )?;
        self.reading_state(user_id, file_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows.into())
    }

    /// Updates an existing row only. `last_read_at` never moves backwards.
    pub fn update_reading_page(
        &self,
        user_id: i64,
        file_id: i64,
        current_page: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ReadingState>> {
        let changed = self.conn.execute(
            "UPDATE reading_state
             SET current_page = ?3, last_read_at = MAX(last_read_at, ?4)
             WHERE user_id = ?1 AND file_id = ?2",
            params![user_id, file_id, current_page, now.timestamp_millis()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.reading_state(user_id, file_id)
    }
}

/// Runs `f` inside a named savepoint: released on success, rolled back on
/// error. Nests under an outer transaction if one is open.
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) =
                conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
            {
                log::error!("rollback of savepoint {} failed: {}", name, rollback_err);
            }
            Err(err)
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        total_volumes: row.get(3)?,
        cover_url: row.get(4)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<BookFile> {
    Ok(BookFile {
        id: row.get(0)?,
        book_id: row.get(1)?,
        file_path: row.get(2)?,
        volume_number: row.get(3)?,
        total_pages: row.get(4)?,
        title: row.get(5)?,
        author: row.get(6)?,
        cover_url: row.get(7)?,
    })
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<ReadingState> {
    let millis: i64 = row.get(4)?;
    Ok(ReadingState {
        id: row.get(0)?,
        user_id: row.get(1)?,
        file_id: row.get(2)?,
        current_page: row.get(3)?,
        last_read_at: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed(conn: &Connection) -> (Book, Vec<BookFile>) {
        let catalog = Catalog::new(conn);
        let book = catalog.create_book("Great Book", "Unknown").unwrap();
        let files = (1..=3)
            .map(|volume| {
                let path = format!("/pdfs/Great Book - {:02}.pdf", volume);
                catalog
                    .insert_file(&NewFile {
                        book_id: book.id,
                        file_path: &path,
                        volume_number: volume,
                        total_pages: 0,
                        title: Some("Great Book"),
                        author: Some("Unknown"),
                    })
                    .unwrap()
            })
            .collect();
        (book, files)
    }

    #[test]
    fn users_are_unique_by_username() {
        let conn = db::open_in_memory().unwrap();
        let catalog = Catalog::new(&conn);
        let first = catalog.find_or_create_user("reader").unwrap();
        let second = catalog.find_or_create_user("reader").unwrap();
        assert_eq!(first, second);
        assert_eq!(catalog.user(first.id).unwrap(), Some(first));
    }

    #[test]
    fn file_paths_are_unique() {
        let conn = db::open_in_memory().unwrap();
        let (book, files) = seed(&conn);
        let catalog = Catalog::new(&conn);
        let duplicate = catalog.insert_file(&NewFile {
            book_id: book.id,
            file_path: &files[0].file_path,
            volume_number: 9,
            total_pages: 0,
            title: None,
            author: None,
        });
        assert!(duplicate.is_err());
        assert_eq!(catalog.all_file_paths().unwrap().len(), 3);
    }

    #[test]
    fn reading_states_are_fetched_for_requested_files_only() {
        let conn = db::open_in_memory().unwrap();
        let (_, files) = seed(&conn);
        let catalog = Catalog::new(&conn);
        let user = catalog.find_or_create_user("reader").unwrap();
        let other = catalog.find_or_create_user("other").unwrap();
        catalog.touch_reading_state(user.id, files[0].id, Utc::now()).unwrap();
        catalog.touch_reading_state(user.id, files[2].id, Utc::now()).unwrap();
        catalog.touch_reading_state(other.id, files[1].id, Utc::now()).unwrap();

        let states = catalog
            .reading_states_for_files(user.id, &[files[0].id, files[1].id])
            .unwrap();
        assert_eq!(states.len(), 1);
        assert!(states.contains_key(&files[0].id));
    }

    #[test]
    fn book_page_filters_case_insensitively() {
        let conn = db::open_in_memory().unwrap();
        let catalog = Catalog::new(&conn);
        for title in ["Alpha", "beta", "Gamma Beta", "Delta"] {
            catalog.create_book(title, "Unknown").unwrap();
        }

        let (ids, total) = catalog.book_page(Some("BETA"), 1, 10).unwrap();
        assert_eq!(total, 2);
        let titles: Vec<String> = ids
            .iter()
            .map(|id| catalog.book(*id).unwrap().unwrap().title)
            .collect();
        assert_eq!(titles, vec!["Gamma Beta", "beta"]);

        let (page_two, total) = catalog.book_page(None, 2, 3).unwrap();
        assert_eq!(total, 4);
        assert_eq!(page_two.len(), 1);
    }

    #[test]
    fn book_page_folds_non_ascii_case() {
        let conn = db::open_in_memory().unwrap();
        let catalog = Catalog::new(&conn);
        let summer = catalog.create_book("L'été meurtrier", "Unknown").unwrap();
        catalog.create_book("Winter", "Unknown").unwrap();

        let (ids, total) = catalog.book_page(Some("ÉTÉ"), 1, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(ids, vec![summer.id]);
    }

    #[test]
    fn patch_overwrites_supplied_fields_only() {
        let conn = db::open_in_memory().unwrap();
        let (book, _) = seed(&conn);
        let catalog = Catalog::new(&conn);
        let updated = catalog
            .update_book(
                book.id,
                &MetadataPatch {
                    author: Some("Jane Doe".to_string()),
                    ..MetadataPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Great Book");
        assert_eq!(updated.author.as_deref(), Some("Jane Doe"));
        assert!(catalog.update_book(999, &MetadataPatch::default()).unwrap().is_none());
    }

    #[test]
    fn delete_book_cascades_to_files_and_states() {
        let conn = db::open_in_memory().unwrap();
        let (book, files) = seed(&conn);
        let catalog = Catalog::new(&conn);
        let user = catalog.find_or_create_user("reader").unwrap();
        catalog.touch_reading_state(user.id, files[0].id, Utc::now()).unwrap();

        assert!(catalog.delete_book(book.id).unwrap());
        assert!(catalog.all_files().unwrap().is_empty());
        assert!(catalog.last_read_state(user.id).unwrap().is_none());
        assert!(!catalog.delete_book(book.id).unwrap());
    }

    #[test]
    fn next_volume_follows_volume_numbers() {
        let conn = db::open_in_memory().unwrap();
        let (book, files) = seed(&conn);
        let catalog = Catalog::new(&conn);
        assert_eq!(catalog.next_volume(book.id, 1).unwrap(), Some(files[1].id));
        assert_eq!(catalog.next_volume(book.id, 3).unwrap(), None);
    }
}
