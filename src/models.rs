use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub total_volumes: i64,
    pub cover_url: Option<String>,
}

/// One physical PDF. `total_pages == 0` means the page count has not been
/// read yet.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BookFile {
    pub id: i64,
    pub book_id: i64,
    pub file_path: String,
    pub volume_number: i64,
    pub total_pages: i64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub cover_url: Option<String>,
}

impl BookFile {
    pub fn needs_page_count(&self) -> bool {
        self.total_pages == 0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReadingState {
    pub id: i64,
    pub user_id: i64,
    pub file_id: i64,
    pub current_page: i64,
    pub last_read_at: DateTime<Utc>,
}

/// A file as shown to one user: overrides resolved against the owning book
/// and progress attached.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileView {
    pub id: i64,
    pub book_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub volume_number: i64,
    pub current_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BookGroup {
    pub book: Book,
    pub files: Vec<FileView>,
    pub volume_count: usize,
    pub cover_file: FileView,
}

/// Field overwrite for a book or a file. `None` leaves the column alone.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub cover_url: Option<String>,
}
