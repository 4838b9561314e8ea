use lopdf::Document;
use std::path::Path;

use crate::error::{LibraryError, Result};

/// Counts the pages of a PDF on disk.
pub trait PageCounter: Send + Sync {
    fn count_pages(&self, path: &Path) -> Result<i64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfPageCounter;

impl PageCounter for LopdfPageCounter {
    fn count_pages(&self, path: &Path) -> Result<i64> {
        let doc = Document::load(path)
            .map_err(|err| LibraryError::Pdf(format!("{}: {}", path.display(), err)))?;
        Ok(doc.get_pages().len() as i64)
    }
}
