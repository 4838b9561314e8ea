pub mod filename;
pub mod pdf;

pub use filename::{parse_file_stem, ParsedName};
pub use pdf::{LopdfPageCounter, PageCounter};
