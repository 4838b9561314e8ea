use rusqlite::Connection;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub books_checked: usize,
    pub books_updated: usize,
}

/// Recomputes `total_volumes` for every book from its file rows, writing
/// only the books whose cached count is stale. Runs in one transaction; any
/// failure rolls the whole pass back.
pub fn recount_volumes(conn: &mut Connection) -> Result<AggregateReport> {
    let tx = conn.transaction()?;
    let mut report = AggregateReport::default();
    {
        let catalog = Catalog::new(&tx);
        for count in catalog.volume_counts()? {
            report.books_checked += 1;
            if count.total_volumes != count.file_count {
                catalog.set_total_volumes(count.book_id, count.file_count)?;
                report.books_updated += 1;
            }
        }
    }
    tx.commit()?;

    log::info!(
        "volume counts checked={} updated={}",
        report.books_checked,
        report.books_updated
    );
    Ok(report)
}
