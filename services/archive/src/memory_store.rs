use crate::filter_compiler::CompiledFilter;
use crate::metadata_store::{Page, RecordingStore};
use crate::recording::{NewStorageRow, StorageRow};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use tracing::trace;

/// Recording store held in memory.
///
/// Evaluates compiled filters with the same matching, ordering and paging
/// rules as the PostgreSQL store.
#[derive(Default)]
pub struct MemoryRecordingStore {
    rows: RwLock<Vec<StorageRow>>,
    last_id: AtomicI64,
}

impl MemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row and return the assigned identity
    pub fn insert_row(&self, row: NewStorageRow) -> Result<i64> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut rows = self
            .rows
            .write()
            .map_err(|_| anyhow!("recording store lock poisoned"))?;
        rows.push(row.into_row(id));
        trace!(id, "Row stored in memory");
        Ok(id)
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Most recent first, undated last, then highest id first
fn newest_first(a: &StorageRow, b: &StorageRow) -> CmpOrdering {
    match (a.recording_date, b.recording_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
    .then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl RecordingStore for MemoryRecordingStore {
    async fn search(&self, filter: &CompiledFilter, page: Option<Page>) -> Result<Vec<StorageRow>> {
        let matcher = filter.matcher()?;
        let rows = self
            .rows
            .read()
            .map_err(|_| anyhow!("recording store lock poisoned"))?;

        let mut found: Vec<StorageRow> = rows.iter().filter(|r| matcher.matches(r)).cloned().collect();
        found.sort_by(newest_first);

        if let Some(page) = page {
            let offset = usize::try_from(page.offset.max(0)).unwrap_or(usize::MAX);
            let limit = usize::try_from(page.limit.max(0)).unwrap_or(usize::MAX);
            found = found.into_iter().skip(offset).take(limit).collect();
        }

        Ok(found)
    }

    async fn get(&self, id: i64) -> Result<Option<StorageRow>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| anyhow!("recording store lock poisoned"))?;
        Ok(rows.iter().find(|r| r.id == id).cloned())
    }

    async fn insert(&self, row: &NewStorageRow) -> Result<()> {
        self.insert_row(row.clone())?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
