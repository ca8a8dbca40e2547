//! Cursor-driven iteration over a partition.

use tracing::debug;

use crate::codec::{Cursor, Dimension};
use crate::context::OpContext;
use crate::store::{CellStore, ScanPage};
use crate::{Cell, CellError, Result};

/// Walks a partition page by page, feeding each page's largest dimension
/// value back as the next cursor.
///
/// Complete on `addedAt`. On `createdAt` a cell sharing its second with the
/// last cell of the previous page is skipped, since the cursor is strict.
#[derive(Debug)]
pub struct PartitionPager {
    store: CellStore,
    dimension: Dimension,
    cursor: Cursor,
    page_size: i64,
    done: bool,
}

impl PartitionPager {
    /// # Errors
    ///
    /// `InvalidLimit` if `page_size` is not positive.
    pub fn new(
        store: CellStore,
        dimension: Dimension,
        start: Cursor,
        page_size: i64,
    ) -> Result<Self> {
        if page_size < 1 {
            return Err(CellError::InvalidLimit(page_size));
        }
        Ok(Self {
            store,
            dimension,
            cursor: start,
            page_size,
            done: false,
        })
    }

    /// Cursor the next page will start after.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next page, or `None` once the partition is exhausted.
    ///
    /// A failed fetch leaves the cursor where it was, so the call can be
    /// repeated.
    pub async fn next_page(&mut self, ctx: &OpContext) -> Result<Option<ScanPage>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .store
            .partition_scan_dimension(ctx, self.dimension, &self.cursor, self.page_size)
            .await?;

        match page.next_cursor() {
            Some(next) => {
                debug!(
                    dimension = %self.dimension,
                    cells = page.len(),
                    "Partition pager advanced"
                );
                if (page.len() as i64) < self.page_size {
                    self.done = true;
                }
                self.cursor = next;
                Ok(Some(page))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Drain the remaining pages into one vector.
    pub async fn collect_all(mut self, ctx: &OpContext) -> Result<Vec<Cell>> {
        let mut cells = Vec::new();
        while let Some(page) = self.next_page(ctx).await? {
            cells.extend(page.cells);
        }
        Ok(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use chrono::{TimeZone, Utc};

    async fn store_with(count: i64) -> CellStore {
        let store = CellStore::open(StoreConfig::default()).await.unwrap();
        let ctx = OpContext::background();
        for i in 0..count {
            let cell = Cell::new("row", "col", i, format!("v{}", i));
            store.put_cell(&ctx, "row", "col", i, &cell).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_pager_visits_every_cell_once() {
        let store = store_with(7).await;
        let ctx = OpContext::background();

        let mut pager =
            PartitionPager::new(store, Dimension::AddedAt, Cursor::SequenceNumber(0), 3).unwrap();

        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        while let Some(page) = pager.next_page(&ctx).await.unwrap() {
            sizes.push(page.len());
            seen.extend(page.cells.iter().map(|c| c.added_at));
        }

        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(seen, (1..=7).collect::<Vec<i64>>());
        assert!(pager.is_done());
        assert!(pager.next_page(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pager_exact_multiple_ends_on_empty_page() {
        let store = store_with(4).await;
        let ctx = OpContext::background();

        let pager =
            PartitionPager::new(store, Dimension::AddedAt, Cursor::SequenceNumber(0), 2).unwrap();
        let cells = pager.collect_all(&ctx).await.unwrap();
        assert_eq!(cells.len(), 4);
    }

    #[tokio::test]
    async fn test_pager_on_created_at() {
        let store = CellStore::open(StoreConfig::default()).await.unwrap();
        let ctx = OpContext::background();
        for i in 0..5 {
            let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, i as u32).unwrap();
            let cell = Cell::new("row", "col", i, "x").with_created_at(ts);
            store.put_cell(&ctx, "row", "col", i, &cell).await.unwrap();
        }

        let start = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
        let pager = PartitionPager::new(store, Dimension::CreatedAt, start.into(), 2).unwrap();
        let cells = pager.collect_all(&ctx).await.unwrap();

        let refs: Vec<i64> = cells.iter().map(|c| c.ref_key).collect();
        assert_eq!(refs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pager_rejects_non_positive_page_size() {
        let store = store_with(0).await;
        let err = PartitionPager::new(store, Dimension::AddedAt, Cursor::SequenceNumber(0), 0)
            .unwrap_err();
        assert_eq!(err, CellError::InvalidLimit(0));
    }

    #[tokio::test]
    async fn test_empty_partition() {
        let store = store_with(0).await;
        let ctx = OpContext::background();
        let mut pager =
            PartitionPager::new(store, Dimension::AddedAt, Cursor::SequenceNumber(0), 10).unwrap();
        assert!(pager.next_page(&ctx).await.unwrap().is_none());
        assert!(pager.is_done());
    }
}
