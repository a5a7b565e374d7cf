use crate::error::DbError;
use chaindb_datastore::{RowId, TableDescriptor};
use chaindb_primitives::{Name, TableId};
use core::hash::Hash;
use nohash_hasher::IntMap;
use std::collections::HashMap;

/// A by-value snapshot of a table descriptor.
///
/// End handles keep pointing at their table through one of these, so they
/// stay navigable even after the descriptor itself is removed (a table with
/// zero rows is dropped eagerly, its end handles are not).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CachedTable {
    pub id: TableId,
    pub code: Name,
    pub scope: Name,
    pub table: Name,
}

impl From<&TableDescriptor> for CachedTable {
    fn from(desc: &TableDescriptor) -> Self {
        Self {
            id: desc.id,
            code: desc.code,
            scope: desc.scope,
            table: desc.table,
        }
    }
}

/// Translates row references into the small signed handles guest code holds.
///
/// Handle values partition as follows:
/// - `h >= 0`: a live handle, an index into `iterator_to_row`;
/// - `h == -1`: the "invalid / not found / no table" sentinel;
/// - `h <= -2`: the end handle of the table at `end_iterator_to_table[-h - 2]`.
///
/// Rows are held by value and re-resolved against the store on use, so a
/// handle never dangles; removing a row turns its slot into a tombstone that
/// dereferences to a deterministic failure. Handles are never reused within
/// the lifetime of the cache, and `add` returns the existing handle when the
/// same row is cached twice — handle equality is row identity.
pub struct IteratorCache<R = RowId> {
    table_cache: IntMap<TableId, (CachedTable, i32)>,
    end_iterator_to_table: Vec<CachedTable>,
    iterator_to_row: Vec<Option<R>>,
    row_to_iterator: HashMap<R, i32>,
}

impl<R: Copy + Eq + Hash> IteratorCache<R> {
    pub fn new() -> Self {
        Self {
            table_cache: IntMap::default(),
            end_iterator_to_table: Vec::with_capacity(8),
            iterator_to_row: Vec::with_capacity(32),
            row_to_iterator: HashMap::new(),
        }
    }

    /// Returns the end handle of `table`, allocating one on first sight.
    /// Idempotent.
    pub fn cache_table(&mut self, table: CachedTable) -> i32 {
        if let Some(&(_, end)) = self.table_cache.get(&table.id) {
            return end;
        }
        let end = Self::index_to_end_iterator(self.end_iterator_to_table.len());
        self.end_iterator_to_table.push(table);
        self.table_cache.insert(table.id, (table, end));
        end
    }

    /// The cached snapshot for `id`. The table must have been cached.
    pub fn cached_table(&self, id: TableId) -> Result<&CachedTable, DbError> {
        self.table_cache
            .get(&id)
            .map(|(table, _)| table)
            .ok_or(DbError::InvariantViolation("table should be in cache"))
    }

    /// The end handle for `id`. The table must have been cached.
    pub fn end_iterator_by_table_id(&self, id: TableId) -> Result<i32, DbError> {
        self.table_cache
            .get(&id)
            .map(|&(_, end)| end)
            .ok_or(DbError::InvariantViolation("table should be in cache"))
    }

    /// Decodes an end handle back to its table. Fails on anything that is
    /// not an end handle; returns `None` when the decoded index was never
    /// allocated.
    pub fn find_table_by_end_iterator(&self, iterator: i32) -> Result<Option<&CachedTable>, DbError> {
        if iterator >= -1 {
            return Err(DbError::InvalidHandle(iterator));
        }
        Ok(self.end_iterator_to_table.get(Self::end_iterator_to_index(iterator)))
    }

    /// Resolves a live handle to its row. Fails on the `-1` sentinel, on end
    /// handles, on out-of-range handles, and on tombstones.
    pub fn get(&self, iterator: i32) -> Result<R, DbError> {
        let row = usize::try_from(iterator)
            .ok()
            .and_then(|i| self.iterator_to_row.get(i))
            .copied()
            .flatten();
        row.ok_or(DbError::InvalidHandle(iterator))
    }

    /// Turns a live handle into a tombstone. Idempotent on already-removed
    /// handles; end handles and the sentinel are rejected.
    pub fn remove(&mut self, iterator: i32) -> Result<(), DbError> {
        let slot = usize::try_from(iterator)
            .ok()
            .and_then(|i| self.iterator_to_row.get_mut(i))
            .ok_or(DbError::InvalidHandle(iterator))?;
        if let Some(row) = slot.take() {
            self.row_to_iterator.remove(&row);
        }
        Ok(())
    }

    /// Tombstones whatever handle currently refers to `row`, if any. Used
    /// when a mutation elsewhere invalidates the row out from under the
    /// guest's handles.
    pub fn remove_row(&mut self, row: &R) {
        if let Some(iterator) = self.row_to_iterator.remove(row) {
            self.iterator_to_row[iterator as usize] = None;
        }
    }

    /// Returns the handle for `row`, allocating the next one on first sight.
    /// Monotonic: the same row always resolves to the same handle.
    pub fn add(&mut self, row: R) -> i32 {
        if let Some(&iterator) = self.row_to_iterator.get(&row) {
            return iterator;
        }
        debug_assert!(self.iterator_to_row.len() < i32::MAX as usize);
        let iterator = self.iterator_to_row.len() as i32;
        self.iterator_to_row.push(Some(row));
        self.row_to_iterator.insert(row, iterator);
        iterator
    }

    /// Precondition: `iterator < -1`.
    fn end_iterator_to_index(iterator: i32) -> usize {
        (-iterator - 2) as usize
    }

    /// Precondition: `index <= i32::MAX - 2`.
    fn index_to_end_iterator(index: usize) -> i32 {
        -(index as i32 + 2)
    }
}

impl<R: Copy + Eq + Hash> Default for IteratorCache<R> {
    fn default() -> Self {
        Self::new()
    }
}
