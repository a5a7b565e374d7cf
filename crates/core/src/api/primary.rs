//! The primary 64-bit-keyed row operations of the guest ABI.
//!
//! All mutating operations require that the executing contract owns the
//! table (`code == receiver`); lookups may cross namespaces and only record
//! read intent. Navigation is in `(table_id, primary_key)` order and falls
//! off to the table's end handle instead of crossing into a neighbour.

use super::DatabaseApi;
use crate::energy::BASE_ROW_FEE;
use crate::error::DbError;
use crate::Result;
use chaindb_datastore::RowId;
use chaindb_primitives::Name;

impl<'db> DatabaseApi<'db> {
    /// Inserts a row under `(receiver, scope, table)`, creating the table on
    /// first use, and returns its live handle.
    pub fn db_store_i64(
        &mut self,
        scope: Name,
        table: Name,
        payer: Name,
        id: u64,
        value: &[u8],
    ) -> Result<i32> {
        if payer.is_empty() {
            return Err(DbError::MissingAuth {
                actor: payer,
                permission: None,
            });
        }
        self.gate.require_write_lock(scope);
        let receiver = self.receiver;
        let tab = self.find_or_create_table(receiver, scope, table, payer)?;
        let row = RowId::new(tab.id, id);
        self.tx.insert_row(row, payer, value)?;
        self.meter
            .update_db_usage(payer, value.len() as i64 + BASE_ROW_FEE as i64)?;
        self.keyval_cache.cache_table(tab);
        Ok(self.keyval_cache.add(row))
    }

    /// Replaces a row's payload, rebilling if the payer changes.
    pub fn db_update_i64(&mut self, iterator: i32, payer: Name, value: &[u8]) -> Result<()> {
        let row = self.keyval_cache.get(iterator)?;
        let old = self
            .tx
            .row(row)
            .cloned()
            .ok_or(DbError::InvariantViolation("live iterator refers to a missing row"))?;
        let desc = self
            .tx
            .table(row.table_id)
            .ok_or(DbError::InvariantViolation("row belongs to a missing table"))?;
        let (code, scope) = (desc.code, desc.scope);
        if code != self.receiver {
            return Err(self.access_violation(code));
        }
        self.gate.require_write_lock(scope);

        let payer = if payer.is_empty() { old.payer } else { payer };
        let overhead = BASE_ROW_FEE as i64;
        let old_size = old.value.len() as i64 + overhead;
        let new_size = value.len() as i64 + overhead;
        if old.payer != payer {
            self.meter.update_db_usage(old.payer, -old_size)?;
            self.meter.update_db_usage(payer, new_size)?;
        } else {
            self.meter.update_db_usage(payer, new_size - old_size)?;
        }
        self.tx.update_row(row, payer, value)?;
        Ok(())
    }

    /// Removes a row, its secondary entries of every type, and — when the
    /// table empties out — the table itself.
    pub fn db_remove_i64(&mut self, iterator: i32) -> Result<()> {
        let row = self.keyval_cache.get(iterator)?;
        let desc = self
            .tx
            .table(row.table_id)
            .ok_or(DbError::InvariantViolation("row belongs to a missing table"))?;
        let (code, scope) = (desc.code, desc.scope);
        if code != self.receiver {
            return Err(self.access_violation(code));
        }
        self.gate.require_write_lock(scope);

        let old = self.tx.remove_row(row)?;
        self.meter
            .update_db_usage(old.payer, -(old.value.len() as i64 + BASE_ROW_FEE as i64))?;
        self.cascade_remove_secondary(row)?;
        self.keyval_cache.remove(iterator)?;

        let empty = self.tx.table(row.table_id).map_or(false, |t| t.row_count == 0);
        if empty {
            self.tx.remove_table(row.table_id)?;
        }
        Ok(())
    }

    /// Copies at most `buffer.len()` bytes of the row's payload and returns
    /// the full payload length. An empty buffer asks for the length only.
    pub fn db_get_i64(&self, iterator: i32, buffer: &mut [u8]) -> Result<usize> {
        let row = self.keyval_cache.get(iterator)?;
        let kv = self
            .tx
            .row(row)
            .ok_or(DbError::InvariantViolation("live iterator refers to a missing row"))?;
        let copy = kv.value.len().min(buffer.len());
        buffer[..copy].copy_from_slice(&kv.value[..copy]);
        Ok(kv.value.len())
    }

    /// Steps forward in primary order. Stepping past the last row of the
    /// table returns its end handle; stepping from an end handle returns
    /// `-1`.
    pub fn db_next_i64(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        if iterator < -1 {
            return Ok(-1); // cannot step past the end
        }
        let row = self.keyval_cache.get(iterator)?;
        match self.tx.next_row(row) {
            Some(next) if next.table_id == row.table_id => {
                *primary = next.primary;
                Ok(self.keyval_cache.add(next))
            }
            _ => self.keyval_cache.end_iterator_by_table_id(row.table_id),
        }
    }

    /// Steps backward in primary order. From an end handle this lands on the
    /// table's last row, or `-1` if the table is empty.
    pub fn db_previous_i64(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        if iterator < -1 {
            let tab = self
                .keyval_cache
                .find_table_by_end_iterator(iterator)?
                .ok_or(DbError::InvalidHandle(iterator))?;
            let table_id = tab.id;
            let Some(last) = self.tx.last_row_in_table(table_id) else {
                return Ok(-1);
            };
            *primary = last.primary;
            return Ok(self.keyval_cache.add(last));
        }
        let row = self.keyval_cache.get(iterator)?;
        match self.tx.prev_row(row) {
            Some(prev) if prev.table_id == row.table_id => {
                *primary = prev.primary;
                Ok(self.keyval_cache.add(prev))
            }
            _ => Ok(-1),
        }
    }

    /// Point lookup: the row's handle, the table's end handle when the id is
    /// absent, or `-1` when the table itself is.
    pub fn db_find_i64(&mut self, code: Name, scope: Name, table: Name, id: u64) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = self.keyval_cache.cache_table(tab);
        let row = RowId::new(tab.id, id);
        if self.tx.row(row).is_some() {
            Ok(self.keyval_cache.add(row))
        } else {
            Ok(end)
        }
    }

    /// First row with primary key `>= id`, clamped to the table.
    pub fn db_lowerbound_i64(&mut self, code: Name, scope: Name, table: Name, id: u64) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = self.keyval_cache.cache_table(tab);
        match self.tx.lower_bound_row(RowId::new(tab.id, id)) {
            Some(row) if row.table_id == tab.id => Ok(self.keyval_cache.add(row)),
            _ => Ok(end),
        }
    }

    /// First row with primary key `> id`, clamped to the table.
    pub fn db_upperbound_i64(&mut self, code: Name, scope: Name, table: Name, id: u64) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = self.keyval_cache.cache_table(tab);
        match self.tx.upper_bound_row(RowId::new(tab.id, id)) {
            Some(row) if row.table_id == tab.id => Ok(self.keyval_cache.add(row)),
            _ => Ok(end),
        }
    }

    /// The table's end handle, or `-1` if there is no such table.
    pub fn db_end_i64(&mut self, code: Name, scope: Name, table: Name) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        Ok(self.keyval_cache.cache_table(tab))
    }
}
