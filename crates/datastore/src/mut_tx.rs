use crate::error::DatastoreError;
use crate::index::{Sealed, SecondaryEntry, SecondaryIndexState, SecondaryKey};
use crate::state::StateStore;
use crate::table::{KeyValueRow, RowId, TableDescriptor, TableLocator};
use crate::Result;
use chaindb_primitives::{F64Bits, Name, TableId};
use ethnum::U256;
use std::collections::btree_map::Entry;
use std::ops::Bound;

/// A mutable transaction over the [`StateStore`].
///
/// Every mutation pushes the entry that undoes it. Dropping the transaction
/// without calling [`MutTx::commit`] leaves the mutations in place — the host
/// must call [`MutTx::rollback`] explicitly to discard them, which replays
/// the log in LIFO order and restores the store bit-for-bit, table-id
/// counter included.
pub struct MutTx<'a> {
    store: &'a mut StateStore,
    undo: Vec<UndoEntry>,
}

pub(crate) enum UndoEntry {
    TableCreated(TableId),
    TableRemoved(TableDescriptor),
    RowInserted(RowId),
    RowUpdated(RowId, KeyValueRow),
    RowRemoved(RowId, KeyValueRow),
    IdxU64(SecondaryUndo<u64>),
    IdxU128(SecondaryUndo<u128>),
    IdxU256(SecondaryUndo<U256>),
    IdxDouble(SecondaryUndo<F64Bits>),
}

pub(crate) enum SecondaryUndo<K> {
    Inserted(RowId),
    Updated(RowId, SecondaryEntry<K>),
    Removed(RowId, SecondaryEntry<K>),
}

impl<'a> MutTx<'a> {
    pub(crate) fn new(store: &'a mut StateStore) -> Self {
        Self {
            store,
            undo: Vec::new(),
        }
    }

    /// Makes every mutation of this transaction permanent.
    pub fn commit(self) {
        log::trace!("commit: {} mutations", self.undo.len());
    }

    /// Discards every mutation of this transaction.
    pub fn rollback(mut self) {
        log::trace!("rollback: {} mutations", self.undo.len());
        while let Some(entry) = self.undo.pop() {
            apply_undo(self.store, entry);
        }
    }

    /// Read-only view of the store as this transaction sees it.
    pub fn state(&self) -> &StateStore {
        self.store
    }

    pub fn find_table(&self, code: Name, scope: Name, table: Name) -> Option<&TableDescriptor> {
        self.store.find_table(code, scope, table)
    }

    pub fn table(&self, id: TableId) -> Option<&TableDescriptor> {
        self.store.tables.get(&id)
    }

    pub fn create_table(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        payer: Name,
    ) -> Result<TableId> {
        let locator = TableLocator::new(code, scope, table);
        if self.store.tables_by_locator.contains_key(&locator) {
            return Err(DatastoreError::TableExists(locator));
        }
        let id = self.store.next_table_id;
        self.store.next_table_id = id.next();
        log::debug!("creating table {locator} as {id}");
        self.store.tables_by_locator.insert(locator, id);
        self.store.tables.insert(
            id,
            TableDescriptor {
                id,
                code,
                scope,
                table,
                payer,
                row_count: 0,
            },
        );
        self.undo.push(UndoEntry::TableCreated(id));
        Ok(id)
    }

    /// Removes an empty table descriptor.
    pub fn remove_table(&mut self, id: TableId) -> Result<()> {
        let desc = self.store.tables.get(&id).ok_or(DatastoreError::NoSuchTable(id))?;
        if desc.row_count != 0 {
            return Err(DatastoreError::TableNotEmpty(id, desc.row_count));
        }
        let desc = self.store.tables.remove(&id).expect("descriptor vanished during removal");
        log::debug!("removing table {} ({id})", desc.locator());
        self.store.tables_by_locator.remove(&desc.locator());
        self.undo.push(UndoEntry::TableRemoved(desc));
        Ok(())
    }

    pub fn row(&self, row: RowId) -> Option<&KeyValueRow> {
        self.store.rows.get(&row)
    }

    pub fn insert_row(&mut self, row: RowId, payer: Name, value: &[u8]) -> Result<()> {
        if !self.store.tables.contains_key(&row.table_id) {
            return Err(DatastoreError::NoSuchTable(row.table_id));
        }
        match self.store.rows.entry(row) {
            Entry::Occupied(_) => Err(DatastoreError::DuplicateRow(row)),
            Entry::Vacant(slot) => {
                slot.insert(KeyValueRow {
                    payer,
                    value: value.to_vec(),
                });
                bump_row_count(self.store, row.table_id, 1);
                self.undo.push(UndoEntry::RowInserted(row));
                Ok(())
            }
        }
    }

    /// Replaces a row's payload and payer, returning the previous row.
    pub fn update_row(&mut self, row: RowId, payer: Name, value: &[u8]) -> Result<KeyValueRow> {
        let slot = self
            .store
            .rows
            .get_mut(&row)
            .ok_or(DatastoreError::NoSuchRow(row))?;
        let old = std::mem::replace(
            slot,
            KeyValueRow {
                payer,
                value: value.to_vec(),
            },
        );
        self.undo.push(UndoEntry::RowUpdated(row, old.clone()));
        Ok(old)
    }

    pub fn remove_row(&mut self, row: RowId) -> Result<KeyValueRow> {
        let old = self
            .store
            .rows
            .remove(&row)
            .ok_or(DatastoreError::NoSuchRow(row))?;
        bump_row_count(self.store, row.table_id, -1);
        self.undo.push(UndoEntry::RowRemoved(row, old.clone()));
        Ok(old)
    }

    /// The row following `row` in global `(table_id, primary)` order.
    /// Callers decide what crossing a table boundary means.
    pub fn next_row(&self, row: RowId) -> Option<RowId> {
        self.store
            .rows
            .range((Bound::Excluded(row), Bound::Unbounded))
            .next()
            .map(|(&r, _)| r)
    }

    /// The row preceding `row` in global `(table_id, primary)` order.
    pub fn prev_row(&self, row: RowId) -> Option<RowId> {
        self.store.rows.range(..row).next_back().map(|(&r, _)| r)
    }

    /// First row `>= from` in global order.
    pub fn lower_bound_row(&self, from: RowId) -> Option<RowId> {
        self.store.rows.range(from..).next().map(|(&r, _)| r)
    }

    /// First row `> from` in global order.
    pub fn upper_bound_row(&self, from: RowId) -> Option<RowId> {
        self.store
            .rows
            .range((Bound::Excluded(from), Bound::Unbounded))
            .next()
            .map(|(&r, _)| r)
    }

    /// The row with the greatest primary key within `table_id`.
    pub fn last_row_in_table(&self, table_id: TableId) -> Option<RowId> {
        self.store
            .rows
            .range(..=RowId::new(table_id, u64::MAX))
            .next_back()
            .map(|(&r, _)| r)
            .filter(|r| r.table_id == table_id)
    }

    pub fn secondary<K: SecondaryKey>(&self) -> &SecondaryIndexState<K> {
        K::state(self.store)
    }

    /// Installs a secondary key for an existing table. At most one entry per
    /// `(table, primary)` per key type.
    pub fn secondary_insert<K: SecondaryKey>(
        &mut self,
        row: RowId,
        key: K,
        payer: Name,
    ) -> Result<()> {
        if !self.store.tables.contains_key(&row.table_id) {
            return Err(DatastoreError::NoSuchTable(row.table_id));
        }
        K::state_mut(self.store).insert_raw(row, key, payer)?;
        bump_row_count(self.store, row.table_id, 1);
        self.undo.push(K::wrap_undo(SecondaryUndo::Inserted(row)));
        Ok(())
    }

    /// Replaces the key and payer of an installed secondary entry, returning
    /// the previous entry.
    pub fn secondary_update<K: SecondaryKey>(
        &mut self,
        row: RowId,
        key: K,
        payer: Name,
    ) -> Result<SecondaryEntry<K>> {
        let old = K::state_mut(self.store).replace_raw(row, key, payer)?;
        self.undo.push(K::wrap_undo(SecondaryUndo::Updated(row, old)));
        Ok(old)
    }

    pub fn secondary_remove<K: SecondaryKey>(&mut self, row: RowId) -> Result<SecondaryEntry<K>> {
        let old = K::state_mut(self.store).remove_raw(row)?;
        bump_row_count(self.store, row.table_id, -1);
        self.undo.push(K::wrap_undo(SecondaryUndo::Removed(row, old)));
        Ok(old)
    }

    pub fn is_account(&self, account: Name) -> bool {
        self.store.is_account(account)
    }
}

fn bump_row_count(store: &mut StateStore, table_id: TableId, delta: i64) {
    let desc = store
        .tables
        .get_mut(&table_id)
        .expect("row count change for a table that does not exist");
    desc.row_count = desc
        .row_count
        .checked_add_signed(delta)
        .expect("table row count underflow");
}

fn apply_undo(store: &mut StateStore, entry: UndoEntry) {
    match entry {
        UndoEntry::TableCreated(id) => {
            let desc = store
                .tables
                .remove(&id)
                .expect("undo of table creation: descriptor missing");
            store.tables_by_locator.remove(&desc.locator());
            store.next_table_id = id;
        }
        UndoEntry::TableRemoved(desc) => {
            store.tables_by_locator.insert(desc.locator(), desc.id);
            store.tables.insert(desc.id, desc);
        }
        UndoEntry::RowInserted(row) => {
            store.rows.remove(&row);
            bump_row_count(store, row.table_id, -1);
        }
        UndoEntry::RowUpdated(row, old) => {
            store.rows.insert(row, old);
        }
        UndoEntry::RowRemoved(row, old) => {
            store.rows.insert(row, old);
            bump_row_count(store, row.table_id, 1);
        }
        UndoEntry::IdxU64(op) => undo_secondary::<u64>(store, op),
        UndoEntry::IdxU128(op) => undo_secondary::<u128>(store, op),
        UndoEntry::IdxU256(op) => undo_secondary::<U256>(store, op),
        UndoEntry::IdxDouble(op) => undo_secondary::<F64Bits>(store, op),
    }
}

fn undo_secondary<K: SecondaryKey>(store: &mut StateStore, op: SecondaryUndo<K>) {
    match op {
        SecondaryUndo::Inserted(row) => {
            K::state_mut(store)
                .remove_raw(row)
                .expect("undo of secondary insert: entry missing");
            bump_row_count(store, row.table_id, -1);
        }
        SecondaryUndo::Updated(row, old) => {
            K::state_mut(store)
                .replace_raw(row, old.key, old.payer)
                .expect("undo of secondary update: entry missing");
        }
        SecondaryUndo::Removed(row, old) => {
            K::state_mut(store)
                .insert_raw(row, old.key, old.payer)
                .expect("undo of secondary removal: entry already present");
            bump_row_count(store, row.table_id, 1);
        }
    }
}
