use crate::error::DatastoreError;
use crate::mut_tx::{SecondaryUndo, UndoEntry};
use crate::state::StateStore;
use crate::table::RowId;
use chaindb_primitives::{F64Bits, Name, TableId};
use core::fmt;
use core::hash::Hash;
use ethnum::U256;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Which typed secondary index a key or error belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IndexKind {
    U64,
    U128,
    U256,
    Double,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::U64 => "u64",
            IndexKind::U128 => "u128",
            IndexKind::U256 => "u256",
            IndexKind::Double => "double",
        })
    }
}

mod private {
    use super::*;

    /// Routes a key type to its concrete index state and undo arm. Sealed:
    /// the engine supports exactly the four key families below.
    pub trait Sealed: Sized {
        fn state(store: &StateStore) -> &SecondaryIndexState<Self>;
        fn state_mut(store: &mut StateStore) -> &mut SecondaryIndexState<Self>;
        fn wrap_undo(op: SecondaryUndo<Self>) -> UndoEntry;
    }
}

pub(crate) use private::Sealed;

/// A stored secondary key type.
///
/// This is the compile-time parameter of the whole secondary engine: one
/// [`SecondaryIndexState`] exists per implementor, and everything above it
/// (transaction ops, iterator caches, the guest ABI) is generic over it.
pub trait SecondaryKey: Copy + Ord + Eq + Hash + fmt::Debug + private::Sealed {
    const KIND: IndexKind;
    /// Least value in key order, usable as a range bound.
    const MIN_KEY: Self;
    /// Greatest value in key order, usable as a range bound.
    const MAX_KEY: Self;
    /// Billable width of the stored key in bytes.
    const BYTE_WIDTH: u64;
}

/// One installed secondary key and the account paying for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SecondaryEntry<K> {
    pub key: K,
    pub payer: Name,
}

/// The dual-ordered state of one typed secondary index.
///
/// `by_primary` holds the authoritative `(table_id, primary) -> entry`
/// mapping; `by_secondary` mirrors it as `(table_id, key, primary)` tuples so
/// key-order navigation is a plain range scan. The two are kept in lockstep
/// by the raw mutators below.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondaryIndexState<K> {
    by_primary: BTreeMap<RowId, SecondaryEntry<K>>,
    by_secondary: BTreeSet<(TableId, K, u64)>,
}

impl<K: SecondaryKey> Default for SecondaryIndexState<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SecondaryKey> SecondaryIndexState<K> {
    pub fn new() -> Self {
        Self {
            by_primary: BTreeMap::new(),
            by_secondary: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_primary.is_empty()
    }

    pub fn get(&self, row: RowId) -> Option<&SecondaryEntry<K>> {
        self.by_primary.get(&row)
    }

    /// Point lookup in key order. With duplicate keys in one table, the
    /// entry with the smallest primary key wins.
    pub fn find_by_key(&self, table_id: TableId, key: K) -> Option<u64> {
        self.by_secondary
            .range((table_id, key, 0)..=(table_id, key, u64::MAX))
            .next()
            .map(|&(_, _, primary)| primary)
    }

    /// First entry in `table_id` whose key is `>= key`.
    pub fn lower_bound(&self, table_id: TableId, key: K) -> Option<(K, u64)> {
        self.by_secondary
            .range((table_id, key, 0)..)
            .next()
            .filter(|&&(t, _, _)| t == table_id)
            .map(|&(_, k, primary)| (k, primary))
    }

    /// First entry in `table_id` whose key is `> key`.
    pub fn upper_bound(&self, table_id: TableId, key: K) -> Option<(K, u64)> {
        self.by_secondary
            .range((Bound::Excluded((table_id, key, u64::MAX)), Bound::Unbounded))
            .next()
            .filter(|&&(t, _, _)| t == table_id)
            .map(|&(_, k, primary)| (k, primary))
    }

    /// Entry following `(key, primary)` in key order, within `table_id`.
    pub fn next_in_table(&self, table_id: TableId, key: K, primary: u64) -> Option<(K, u64)> {
        self.by_secondary
            .range((Bound::Excluded((table_id, key, primary)), Bound::Unbounded))
            .next()
            .filter(|&&(t, _, _)| t == table_id)
            .map(|&(_, k, p)| (k, p))
    }

    /// Entry preceding `(key, primary)` in key order, within `table_id`.
    pub fn prev_in_table(&self, table_id: TableId, key: K, primary: u64) -> Option<(K, u64)> {
        self.by_secondary
            .range(..(table_id, key, primary))
            .next_back()
            .filter(|&&(t, _, _)| t == table_id)
            .map(|&(_, k, p)| (k, p))
    }

    /// Entry with the greatest key within `table_id`.
    pub fn last_in_table(&self, table_id: TableId) -> Option<(K, u64)> {
        self.by_secondary
            .range((table_id, K::MIN_KEY, 0)..=(table_id, K::MAX_KEY, u64::MAX))
            .next_back()
            .map(|&(_, k, p)| (k, p))
    }

    /// First entry of `table_id` in primary order with `primary >= from`.
    pub fn lower_bound_primary(&self, table_id: TableId, from: u64) -> Option<RowId> {
        self.by_primary
            .range(RowId::new(table_id, from)..)
            .next()
            .filter(|(row, _)| row.table_id == table_id)
            .map(|(&row, _)| row)
    }

    /// First entry of `table_id` in primary order with `primary > from`.
    pub fn upper_bound_primary(&self, table_id: TableId, from: u64) -> Option<RowId> {
        self.by_primary
            .range((Bound::Excluded(RowId::new(table_id, from)), Bound::Unbounded))
            .next()
            .filter(|(row, _)| row.table_id == table_id)
            .map(|(&row, _)| row)
    }

    /// Entry following `row` in primary order, within its table.
    pub fn next_primary_in_table(&self, row: RowId) -> Option<RowId> {
        self.upper_bound_primary(row.table_id, row.primary)
    }

    /// Entry preceding `row` in primary order, within its table.
    pub fn prev_primary_in_table(&self, row: RowId) -> Option<RowId> {
        self.by_primary
            .range(..row)
            .next_back()
            .filter(|(prev, _)| prev.table_id == row.table_id)
            .map(|(&prev, _)| prev)
    }

    /// Entry with the greatest primary key within `table_id`.
    pub fn last_primary_in_table(&self, table_id: TableId) -> Option<RowId> {
        self.by_primary
            .range(..=RowId::new(table_id, u64::MAX))
            .next_back()
            .filter(|(row, _)| row.table_id == table_id)
            .map(|(&row, _)| row)
    }

    /// All entries of every table in primary order.
    pub fn entries(&self) -> impl Iterator<Item = (RowId, &SecondaryEntry<K>)> {
        self.by_primary.iter().map(|(&row, entry)| (row, entry))
    }

    /// All entries of `table_id` in primary order.
    pub fn table_entries(&self, table_id: TableId) -> impl Iterator<Item = (RowId, &SecondaryEntry<K>)> {
        self.by_primary
            .range(RowId::new(table_id, 0)..=RowId::new(table_id, u64::MAX))
            .map(|(&row, entry)| (row, entry))
    }

    pub(crate) fn insert_raw(
        &mut self,
        row: RowId,
        key: K,
        payer: Name,
    ) -> Result<(), DatastoreError> {
        match self.by_primary.entry(row) {
            std::collections::btree_map::Entry::Occupied(_) => {
                Err(DatastoreError::DuplicateSecondary { kind: K::KIND, row })
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(SecondaryEntry { key, payer });
                self.by_secondary.insert((row.table_id, key, row.primary));
                Ok(())
            }
        }
    }

    pub(crate) fn replace_raw(
        &mut self,
        row: RowId,
        key: K,
        payer: Name,
    ) -> Result<SecondaryEntry<K>, DatastoreError> {
        let entry = self
            .by_primary
            .get_mut(&row)
            .ok_or(DatastoreError::NoSuchSecondary { kind: K::KIND, row })?;
        let old = *entry;
        *entry = SecondaryEntry { key, payer };
        self.by_secondary.remove(&(row.table_id, old.key, row.primary));
        self.by_secondary.insert((row.table_id, key, row.primary));
        Ok(old)
    }

    pub(crate) fn remove_raw(&mut self, row: RowId) -> Result<SecondaryEntry<K>, DatastoreError> {
        let old = self
            .by_primary
            .remove(&row)
            .ok_or(DatastoreError::NoSuchSecondary { kind: K::KIND, row })?;
        self.by_secondary.remove(&(row.table_id, old.key, row.primary));
        Ok(old)
    }
}

impl private::Sealed for u64 {
    fn state(store: &StateStore) -> &SecondaryIndexState<Self> {
        &store.idx_u64
    }
    fn state_mut(store: &mut StateStore) -> &mut SecondaryIndexState<Self> {
        &mut store.idx_u64
    }
    fn wrap_undo(op: SecondaryUndo<Self>) -> UndoEntry {
        UndoEntry::IdxU64(op)
    }
}

impl SecondaryKey for u64 {
    const KIND: IndexKind = IndexKind::U64;
    const MIN_KEY: Self = u64::MIN;
    const MAX_KEY: Self = u64::MAX;
    const BYTE_WIDTH: u64 = 8;
}

impl private::Sealed for u128 {
    fn state(store: &StateStore) -> &SecondaryIndexState<Self> {
        &store.idx_u128
    }
    fn state_mut(store: &mut StateStore) -> &mut SecondaryIndexState<Self> {
        &mut store.idx_u128
    }
    fn wrap_undo(op: SecondaryUndo<Self>) -> UndoEntry {
        UndoEntry::IdxU128(op)
    }
}

impl SecondaryKey for u128 {
    const KIND: IndexKind = IndexKind::U128;
    const MIN_KEY: Self = u128::MIN;
    const MAX_KEY: Self = u128::MAX;
    const BYTE_WIDTH: u64 = 16;
}

impl private::Sealed for U256 {
    fn state(store: &StateStore) -> &SecondaryIndexState<Self> {
        &store.idx_u256
    }
    fn state_mut(store: &mut StateStore) -> &mut SecondaryIndexState<Self> {
        &mut store.idx_u256
    }
    fn wrap_undo(op: SecondaryUndo<Self>) -> UndoEntry {
        UndoEntry::IdxU256(op)
    }
}

impl SecondaryKey for U256 {
    const KIND: IndexKind = IndexKind::U256;
    const MIN_KEY: Self = U256::MIN;
    const MAX_KEY: Self = U256::MAX;
    const BYTE_WIDTH: u64 = 32;
}

impl private::Sealed for F64Bits {
    fn state(store: &StateStore) -> &SecondaryIndexState<Self> {
        &store.idx_double
    }
    fn state_mut(store: &mut StateStore) -> &mut SecondaryIndexState<Self> {
        &mut store.idx_double
    }
    fn wrap_undo(op: SecondaryUndo<Self>) -> UndoEntry {
        UndoEntry::IdxDouble(op)
    }
}

impl SecondaryKey for F64Bits {
    const KIND: IndexKind = IndexKind::Double;
    // NaN bit patterns sit at the extremes of the total order. They are
    // rejected as stored keys, which makes them safe range bounds here.
    const MIN_KEY: Self = F64Bits(u64::MAX);
    const MAX_KEY: Self = F64Bits(0x7fff_ffff_ffff_ffff);
    const BYTE_WIDTH: u64 = 8;
}
