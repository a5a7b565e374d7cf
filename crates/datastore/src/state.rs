use crate::index::{SecondaryIndexState, SecondaryKey};
use crate::mut_tx::MutTx;
use crate::table::{KeyValueRow, RowId, TableDescriptor, TableLocator};
use chaindb_primitives::{F64Bits, Name, TableId};
use ethnum::U256;
use std::collections::{BTreeMap, BTreeSet};

/// The committed contract state: table registry, primary rows, the four
/// typed secondary indexes, and the account registry.
///
/// All mutation goes through [`MutTx`]; the accessors here are the read-only
/// view hosts and tests use between transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateStore {
    pub(crate) next_table_id: TableId,
    pub(crate) tables_by_locator: BTreeMap<TableLocator, TableId>,
    pub(crate) tables: BTreeMap<TableId, TableDescriptor>,
    pub(crate) rows: BTreeMap<RowId, KeyValueRow>,
    pub(crate) idx_u64: SecondaryIndexState<u64>,
    pub(crate) idx_u128: SecondaryIndexState<u128>,
    pub(crate) idx_u256: SecondaryIndexState<U256>,
    pub(crate) idx_double: SecondaryIndexState<F64Bits>,
    pub(crate) accounts: BTreeSet<Name>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            next_table_id: TableId::from_raw(1),
            tables_by_locator: BTreeMap::new(),
            tables: BTreeMap::new(),
            rows: BTreeMap::new(),
            idx_u64: SecondaryIndexState::new(),
            idx_u128: SecondaryIndexState::new(),
            idx_u256: SecondaryIndexState::new(),
            idx_double: SecondaryIndexState::new(),
            accounts: BTreeSet::new(),
        }
    }

    /// Opens a mutable transaction borrowing the store exclusively.
    pub fn begin_mut_tx(&mut self) -> MutTx<'_> {
        MutTx::new(self)
    }

    /// Registers an account. Account creation is a host concern and is not
    /// transactional; the API layer only ever reads the registry.
    pub fn create_account(&mut self, account: Name) {
        log::debug!("creating account {account}");
        self.accounts.insert(account);
    }

    pub fn is_account(&self, account: Name) -> bool {
        self.accounts.contains(&account)
    }

    pub fn find_table(&self, code: Name, scope: Name, table: Name) -> Option<&TableDescriptor> {
        let id = self
            .tables_by_locator
            .get(&TableLocator::new(code, scope, table))?;
        self.tables.get(id)
    }

    pub fn table(&self, id: TableId) -> Option<&TableDescriptor> {
        self.tables.get(&id)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn row(&self, row: RowId) -> Option<&KeyValueRow> {
        self.rows.get(&row)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// All primary rows in `(table_id, primary)` order.
    pub fn rows(&self) -> impl Iterator<Item = (RowId, &KeyValueRow)> {
        self.rows.iter().map(|(&row, kv)| (row, kv))
    }

    /// All live table descriptors in id order.
    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn secondary<K: SecondaryKey>(&self) -> &SecondaryIndexState<K> {
        K::state(self)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
