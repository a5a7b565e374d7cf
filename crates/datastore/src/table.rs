use chaindb_primitives::{Name, TableId};
use core::fmt;

/// The `(code, scope, table)` triple naming a logical table.
///
/// Unique across live descriptors; ordering is lexicographic in field order.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TableLocator {
    pub code: Name,
    pub scope: Name,
    pub table: Name,
}

impl TableLocator {
    pub fn new(code: Name, scope: Name, table: Name) -> Self {
        Self { code, scope, table }
    }
}

impl fmt::Display for TableLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.code, self.scope, self.table)
    }
}

/// A live table descriptor.
///
/// `row_count` counts the rows of every engine sharing the triple: the
/// primary rows plus one per installed secondary key of any type. The
/// descriptor is created lazily on first store and removed eagerly when the
/// combined count drops back to zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableDescriptor {
    pub id: TableId,
    pub code: Name,
    pub scope: Name,
    pub table: Name,
    /// The account that paid for the descriptor; provenance only.
    pub payer: Name,
    pub row_count: u64,
}

impl TableDescriptor {
    pub fn locator(&self) -> TableLocator {
        TableLocator::new(self.code, self.scope, self.table)
    }
}

/// Identifies one row of one table. Ordered by `(table_id, primary)`, so a
/// `BTreeMap<RowId, _>` is exactly the primary ordering the engine navigates.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RowId {
    pub table_id: TableId,
    pub primary: u64,
}

impl RowId {
    pub fn new(table_id: TableId, primary: u64) -> Self {
        Self { table_id, primary }
    }
}

/// An opaque primary row: the paying account and the contract-defined bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValueRow {
    pub payer: Name,
    pub value: Vec<u8>,
}
