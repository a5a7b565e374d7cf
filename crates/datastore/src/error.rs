use crate::index::IndexKind;
use crate::table::{RowId, TableLocator};
use chaindb_primitives::TableId;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DatastoreError {
    #[error("table `{0}` already exists")]
    TableExists(TableLocator),
    #[error("table with id `{0}` does not exist")]
    NoSuchTable(TableId),
    #[error("table with id `{0}` still holds {1} rows")]
    TableNotEmpty(TableId, u64),
    #[error("row with primary key `{}` already exists in table `{}`", .0.primary, .0.table_id)]
    DuplicateRow(RowId),
    #[error("no row with primary key `{}` in table `{}`", .0.primary, .0.table_id)]
    NoSuchRow(RowId),
    #[error("{kind} index already holds an entry for primary key `{}` in table `{}`", .row.primary, .row.table_id)]
    DuplicateSecondary { kind: IndexKind, row: RowId },
    #[error("{kind} index holds no entry for primary key `{}` in table `{}`", .row.primary, .row.table_id)]
    NoSuchSecondary { kind: IndexKind, row: RowId },
}
