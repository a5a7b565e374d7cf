use chaindb_datastore::{DatastoreError, IndexKind};
use chaindb_primitives::{Name, TableId};
use core::fmt;

/// A metered resource whose budget can run out mid-action.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Resource {
    Cpu,
    Storage,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Cpu => "cpu",
            Resource::Storage => "storage",
        })
    }
}

/// Every way a state API operation can fail.
///
/// All of these are fatal to the current action: the host unwinds the guest,
/// rolls the transaction back, and reports to the scheduler. Nothing is
/// recovered internally. `InvariantViolation` is the one kind that indicates
/// a host bug rather than misbehaving guest input.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DbError {
    #[error("invalid iterator handle {0}")]
    InvalidHandle(i32),
    #[error("table with id `{0}` does not exist")]
    MissingTable(TableId),
    #[error("missing required authority of `{actor}`{}", fmt_permission(.permission))]
    MissingAuth { actor: Name, permission: Option<Name> },
    #[error("record with primary key `{primary}` already exists in table `{table_id}`")]
    DuplicateKey { table_id: TableId, primary: u64 },
    #[error("no record with primary key `{primary}` in table `{table_id}`")]
    MissingRow { table_id: TableId, primary: u64 },
    #[error("secondary key does not match the {expected} index")]
    WrongIndexType { expected: IndexKind },
    #[error("NaN cannot be used as a double secondary key")]
    NanKey,
    #[error("{0} budget exceeded")]
    BudgetExceeded(Resource),
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}

fn fmt_permission(permission: &Option<Name>) -> String {
    match permission {
        Some(p) => format!(" with permission `{p}`"),
        None => String::new(),
    }
}

impl From<DatastoreError> for DbError {
    fn from(err: DatastoreError) -> Self {
        match err {
            DatastoreError::DuplicateRow(row) => DbError::DuplicateKey {
                table_id: row.table_id,
                primary: row.primary,
            },
            DatastoreError::DuplicateSecondary { row, .. } => DbError::DuplicateKey {
                table_id: row.table_id,
                primary: row.primary,
            },
            DatastoreError::NoSuchRow(row) => DbError::MissingRow {
                table_id: row.table_id,
                primary: row.primary,
            },
            DatastoreError::NoSuchSecondary { row, .. } => DbError::MissingRow {
                table_id: row.table_id,
                primary: row.primary,
            },
            DatastoreError::NoSuchTable(id) => DbError::MissingTable(id),
            // The API layer always checks before creating or dropping
            // descriptors, so these indicate it got out of sync.
            DatastoreError::TableExists(_) => {
                DbError::InvariantViolation("descriptor created twice for one locator")
            }
            DatastoreError::TableNotEmpty(..) => {
                DbError::InvariantViolation("descriptor removed while rows remain")
            }
        }
    }
}
