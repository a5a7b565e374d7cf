//! An in-memory transactional ordered-index store for contract state.
//!
//! Rows live in `BTreeMap`s keyed by composite tuples, compared
//! lexicographically in declared field order, which gives `find`,
//! `lower_bound`, `upper_bound` and bidirectional stepping in `O(log n)`.
//! Mutations go through a [`MutTx`], which records an undo entry per
//! mutation; `commit` discards the log and `rollback` replays it in LIFO
//! order, restoring descriptors, rows, secondary entries and the table-id
//! counter exactly.
//!
//! References handed out to callers are by-value [`RowId`]s re-resolved on
//! every use, so holding one across unrelated mutations is always safe.

pub mod error;
pub mod index;
mod mut_tx;
pub mod state;
pub mod table;

pub use error::DatastoreError;
pub use index::{IndexKind, SecondaryEntry, SecondaryIndexState, SecondaryKey};
pub use mut_tx::MutTx;
pub use state::StateStore;
pub use table::{KeyValueRow, RowId, TableDescriptor, TableLocator};

pub type Result<T, E = DatastoreError> = core::result::Result<T, E>;
