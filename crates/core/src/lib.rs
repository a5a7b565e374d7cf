//! The state database API a deterministic contract runtime exposes to guest
//! code.
//!
//! One [`DatabaseApi`] exists per action application. It owns the mutable
//! transaction for the duration of the action, the per-type iterator caches
//! that translate row references into small integer handles for the guest,
//! the authorization gate, the resource meter, and the action's accumulated
//! results. `finish` tears it down, handing the transaction back to the host
//! together with everything the action produced.
//!
//! There is deliberately no process-wide instance: hosts construct the API
//! under their transaction context and pass it explicitly.

pub mod action;
pub mod api;
pub mod auth;
pub mod energy;
pub mod error;
pub mod iterator_cache;
pub mod results;

pub use action::{Action, PermissionLevel, TrxContext};
pub use api::DatabaseApi;
pub use auth::AuthGate;
pub use energy::{CpuUnits, ResourceMeter, BASE_ROW_FEE};
pub use error::{DbError, Resource};
pub use iterator_cache::{CachedTable, IteratorCache};
pub use results::{
    ActionTrace, ApplyResults, ConsoleBuffer, DeferredReference, DeferredTransaction,
    DeferredTransactionRequest,
};

pub type Result<T, E = DbError> = core::result::Result<T, E>;
