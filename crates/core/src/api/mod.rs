mod primary;
mod secondary;

pub use secondary::IndexAbi;

use crate::action::{Action, TrxContext};
use crate::auth::AuthGate;
use crate::energy::ResourceMeter;
use crate::error::DbError;
use crate::iterator_cache::{CachedTable, IteratorCache};
use crate::results::{
    ApplyResults, ConsoleBuffer, DeferredReference, DeferredTransaction, DeferredTransactionRequest,
};
use crate::Result;
use chaindb_datastore::MutTx;
use chaindb_primitives::Name;

/// The per-type iterator caches of the four secondary index families.
///
/// Each family owns a disjoint handle space; a handle must only ever be
/// passed back to the family that issued it.
#[derive(Default)]
pub(crate) struct SecondaryCaches {
    pub(crate) idx64: IteratorCache,
    pub(crate) idx128: IteratorCache,
    pub(crate) idx256: IteratorCache,
    pub(crate) idx_double: IteratorCache,
}

/// The state database API for one action application.
///
/// Owns the mutable transaction while the action runs. Construct one per
/// action, drive it from the interpreter, then call [`DatabaseApi::finish`]
/// to get the transaction back along with the action's results and metering
/// state. Iterator handles are scoped to this instance and die with it.
pub struct DatabaseApi<'db> {
    pub(crate) tx: MutTx<'db>,
    pub(crate) receiver: Name,
    act: Action,
    trx: TrxContext,
    pub(crate) gate: AuthGate,
    pub(crate) meter: ResourceMeter,
    results: ApplyResults,
    console: ConsoleBuffer,
    inline_actions: Vec<Action>,
    cfa_inline_actions: Vec<Action>,
    context_free: bool,
    privileged: bool,
    used_context_free_api: bool,
    pub(crate) keyval_cache: IteratorCache,
    pub(crate) indexes: SecondaryCaches,
}

impl<'db> DatabaseApi<'db> {
    pub fn new(tx: MutTx<'db>, receiver: Name, act: Action, trx: TrxContext, meter: ResourceMeter) -> Self {
        let gate = AuthGate::new(receiver, act.authorization.clone());
        Self {
            tx,
            receiver,
            act,
            trx,
            gate,
            meter,
            results: ApplyResults::default(),
            console: ConsoleBuffer::new(),
            inline_actions: Vec::new(),
            cfa_inline_actions: Vec::new(),
            context_free: false,
            privileged: false,
            used_context_free_api: false,
            keyval_cache: IteratorCache::new(),
            indexes: SecondaryCaches::default(),
        }
    }

    /// Marks this application as context-free: it runs without authority and
    /// may read the transaction's context-free data.
    pub fn context_free(mut self) -> Self {
        self.context_free = true;
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn receiver(&self) -> Name {
        self.receiver
    }

    pub fn action(&self) -> &Action {
        &self.act
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn is_context_free(&self) -> bool {
        self.context_free
    }

    pub fn used_context_free_api(&self) -> bool {
        self.used_context_free_api
    }

    /// Read-only view of the transaction, for hosts and tests.
    pub fn transaction(&self) -> &MutTx<'db> {
        &self.tx
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    pub fn meter(&self) -> &ResourceMeter {
        &self.meter
    }

    /// Tears the instance down: the action's own trace (console included) is
    /// appended to the results, and the transaction is handed back so the
    /// host can run the next action or commit.
    pub fn finish(mut self) -> (MutTx<'db>, ApplyResults, ResourceMeter) {
        log::trace!(
            "{}::{} applied on {}, cpu {}",
            self.act.account,
            self.act.name,
            self.receiver,
            self.meter.cpu_used()
        );
        let console = self.console.take();
        self.results.applied_actions.push(crate::results::ActionTrace {
            receiver: self.receiver,
            act: self.act,
            console,
        });
        (self.tx, self.results, self.meter)
    }

    // --- table registry ---

    /// Pure lookup; records the read intent for the scheduler.
    pub(crate) fn find_table(&mut self, code: Name, scope: Name, table: Name) -> Option<CachedTable> {
        self.gate.require_read_lock(code, scope);
        self.tx.find_table(code, scope, table).map(CachedTable::from)
    }

    pub(crate) fn find_or_create_table(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        payer: Name,
    ) -> Result<CachedTable> {
        if let Some(desc) = self.tx.find_table(code, scope, table) {
            return Ok(CachedTable::from(desc));
        }
        let id = self.tx.create_table(code, scope, table, payer)?;
        Ok(CachedTable { id, code, scope, table })
    }

    // --- authorization & recipients ---

    pub fn require_auth(&mut self, account: Name) -> Result<()> {
        self.gate.require_authorization(account)
    }

    pub fn require_auth2(&mut self, account: Name, permission: Name) -> Result<()> {
        self.gate.require_authorization_level(account, permission)
    }

    pub fn has_auth(&self, account: Name) -> bool {
        self.gate.has_authorization(account)
    }

    pub fn all_authorizations_used(&self) -> bool {
        self.gate.all_authorizations_used()
    }

    pub fn unused_authorizations(&self) -> Vec<crate::action::PermissionLevel> {
        self.gate.unused_authorizations()
    }

    pub fn require_recipient(&mut self, account: Name) {
        self.gate.require_recipient(account);
    }

    pub fn has_recipient(&self, account: Name) -> bool {
        self.gate.has_recipient(account)
    }

    pub fn require_read_lock(&mut self, account: Name, scope: Name) {
        self.gate.require_read_lock(account, scope);
    }

    pub fn require_write_lock(&mut self, scope: Name) {
        self.gate.require_write_lock(scope);
    }

    pub fn is_account(&self, account: Name) -> bool {
        self.tx.is_account(account)
    }

    // --- metering ---

    /// The sole cancellation point; the host calls this at metered intervals.
    pub fn checktime(&mut self, instruction_count: u32) -> Result<()> {
        self.meter.checktime(instruction_count)
    }

    pub fn update_db_usage(&mut self, payer: Name, delta: i64) -> Result<()> {
        self.meter.update_db_usage(payer, delta)
    }

    // --- results, console, inline actions ---

    pub fn console(&mut self) -> &mut ConsoleBuffer {
        &mut self.console
    }

    /// Queues an inline action for dispatch after this one.
    pub fn execute_inline(&mut self, act: Action) {
        self.inline_actions.push(act);
    }

    pub fn execute_context_free_inline(&mut self, act: Action) {
        self.cfa_inline_actions.push(act);
    }

    pub fn inline_actions(&self) -> &[Action] {
        &self.inline_actions
    }

    pub fn cfa_inline_actions(&self) -> &[Action] {
        &self.cfa_inline_actions
    }

    /// Schedules a deferred transaction and bumps the monotonic count.
    pub fn send_deferred(&mut self, deferred: DeferredTransaction) {
        self.results.deferred_transactions_count += 1;
        self.results
            .deferred_transaction_requests
            .push(DeferredTransactionRequest::Schedule(deferred));
    }

    pub fn cancel_deferred(&mut self, reference: DeferredReference) {
        self.results
            .deferred_transaction_requests
            .push(DeferredTransactionRequest::Cancel(reference));
    }

    /// Moves a sub-action's results onto the end of this accumulator.
    pub fn append_results(&mut self, other: ApplyResults) {
        self.results.append_results(other);
    }

    // --- transaction context ---

    /// Copies the packed form of the requested action into `buffer`; returns
    /// its full packed length, or `-1` if `kind`/`index` name nothing.
    /// `kind` 0 selects the context-free actions, 1 the ordinary ones.
    pub fn get_action(&self, kind: u32, index: u32, buffer: &mut [u8]) -> i32 {
        let list = match kind {
            0 => &self.trx.context_free_actions,
            1 => &self.trx.actions,
            _ => return -1,
        };
        let Some(act) = list.get(index as usize) else {
            return -1;
        };
        let packed = act.pack();
        let copy = packed.len().min(buffer.len());
        buffer[..copy].copy_from_slice(&packed[..copy]);
        packed.len() as i32
    }

    /// Copies one context-free data blob into `buffer`; returns its full
    /// length, or `-1` if `index` names nothing. Only context-free
    /// applications may call this; the host validates the recorded use.
    pub fn get_context_free_data(&mut self, index: u32, buffer: &mut [u8]) -> i32 {
        self.used_context_free_api = true;
        let Some(blob) = self.trx.context_free_data.get(index as usize) else {
            return -1;
        };
        let copy = blob.len().min(buffer.len());
        buffer[..copy].copy_from_slice(&blob[..copy]);
        blob.len() as i32
    }

    pub fn get_active_producers(&self) -> &[Name] {
        &self.trx.active_producers
    }

    pub fn get_packed_transaction(&self) -> &[u8] {
        &self.trx.packed_trx
    }

    pub(crate) fn access_violation(&self, code: Name) -> DbError {
        DbError::MissingAuth {
            actor: code,
            permission: None,
        }
    }
}
