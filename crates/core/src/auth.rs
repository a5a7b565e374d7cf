use crate::action::PermissionLevel;
use crate::error::DbError;
use chaindb_primitives::Name;

/// Tracks what the action is allowed to touch and who it must be delivered
/// to.
///
/// The `used` vector parallels the declared authorizations. The host is
/// expected to reject an action that returns with any declared authorization
/// left unused, so marking happens as a side effect of every successful
/// `require_*` call.
#[derive(Clone, Debug)]
pub struct AuthGate {
    declared: Vec<PermissionLevel>,
    used: Vec<bool>,
    recipients: Vec<Name>,
    read_locks: Vec<(Name, Name)>,
    write_scopes: Vec<Name>,
}

impl AuthGate {
    /// `receiver` is always a recipient of its own action.
    pub fn new(receiver: Name, declared: Vec<PermissionLevel>) -> Self {
        let used = vec![false; declared.len()];
        Self {
            declared,
            used,
            recipients: vec![receiver],
            read_locks: Vec::new(),
            write_scopes: Vec::new(),
        }
    }

    /// Asserts that `account` appears in the declared authorizations and
    /// marks the first matching slot used.
    pub fn require_authorization(&mut self, account: Name) -> Result<(), DbError> {
        for (auth, used) in self.declared.iter().zip(&mut self.used) {
            if auth.actor == account {
                *used = true;
                return Ok(());
            }
        }
        Err(DbError::MissingAuth {
            actor: account,
            permission: None,
        })
    }

    /// As [`Self::require_authorization`], but the permission must match too.
    pub fn require_authorization_level(
        &mut self,
        account: Name,
        permission: Name,
    ) -> Result<(), DbError> {
        for (auth, used) in self.declared.iter().zip(&mut self.used) {
            if auth.actor == account && auth.permission == permission {
                *used = true;
                return Ok(());
            }
        }
        Err(DbError::MissingAuth {
            actor: account,
            permission: Some(permission),
        })
    }

    pub fn has_authorization(&self, account: Name) -> bool {
        self.declared.iter().any(|auth| auth.actor == account)
    }

    pub fn all_authorizations_used(&self) -> bool {
        self.used.iter().all(|&used| used)
    }

    pub fn unused_authorizations(&self) -> Vec<PermissionLevel> {
        self.declared
            .iter()
            .zip(&self.used)
            .filter(|(_, &used)| !used)
            .map(|(&auth, _)| auth)
            .collect()
    }

    /// Schedules delivery of the current action to `account`. Idempotent.
    pub fn require_recipient(&mut self, account: Name) {
        if !self.recipients.contains(&account) {
            self.recipients.push(account);
        }
    }

    pub fn has_recipient(&self, account: Name) -> bool {
        self.recipients.contains(&account)
    }

    pub fn recipients(&self) -> &[Name] {
        &self.recipients
    }

    /// Records an intended read of `(account, scope)` for the scheduler.
    /// Duplicates collapse.
    pub fn require_read_lock(&mut self, account: Name, scope: Name) {
        if !self.read_locks.contains(&(account, scope)) {
            self.read_locks.push((account, scope));
        }
    }

    /// Records an intended write of `scope` for the scheduler. Duplicates
    /// collapse.
    pub fn require_write_lock(&mut self, scope: Name) {
        if !self.write_scopes.contains(&scope) {
            self.write_scopes.push(scope);
        }
    }

    pub fn read_locks(&self) -> &[(Name, Name)] {
        &self.read_locks
    }

    pub fn write_scopes(&self) -> &[Name] {
        &self.write_scopes
    }
}
