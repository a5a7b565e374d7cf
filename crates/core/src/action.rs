use chaindb_primitives::Name;

/// An account plus the permission it acts under.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl PermissionLevel {
    pub fn new(actor: Name, permission: Name) -> Self {
        Self { actor, permission }
    }
}

/// One unit of guest-code execution: the contract it targets, the action
/// name, the declared authorizations, and the opaque argument bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Action {
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    pub data: Vec<u8>,
}

impl Action {
    /// Packs the action into the fixed little-endian wire form the guest
    /// reads back through `get_action`: `account:u64, name:u64,
    /// auth_count:u32, (actor:u64, permission:u64)*, data_len:u32, data`.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 + 4 + self.authorization.len() * 16 + 4 + self.data.len());
        out.extend_from_slice(&self.account.raw().to_le_bytes());
        out.extend_from_slice(&self.name.raw().to_le_bytes());
        out.extend_from_slice(&(self.authorization.len() as u32).to_le_bytes());
        for auth in &self.authorization {
            out.extend_from_slice(&auth.actor.raw().to_le_bytes());
            out.extend_from_slice(&auth.permission.raw().to_le_bytes());
        }
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// The read-only parts of the surrounding transaction that guest code may
/// inspect through the API.
#[derive(Clone, Debug, Default)]
pub struct TrxContext {
    pub actions: Vec<Action>,
    pub context_free_actions: Vec<Action>,
    pub context_free_data: Vec<Vec<u8>>,
    /// The packed transaction bytes, cached by the host.
    pub packed_trx: Vec<u8>,
    pub active_producers: Vec<Name>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn pack_layout_is_stable() {
        let act = Action {
            account: name("exchange"),
            name: name("deposit"),
            authorization: vec![PermissionLevel::new(name("alice"), name("active"))],
            data: vec![1, 2, 3],
        };
        let packed = act.pack();
        assert_eq!(&packed[..8], &name("exchange").raw().to_le_bytes());
        assert_eq!(&packed[8..16], &name("deposit").raw().to_le_bytes());
        assert_eq!(&packed[16..20], &1u32.to_le_bytes());
        assert_eq!(&packed[20..28], &name("alice").raw().to_le_bytes());
        assert_eq!(&packed[28..36], &name("active").raw().to_le_bytes());
        assert_eq!(&packed[36..40], &3u32.to_le_bytes());
        assert_eq!(&packed[40..], &[1, 2, 3]);
    }
}
