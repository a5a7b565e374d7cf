//! The typed secondary index engine and its guest ABI wrappers.
//!
//! The engine is generic over the stored key: one implementation serves the
//! `u64`, `u128`, 256-bit and double families, each with its own iterator
//! cache and therefore its own handle space. The per-family `db_idx*_*`
//! wrappers are the surface the interpreter binds; the 256-bit family passes
//! keys through a length-checked limb slice and the double family converts
//! to raw bit patterns at the boundary, rejecting NaN on writes.

use super::{DatabaseApi, SecondaryCaches};
use crate::energy::BASE_ROW_FEE;
use crate::error::DbError;
use crate::iterator_cache::IteratorCache;
use crate::Result;
use chaindb_datastore::{IndexKind, RowId, SecondaryEntry, SecondaryKey};
use chaindb_primitives::{F64Bits, Name};
use ethnum::U256;

mod private {
    use super::*;

    /// Per-family plumbing that must not leak out of the crate: cache
    /// selection and key validation.
    pub trait IndexCache: Sized {
        fn cache(caches: &SecondaryCaches) -> &IteratorCache;
        fn cache_mut(caches: &mut SecondaryCaches) -> &mut IteratorCache;
        fn check_key(&self) -> Result<()> {
            Ok(())
        }
    }

    impl IndexCache for u64 {
        fn cache(caches: &SecondaryCaches) -> &IteratorCache {
            &caches.idx64
        }
        fn cache_mut(caches: &mut SecondaryCaches) -> &mut IteratorCache {
            &mut caches.idx64
        }
    }

    impl IndexCache for u128 {
        fn cache(caches: &SecondaryCaches) -> &IteratorCache {
            &caches.idx128
        }
        fn cache_mut(caches: &mut SecondaryCaches) -> &mut IteratorCache {
            &mut caches.idx128
        }
    }

    impl IndexCache for U256 {
        fn cache(caches: &SecondaryCaches) -> &IteratorCache {
            &caches.idx256
        }
        fn cache_mut(caches: &mut SecondaryCaches) -> &mut IteratorCache {
            &mut caches.idx256
        }
    }

    impl IndexCache for F64Bits {
        fn cache(caches: &SecondaryCaches) -> &IteratorCache {
            &caches.idx_double
        }
        fn cache_mut(caches: &mut SecondaryCaches) -> &mut IteratorCache {
            &mut caches.idx_double
        }
        fn check_key(&self) -> Result<()> {
            if self.is_nan() {
                return Err(DbError::NanKey);
            }
            Ok(())
        }
    }
}

/// A secondary key family usable through this API. Sealed over the four
/// supported key types.
pub trait IndexAbi: SecondaryKey + private::IndexCache {}

impl<K: SecondaryKey + private::IndexCache> IndexAbi for K {}

fn row_fee<K: IndexAbi>() -> i64 {
    (BASE_ROW_FEE + K::BYTE_WIDTH) as i64
}

impl<'db> DatabaseApi<'db> {
    /// Installs a secondary key for an existing primary row and returns its
    /// live handle in this family's handle space.
    pub fn idx_store<K: IndexAbi>(
        &mut self,
        scope: Name,
        table: Name,
        payer: Name,
        id: u64,
        secondary: K,
    ) -> Result<i32> {
        if payer.is_empty() {
            return Err(DbError::MissingAuth {
                actor: payer,
                permission: None,
            });
        }
        secondary.check_key()?;
        self.gate.require_write_lock(scope);
        let receiver = self.receiver;
        let tab = self.find_or_create_table(receiver, scope, table, payer)?;
        let row = RowId::new(tab.id, id);
        if self.tx.row(row).is_none() {
            return Err(DbError::MissingRow {
                table_id: tab.id,
                primary: id,
            });
        }
        self.tx.secondary_insert::<K>(row, secondary, payer)?;
        self.meter.update_db_usage(payer, row_fee::<K>())?;
        let cache = K::cache_mut(&mut self.indexes);
        cache.cache_table(tab);
        Ok(cache.add(row))
    }

    /// Replaces an installed secondary key, rebilling if the payer changes.
    pub fn idx_update<K: IndexAbi>(
        &mut self,
        iterator: i32,
        payer: Name,
        secondary: K,
    ) -> Result<()> {
        secondary.check_key()?;
        let row = K::cache(&self.indexes).get(iterator)?;
        let entry = self.idx_entry::<K>(row)?;
        let (code, scope) = self.idx_row_table(row)?;
        if code != self.receiver {
            return Err(self.access_violation(code));
        }
        self.gate.require_write_lock(scope);

        let payer = if payer.is_empty() { entry.payer } else { payer };
        if entry.payer != payer {
            self.meter.update_db_usage(entry.payer, -row_fee::<K>())?;
            self.meter.update_db_usage(payer, row_fee::<K>())?;
        }
        self.tx.secondary_update::<K>(row, secondary, payer)?;
        Ok(())
    }

    /// Removes an installed secondary key and tombstones its handle.
    pub fn idx_remove<K: IndexAbi>(&mut self, iterator: i32) -> Result<()> {
        let row = K::cache(&self.indexes).get(iterator)?;
        let (code, scope) = self.idx_row_table(row)?;
        if code != self.receiver {
            return Err(self.access_violation(code));
        }
        self.gate.require_write_lock(scope);

        let old = self.tx.secondary_remove::<K>(row)?;
        self.meter.update_db_usage(old.payer, -row_fee::<K>())?;
        K::cache_mut(&mut self.indexes).remove(iterator)?;

        let empty = self.tx.table(row.table_id).map_or(false, |t| t.row_count == 0);
        if empty {
            self.tx.remove_table(row.table_id)?;
        }
        Ok(())
    }

    /// Point lookup in key order; writes the found row's primary key through
    /// `primary`.
    pub fn idx_find_secondary<K: IndexAbi>(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: &K,
        primary: &mut u64,
    ) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = K::cache_mut(&mut self.indexes).cache_table(tab);
        let Some(found) = self.tx.secondary::<K>().find_by_key(tab.id, *secondary) else {
            return Ok(end);
        };
        *primary = found;
        Ok(K::cache_mut(&mut self.indexes).add(RowId::new(tab.id, found)))
    }

    /// Primary-order lookup; writes the row's secondary key back through
    /// `secondary`.
    pub fn idx_find_primary<K: IndexAbi>(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: &mut K,
        primary: u64,
    ) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = K::cache_mut(&mut self.indexes).cache_table(tab);
        let row = RowId::new(tab.id, primary);
        let Some(entry) = self.tx.secondary::<K>().get(row) else {
            return Ok(end);
        };
        *secondary = entry.key;
        Ok(K::cache_mut(&mut self.indexes).add(row))
    }

    /// First entry with key `>= *secondary`; overwrites `secondary` and
    /// `primary` with the found entry.
    pub fn idx_lowerbound<K: IndexAbi>(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: &mut K,
        primary: &mut u64,
    ) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = K::cache_mut(&mut self.indexes).cache_table(tab);
        let Some((key, found)) = self.tx.secondary::<K>().lower_bound(tab.id, *secondary) else {
            return Ok(end);
        };
        *secondary = key;
        *primary = found;
        Ok(K::cache_mut(&mut self.indexes).add(RowId::new(tab.id, found)))
    }

    /// First entry with key `> *secondary`; overwrites `secondary` and
    /// `primary` with the found entry.
    pub fn idx_upperbound<K: IndexAbi>(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: &mut K,
        primary: &mut u64,
    ) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = K::cache_mut(&mut self.indexes).cache_table(tab);
        let Some((key, found)) = self.tx.secondary::<K>().upper_bound(tab.id, *secondary) else {
            return Ok(end);
        };
        *secondary = key;
        *primary = found;
        Ok(K::cache_mut(&mut self.indexes).add(RowId::new(tab.id, found)))
    }

    /// The table's end handle in this family, or `-1` if there is no table.
    pub fn idx_end<K: IndexAbi>(&mut self, code: Name, scope: Name, table: Name) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        Ok(K::cache_mut(&mut self.indexes).cache_table(tab))
    }

    /// Steps forward in key order within the table.
    pub fn idx_next<K: IndexAbi>(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        if iterator < -1 {
            return Ok(-1); // cannot step past the end
        }
        let row = K::cache(&self.indexes).get(iterator)?;
        let entry = self.idx_entry::<K>(row)?;
        match self
            .tx
            .secondary::<K>()
            .next_in_table(row.table_id, entry.key, row.primary)
        {
            Some((_, next)) => {
                *primary = next;
                Ok(K::cache_mut(&mut self.indexes).add(RowId::new(row.table_id, next)))
            }
            None => K::cache(&self.indexes).end_iterator_by_table_id(row.table_id),
        }
    }

    /// Steps backward in key order within the table. This is the one
    /// operation that accepts an end handle: it decodes the table and lands
    /// on its greatest key, or `-1` if the index is empty there.
    pub fn idx_previous<K: IndexAbi>(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        if iterator < -1 {
            let tab = K::cache(&self.indexes)
                .find_table_by_end_iterator(iterator)?
                .ok_or(DbError::InvalidHandle(iterator))?;
            let table_id = tab.id;
            let Some((_, last)) = self.tx.secondary::<K>().last_in_table(table_id) else {
                return Ok(-1);
            };
            *primary = last;
            return Ok(K::cache_mut(&mut self.indexes).add(RowId::new(table_id, last)));
        }
        let row = K::cache(&self.indexes).get(iterator)?;
        let entry = self.idx_entry::<K>(row)?;
        match self
            .tx
            .secondary::<K>()
            .prev_in_table(row.table_id, entry.key, row.primary)
        {
            Some((_, prev)) => {
                *primary = prev;
                Ok(K::cache_mut(&mut self.indexes).add(RowId::new(row.table_id, prev)))
            }
            None => Ok(-1),
        }
    }

    /// First entry of the table with primary key `>= primary`, in primary
    /// order.
    pub fn idx_lowerbound_primary<K: IndexAbi>(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        primary: u64,
    ) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = K::cache_mut(&mut self.indexes).cache_table(tab);
        match self.tx.secondary::<K>().lower_bound_primary(tab.id, primary) {
            Some(row) => Ok(K::cache_mut(&mut self.indexes).add(row)),
            None => Ok(end),
        }
    }

    /// First entry of the table with primary key `> primary`, in primary
    /// order.
    pub fn idx_upperbound_primary<K: IndexAbi>(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        primary: u64,
    ) -> Result<i32> {
        let Some(tab) = self.find_table(code, scope, table) else {
            return Ok(-1);
        };
        let end = K::cache_mut(&mut self.indexes).cache_table(tab);
        match self.tx.secondary::<K>().upper_bound_primary(tab.id, primary) {
            Some(row) => Ok(K::cache_mut(&mut self.indexes).add(row)),
            None => Ok(end),
        }
    }

    /// Steps forward in primary order across the index.
    pub fn idx_next_primary<K: IndexAbi>(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        if iterator < -1 {
            return Ok(-1); // cannot step past the end
        }
        let row = K::cache(&self.indexes).get(iterator)?;
        match self.tx.secondary::<K>().next_primary_in_table(row) {
            Some(next) => {
                *primary = next.primary;
                Ok(K::cache_mut(&mut self.indexes).add(next))
            }
            None => K::cache(&self.indexes).end_iterator_by_table_id(row.table_id),
        }
    }

    /// Steps backward in primary order across the index; accepts an end
    /// handle like [`Self::idx_previous`].
    pub fn idx_previous_primary<K: IndexAbi>(
        &mut self,
        iterator: i32,
        primary: &mut u64,
    ) -> Result<i32> {
        if iterator < -1 {
            let tab = K::cache(&self.indexes)
                .find_table_by_end_iterator(iterator)?
                .ok_or(DbError::InvalidHandle(iterator))?;
            let table_id = tab.id;
            let Some(last) = self.tx.secondary::<K>().last_primary_in_table(table_id) else {
                return Ok(-1);
            };
            *primary = last.primary;
            return Ok(K::cache_mut(&mut self.indexes).add(last));
        }
        let row = K::cache(&self.indexes).get(iterator)?;
        match self.tx.secondary::<K>().prev_primary_in_table(row) {
            Some(prev) => {
                *primary = prev.primary;
                Ok(K::cache_mut(&mut self.indexes).add(prev))
            }
            None => Ok(-1),
        }
    }

    /// Removes `row`'s secondary entries of every family, refunding each
    /// entry's payer and tombstoning its cached handles. Driven by the
    /// primary engine when a row is removed.
    pub(crate) fn cascade_remove_secondary(&mut self, row: RowId) -> Result<()> {
        self.cascade_remove_one::<u64>(row)?;
        self.cascade_remove_one::<u128>(row)?;
        self.cascade_remove_one::<U256>(row)?;
        self.cascade_remove_one::<F64Bits>(row)?;
        Ok(())
    }

    fn cascade_remove_one<K: IndexAbi>(&mut self, row: RowId) -> Result<()> {
        if self.tx.secondary::<K>().get(row).is_none() {
            return Ok(());
        }
        let old = self.tx.secondary_remove::<K>(row)?;
        self.meter.update_db_usage(old.payer, -row_fee::<K>())?;
        K::cache_mut(&mut self.indexes).remove_row(&row);
        Ok(())
    }

    fn idx_entry<K: IndexAbi>(&self, row: RowId) -> Result<SecondaryEntry<K>> {
        self.tx
            .secondary::<K>()
            .get(row)
            .copied()
            .ok_or(DbError::InvariantViolation(
                "live iterator refers to a missing secondary entry",
            ))
    }

    fn idx_row_table(&self, row: RowId) -> Result<(Name, Name)> {
        let desc = self
            .tx
            .table(row.table_id)
            .ok_or(DbError::InvariantViolation("secondary entry belongs to a missing table"))?;
        Ok((desc.code, desc.scope))
    }
}

/// Generates the guest ABI wrappers for a by-value key family.
macro_rules! simple_secondary_abi {
    ($idx:ident, $key:ty) => {
        paste::paste! {
            impl<'db> DatabaseApi<'db> {
                pub fn [<db_ $idx _store>](&mut self, scope: Name, table: Name, payer: Name, id: u64, secondary: $key) -> Result<i32> {
                    self.idx_store::<$key>(scope, table, payer, id, secondary)
                }
                pub fn [<db_ $idx _update>](&mut self, iterator: i32, payer: Name, secondary: $key) -> Result<()> {
                    self.idx_update::<$key>(iterator, payer, secondary)
                }
                pub fn [<db_ $idx _remove>](&mut self, iterator: i32) -> Result<()> {
                    self.idx_remove::<$key>(iterator)
                }
                pub fn [<db_ $idx _find_secondary>](&mut self, code: Name, scope: Name, table: Name, secondary: &$key, primary: &mut u64) -> Result<i32> {
                    self.idx_find_secondary::<$key>(code, scope, table, secondary, primary)
                }
                pub fn [<db_ $idx _find_primary>](&mut self, code: Name, scope: Name, table: Name, secondary: &mut $key, primary: u64) -> Result<i32> {
                    self.idx_find_primary::<$key>(code, scope, table, secondary, primary)
                }
                pub fn [<db_ $idx _lowerbound>](&mut self, code: Name, scope: Name, table: Name, secondary: &mut $key, primary: &mut u64) -> Result<i32> {
                    self.idx_lowerbound::<$key>(code, scope, table, secondary, primary)
                }
                pub fn [<db_ $idx _upperbound>](&mut self, code: Name, scope: Name, table: Name, secondary: &mut $key, primary: &mut u64) -> Result<i32> {
                    self.idx_upperbound::<$key>(code, scope, table, secondary, primary)
                }
                pub fn [<db_ $idx _end>](&mut self, code: Name, scope: Name, table: Name) -> Result<i32> {
                    self.idx_end::<$key>(code, scope, table)
                }
                pub fn [<db_ $idx _next>](&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
                    self.idx_next::<$key>(iterator, primary)
                }
                pub fn [<db_ $idx _previous>](&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
                    self.idx_previous::<$key>(iterator, primary)
                }
            }
        }
    };
}

simple_secondary_abi!(idx64, u64);
simple_secondary_abi!(idx128, u128);

/// Copies exactly two 128-bit limbs, most significant first.
fn u256_key(data: &[u128]) -> Result<U256> {
    if data.len() != 2 {
        return Err(DbError::WrongIndexType {
            expected: IndexKind::U256,
        });
    }
    Ok(U256::from_words(data[0], data[1]))
}

fn write_u256(data: &mut [u128], key: U256) -> Result<()> {
    if data.len() != 2 {
        return Err(DbError::WrongIndexType {
            expected: IndexKind::U256,
        });
    }
    let (hi, lo) = key.into_words();
    data[0] = hi;
    data[1] = lo;
    Ok(())
}

impl<'db> DatabaseApi<'db> {
    pub fn db_idx256_store(
        &mut self,
        scope: Name,
        table: Name,
        payer: Name,
        id: u64,
        data: &[u128],
    ) -> Result<i32> {
        let key = u256_key(data)?;
        self.idx_store::<U256>(scope, table, payer, id, key)
    }

    pub fn db_idx256_update(&mut self, iterator: i32, payer: Name, data: &[u128]) -> Result<()> {
        let key = u256_key(data)?;
        self.idx_update::<U256>(iterator, payer, key)
    }

    pub fn db_idx256_remove(&mut self, iterator: i32) -> Result<()> {
        self.idx_remove::<U256>(iterator)
    }

    pub fn db_idx256_find_secondary(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        data: &[u128],
        primary: &mut u64,
    ) -> Result<i32> {
        let key = u256_key(data)?;
        self.idx_find_secondary::<U256>(code, scope, table, &key, primary)
    }

    pub fn db_idx256_find_primary(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        data: &mut [u128],
        primary: u64,
    ) -> Result<i32> {
        let mut key = u256_key(data)?;
        let iterator = self.idx_find_primary::<U256>(code, scope, table, &mut key, primary)?;
        write_u256(data, key)?;
        Ok(iterator)
    }

    pub fn db_idx256_lowerbound(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        data: &mut [u128],
        primary: &mut u64,
    ) -> Result<i32> {
        let mut key = u256_key(data)?;
        let iterator = self.idx_lowerbound::<U256>(code, scope, table, &mut key, primary)?;
        write_u256(data, key)?;
        Ok(iterator)
    }

    pub fn db_idx256_upperbound(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        data: &mut [u128],
        primary: &mut u64,
    ) -> Result<i32> {
        let mut key = u256_key(data)?;
        let iterator = self.idx_upperbound::<U256>(code, scope, table, &mut key, primary)?;
        write_u256(data, key)?;
        Ok(iterator)
    }

    pub fn db_idx256_end(&mut self, code: Name, scope: Name, table: Name) -> Result<i32> {
        self.idx_end::<U256>(code, scope, table)
    }

    pub fn db_idx256_next(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        self.idx_next::<U256>(iterator, primary)
    }

    pub fn db_idx256_previous(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        self.idx_previous::<U256>(iterator, primary)
    }
}

impl<'db> DatabaseApi<'db> {
    /// Rejects NaN keys: they have no defined ordering.
    pub fn db_idx_double_store(
        &mut self,
        scope: Name,
        table: Name,
        payer: Name,
        id: u64,
        secondary: f64,
    ) -> Result<i32> {
        self.idx_store::<F64Bits>(scope, table, payer, id, F64Bits::from_f64(secondary))
    }

    pub fn db_idx_double_update(&mut self, iterator: i32, payer: Name, secondary: f64) -> Result<()> {
        self.idx_update::<F64Bits>(iterator, payer, F64Bits::from_f64(secondary))
    }

    pub fn db_idx_double_remove(&mut self, iterator: i32) -> Result<()> {
        self.idx_remove::<F64Bits>(iterator)
    }

    pub fn db_idx_double_find_secondary(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: f64,
        primary: &mut u64,
    ) -> Result<i32> {
        let key = F64Bits::from_f64(secondary);
        self.idx_find_secondary::<F64Bits>(code, scope, table, &key, primary)
    }

    pub fn db_idx_double_find_primary(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: &mut f64,
        primary: u64,
    ) -> Result<i32> {
        let mut key = F64Bits::from_f64(*secondary);
        let iterator = self.idx_find_primary::<F64Bits>(code, scope, table, &mut key, primary)?;
        *secondary = key.to_f64();
        Ok(iterator)
    }

    pub fn db_idx_double_lowerbound(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: &mut f64,
        primary: &mut u64,
    ) -> Result<i32> {
        let mut key = F64Bits::from_f64(*secondary);
        let iterator = self.idx_lowerbound::<F64Bits>(code, scope, table, &mut key, primary)?;
        *secondary = key.to_f64();
        Ok(iterator)
    }

    pub fn db_idx_double_upperbound(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        secondary: &mut f64,
        primary: &mut u64,
    ) -> Result<i32> {
        let mut key = F64Bits::from_f64(*secondary);
        let iterator = self.idx_upperbound::<F64Bits>(code, scope, table, &mut key, primary)?;
        *secondary = key.to_f64();
        Ok(iterator)
    }

    pub fn db_idx_double_end(&mut self, code: Name, scope: Name, table: Name) -> Result<i32> {
        self.idx_end::<F64Bits>(code, scope, table)
    }

    pub fn db_idx_double_next(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        self.idx_next::<F64Bits>(iterator, primary)
    }

    pub fn db_idx_double_previous(&mut self, iterator: i32, primary: &mut u64) -> Result<i32> {
        self.idx_previous::<F64Bits>(iterator, primary)
    }
}
