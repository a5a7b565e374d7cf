//! Deterministic resource metering for one action.
//!
//! The meter only ever accumulates — it never reads stored state — so two
//! replays of the same action debit identical amounts on every host.

use crate::error::{DbError, Resource};
use chaindb_primitives::Name;
use derive_more::{Add, AddAssign, Display, From, Sub, SubAssign};
use std::collections::BTreeMap;

/// Billable overhead charged per stored row, primary or secondary, on top of
/// the payload or key bytes it carries.
pub const BASE_ROW_FEE: u64 = 200;

/// CPU metering units, accumulated by [`ResourceMeter::checktime`].
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Debug, Display, Add, AddAssign, Sub,
    SubAssign, From,
)]
pub struct CpuUnits(pub u64);

/// Per-action CPU and storage accounting.
///
/// Storage usage is a signed per-payer byte ledger: positive deltas are
/// charges, negative deltas refunds. Optional per-payer limits turn a charge
/// that overshoots into a fatal `budget-exceeded` error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMeter {
    cpu_budget: CpuUnits,
    cpu_used: CpuUnits,
    usage: BTreeMap<Name, i64>,
    limits: BTreeMap<Name, u64>,
}

impl ResourceMeter {
    pub fn new(cpu_budget: CpuUnits) -> Self {
        Self {
            cpu_budget,
            ..Self::default()
        }
    }

    /// Caps `payer`'s storage usage within this action.
    pub fn with_storage_limit(mut self, payer: Name, bytes: u64) -> Self {
        self.limits.insert(payer, bytes);
        self
    }

    /// The sole cancellation point: debits `instruction_count` and fails once
    /// the budget is exhausted.
    pub fn checktime(&mut self, instruction_count: u32) -> Result<(), DbError> {
        self.cpu_used += CpuUnits(u64::from(instruction_count));
        if self.cpu_used > self.cpu_budget {
            return Err(DbError::BudgetExceeded(Resource::Cpu));
        }
        Ok(())
    }

    /// Adjusts `payer`'s storage counter by `delta` bytes.
    pub fn update_db_usage(&mut self, payer: Name, delta: i64) -> Result<(), DbError> {
        let counter = self.usage.entry(payer).or_insert(0);
        *counter += delta;
        if delta > 0 {
            if let Some(&limit) = self.limits.get(&payer) {
                if *counter > limit as i64 {
                    return Err(DbError::BudgetExceeded(Resource::Storage));
                }
            }
        }
        Ok(())
    }

    pub fn usage_of(&self, payer: Name) -> i64 {
        self.usage.get(&payer).copied().unwrap_or(0)
    }

    /// Net bytes charged across all payers.
    pub fn total_usage(&self) -> i64 {
        self.usage.values().sum()
    }

    pub fn cpu_used(&self) -> CpuUnits {
        self.cpu_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn checktime_trips_on_budget() {
        let mut meter = ResourceMeter::new(CpuUnits(100));
        meter.checktime(60).unwrap();
        meter.checktime(40).unwrap();
        assert_eq!(
            meter.checktime(1),
            Err(DbError::BudgetExceeded(Resource::Cpu))
        );
    }

    #[test]
    fn usage_nets_charges_and_refunds() {
        let mut meter = ResourceMeter::new(CpuUnits(0));
        meter.update_db_usage(name("alice"), 205).unwrap();
        meter.update_db_usage(name("alice"), -205).unwrap();
        meter.update_db_usage(name("bob"), 210).unwrap();
        assert_eq!(meter.usage_of(name("alice")), 0);
        assert_eq!(meter.usage_of(name("bob")), 210);
        assert_eq!(meter.total_usage(), 210);
    }

    #[test]
    fn storage_limit_trips_only_on_charges() {
        let mut meter = ResourceMeter::new(CpuUnits(0)).with_storage_limit(name("alice"), 300);
        meter.update_db_usage(name("alice"), 250).unwrap();
        assert_eq!(
            meter.update_db_usage(name("alice"), 100),
            Err(DbError::BudgetExceeded(Resource::Storage))
        );
    }
}
