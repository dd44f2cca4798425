//! Prepaid credit ledger.
//!
//! The one piece of mutable state shared across concurrent sessions. Each
//! caller's balance is an `AtomicI64` of micro-credits inside a `DashMap`, so
//! settlement is a single atomic read-modify-write: serialized per caller,
//! fully independent across callers, and never held across a network call.
//!
//! Reservation is advisory admission control, not an escrow. It answers "does
//! the balance clearly cover a multiple of the estimate?" without locking
//! funds; a settlement racing past the check may overdraw the balance, which
//! is accepted in preference to lost or doubled charges.

use crate::credits::Credits;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Minimum head-room multiplier between estimated cost and balance. The
/// estimator undercounts some scripts, so admission demands a wide margin.
const MIN_SAFETY_FACTOR: u32 = 2;

pub struct Ledger {
    accounts: DashMap<String, AtomicI64>,
    initial_balance: Credits,
    safety_factor: u32,
}

impl Ledger {
    #[must_use]
    pub fn new(initial_balance: Credits, safety_factor: u32) -> Self {
        Self {
            accounts: DashMap::new(),
            initial_balance,
            safety_factor: safety_factor.max(MIN_SAFETY_FACTOR),
        }
    }

    /// Current balance. An unknown caller is created on first contact with
    /// the configured initial balance.
    pub fn balance(&self, caller_id: &str) -> Credits {
        let entry = self
            .accounts
            .entry(caller_id.to_string())
            .or_insert_with(|| AtomicI64::new(self.initial_balance.micros()));
        Credits::from_micros(entry.value().load(Ordering::Acquire))
    }

    /// Advisory admission check: true when the balance covers the estimated
    /// cost with head room. No funds are locked and nothing is mutated.
    pub fn try_reserve(&self, caller_id: &str, estimated_cost: Credits) -> bool {
        let balance = self.balance(caller_id);
        balance.is_positive() && balance >= estimated_cost.scaled(self.safety_factor)
    }

    /// Atomically debit `cost`, returning the resulting balance. May drive
    /// the balance negative when a settlement races past the admission check.
    pub fn settle(&self, caller_id: &str, cost: Credits) -> Credits {
        let entry = self
            .accounts
            .entry(caller_id.to_string())
            .or_insert_with(|| AtomicI64::new(self.initial_balance.micros()));
        let prev = entry.value().fetch_sub(cost.micros(), Ordering::AcqRel);
        Credits::from_micros(prev - cost.micros())
    }

    /// Atomically add funds (top-up counterpart to `settle`), returning the
    /// resulting balance.
    pub fn credit(&self, caller_id: &str, amount: Credits) -> Credits {
        let entry = self
            .accounts
            .entry(caller_id.to_string())
            .or_insert_with(|| AtomicI64::new(self.initial_balance.micros()));
        let prev = entry.value().fetch_add(amount.micros(), Ordering::AcqRel);
        Credits::from_micros(prev + amount.micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded_ledger(balance: f64) -> Ledger {
        Ledger::new(Credits::from_f64(balance), 2)
    }

    #[test]
    fn test_caller_created_on_first_contact() {
        let ledger = funded_ledger(25.0);
        assert_eq!(ledger.balance("alice").to_string(), "25");
    }

    #[test]
    fn test_try_reserve_respects_safety_factor() {
        let ledger = funded_ledger(1.0);
        // 0.5 * 2 == 1.0 -> allowed at the boundary
        assert!(ledger.try_reserve("alice", Credits::from_f64(0.5)));
        // 0.6 * 2 > 1.0 -> denied
        assert!(!ledger.try_reserve("alice", Credits::from_f64(0.6)));
        // denial mutates nothing
        assert_eq!(ledger.balance("alice").to_string(), "1");
    }

    #[test]
    fn test_try_reserve_denies_empty_balance() {
        let ledger = funded_ledger(0.0);
        assert!(!ledger.try_reserve("alice", Credits::ZERO));
    }

    #[test]
    fn test_safety_factor_clamped_to_minimum() {
        let ledger = Ledger::new(Credits::from_f64(1.0), 0);
        // factor of 0 would admit anything; clamp to 2 still denies 0.6
        assert!(!ledger.try_reserve("alice", Credits::from_f64(0.6)));
    }

    #[test]
    fn test_settle_may_overdraw() {
        let ledger = funded_ledger(0.001);
        let after = ledger.settle("alice", Credits::from_f64(0.002));
        assert_eq!(after.to_string(), "-0.001");
        assert_eq!(ledger.balance("alice").to_string(), "-0.001");
    }

    #[test]
    fn test_credit_adds_funds() {
        let ledger = funded_ledger(0.0);
        let after = ledger.credit("alice", Credits::from_f64(5.0));
        assert_eq!(after.to_string(), "5");
    }

    #[test]
    fn test_concurrent_settlements_lose_no_updates() {
        let ledger = funded_ledger(10.0);
        let cost = Credits::from_f64(0.001);
        let threads = 8;
        let settles_per_thread = 250;

        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    for _ in 0..settles_per_thread {
                        ledger.settle("alice", cost);
                    }
                });
            }
        });

        // 10.0 - 2000 * 0.001 = 8.0 regardless of interleaving
        assert_eq!(ledger.balance("alice").to_string(), "8");
    }

    #[test]
    fn test_callers_are_independent() {
        let ledger = funded_ledger(10.0);
        ledger.settle("alice", Credits::from_f64(1.0));
        assert_eq!(ledger.balance("bob").to_string(), "10");
    }
}
