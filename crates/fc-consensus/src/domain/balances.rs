//! Factoid and entry-credit balances.
//!
//! Two views are kept: permanent balances (as of the last sealed block) and
//! temporary balances for the process list at the leader height. Reads fall
//! back from temporary to permanent. Each view has its own mutex and no
//! accessor holds both at once, so the book can be shared with readers outside
//! the engine.

use parking_lot::Mutex;
use shared_types::Address;
use std::collections::HashMap;

#[derive(Default)]
struct Temporary {
    db_height: u32,
    factoid: HashMap<Address, i64>,
    entry_credit: HashMap<Address, i64>,
}

#[derive(Default)]
struct Permanent {
    factoid: HashMap<Address, i64>,
    entry_credit: HashMap<Address, i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceKind {
    Factoid,
    EntryCredit,
}

/// A transaction amount as a balance delta, clamped to `i64::MAX`.
pub fn amount_delta(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

#[derive(Default)]
pub struct BalanceBook {
    temporary: Mutex<Temporary>,
    permanent: Mutex<Permanent>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, kind: BalanceKind, temporary: bool, address: &Address) -> i64 {
        if temporary {
            let temp = self.temporary.lock();
            let map = match kind {
                BalanceKind::Factoid => &temp.factoid,
                BalanceKind::EntryCredit => &temp.entry_credit,
            };
            if let Some(v) = map.get(address) {
                return *v;
            }
        }
        let perm = self.permanent.lock();
        let map = match kind {
            BalanceKind::Factoid => &perm.factoid,
            BalanceKind::EntryCredit => &perm.entry_credit,
        };
        map.get(address).copied().unwrap_or(0)
    }

    fn put(&self, kind: BalanceKind, temporary: bool, address: Address, value: i64) {
        if temporary {
            let mut temp = self.temporary.lock();
            let map = match kind {
                BalanceKind::Factoid => &mut temp.factoid,
                BalanceKind::EntryCredit => &mut temp.entry_credit,
            };
            map.insert(address, value);
        } else {
            let mut perm = self.permanent.lock();
            let map = match kind {
                BalanceKind::Factoid => &mut perm.factoid,
                BalanceKind::EntryCredit => &mut perm.entry_credit,
            };
            map.insert(address, value);
        }
    }

    /// Factoid balance; `temporary` reads the leader-height view first.
    pub fn get_f(&self, temporary: bool, address: &Address) -> i64 {
        self.get(BalanceKind::Factoid, temporary, address)
    }

    pub fn put_f(&self, temporary: bool, address: Address, value: i64) {
        self.put(BalanceKind::Factoid, temporary, address, value)
    }

    /// Entry-credit balance; `temporary` reads the leader-height view first.
    pub fn get_e(&self, temporary: bool, address: &Address) -> i64 {
        self.get(BalanceKind::EntryCredit, temporary, address)
    }

    pub fn put_e(&self, temporary: bool, address: Address, value: i64) {
        self.put(BalanceKind::EntryCredit, temporary, address, value)
    }

    /// Adds `delta` to a factoid balance, saturating at the `i64` bounds.
    pub fn adjust_f(&self, temporary: bool, address: Address, delta: i64) {
        let balance = self.get_f(temporary, &address);
        self.put_f(temporary, address, balance.saturating_add(delta));
    }

    pub fn adjust_e(&self, temporary: bool, address: Address, delta: i64) {
        let balance = self.get_e(temporary, &address);
        self.put_e(temporary, address, balance.saturating_add(delta));
    }

    /// Height the temporary view belongs to.
    pub fn temporary_height(&self) -> u32 {
        self.temporary.lock().db_height
    }

    /// Starts an empty temporary view for `db_height`.
    pub fn reset_temporary(&self, db_height: u32) {
        let mut temp = self.temporary.lock();
        temp.db_height = db_height;
        temp.factoid.clear();
        temp.entry_credit.clear();
    }

    /// Moves the temporary view into the permanent one (block sealed).
    pub fn promote_temporary(&self, next_height: u32) {
        let (factoid, entry_credit) = {
            let mut temp = self.temporary.lock();
            temp.db_height = next_height;
            (
                std::mem::take(&mut temp.factoid),
                std::mem::take(&mut temp.entry_credit),
            )
        };
        let mut perm = self.permanent.lock();
        perm.factoid.extend(factoid);
        perm.entry_credit.extend(entry_credit);
    }
}
