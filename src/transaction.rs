use std::collections::HashSet;

use crate::lock::{Lock, LockMode};
use crate::table::LockTable;
use crate::{RowID, TransactionID};

/// The two-phase locking phases. A transaction acquires locks while
/// growing, enters the shrinking phase on its first release and from
/// then on may only release. There is no way back out of `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Growing,
    Shrinking,
    Aborted,
}

/// Lock-manager-internal state of one client transaction: its 2PL phase,
/// the rows it holds and the remaining lock budget.
#[derive(Debug)]
pub struct Transaction {
    transaction_id: TransactionID,
    phase: Phase,
    locked_rows: HashSet<RowID>,
    budget_remaining: u32,
}

impl Transaction {
    pub fn new(transaction_id: TransactionID, lock_budget: u32) -> Transaction {
        Transaction {
            transaction_id,
            phase: Phase::Growing,
            locked_rows: HashSet::new(),
            budget_remaining: lock_budget,
        }
    }

    pub fn transaction_id(&self) -> TransactionID {
        self.transaction_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn budget_remaining(&self) -> u32 {
        self.budget_remaining
    }

    pub fn has_lock(&self, row_id: RowID) -> bool {
        self.locked_rows.contains(&row_id)
    }

    pub fn locked_rows(&self) -> &HashSet<RowID> {
        &self.locked_rows
    }

    /// Asks `lock` for the requested mode and on success records the row
    /// and burns one unit of budget. Fails without side effects when the
    /// transaction is not growing, out of budget, already holds the row,
    /// or the lock cannot grant the mode.
    pub fn add_lock(&mut self, row_id: RowID, mode: LockMode, lock: &mut Lock) -> bool {
        if self.phase != Phase::Growing
            || self.budget_remaining == 0
            || self.locked_rows.contains(&row_id)
        {
            return false;
        }
        let granted = match mode {
            LockMode::Shared => lock.acquire_shared(self.transaction_id),
            LockMode::Exclusive => lock.acquire_exclusive(self.transaction_id),
        };
        if granted {
            self.locked_rows.insert(row_id);
            self.budget_remaining -= 1;
        }
        granted
    }

    /// Releases the row if held, entering the shrinking phase. Unowned
    /// rows are ignored.
    pub fn release_lock(&mut self, row_id: RowID, lock_table: &LockTable) {
        if self.locked_rows.remove(&row_id) {
            if self.phase == Phase::Growing {
                self.phase = Phase::Shrinking;
            }
            lock_table.release(row_id, self.transaction_id);
        }
    }

    /// Releases every held row and marks the transaction aborted.
    pub fn release_all(&mut self, lock_table: &LockTable) {
        for row_id in self.locked_rows.drain() {
            lock_table.release(row_id, self.transaction_id);
        }
        self.phase = Phase::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use crate::lock::{Lock, LockMode};
    use crate::table::LockTable;
    use crate::transaction::{Phase, Transaction};

    const ROW: u64 = 7;

    #[test]
    fn add_lock_burns_budget() {
        let mut transaction = Transaction::new(1, 2);
        let mut lock = Lock::default();
        assert!(transaction.add_lock(ROW, LockMode::Shared, &mut lock));
        assert_eq!(transaction.budget_remaining(), 1);
        assert!(transaction.has_lock(ROW));

        let mut other = Lock::default();
        assert!(transaction.add_lock(ROW + 1, LockMode::Exclusive, &mut other));
        assert_eq!(transaction.budget_remaining(), 0);

        let mut third = Lock::default();
        assert!(!transaction.add_lock(ROW + 2, LockMode::Shared, &mut third));
        assert!(third.is_free());
    }

    #[test]
    fn add_lock_rejects_rows_already_held() {
        let mut transaction = Transaction::new(1, 10);
        let mut lock = Lock::default();
        assert!(transaction.add_lock(ROW, LockMode::Shared, &mut lock));
        assert!(!transaction.add_lock(ROW, LockMode::Shared, &mut lock));
        assert_eq!(transaction.budget_remaining(), 9);
    }

    #[test]
    fn first_release_enters_shrinking_phase() {
        let lock_table = LockTable::with_capacity(16);
        let mut transaction = Transaction::new(1, 10);
        lock_table.with_lock(ROW, |lock| {
            assert!(transaction.add_lock(ROW, LockMode::Exclusive, lock))
        });

        transaction.release_lock(ROW, &lock_table);
        assert_eq!(transaction.phase(), Phase::Shrinking);
        assert!(!transaction.has_lock(ROW));

        let mut lock = Lock::default();
        assert!(!transaction.add_lock(ROW, LockMode::Shared, &mut lock));
    }

    #[test]
    fn releasing_an_unowned_row_keeps_the_phase() {
        let lock_table = LockTable::with_capacity(16);
        let mut transaction = Transaction::new(1, 10);
        transaction.release_lock(ROW, &lock_table);
        assert_eq!(transaction.phase(), Phase::Growing);
    }

    #[test]
    fn release_all_aborts() {
        let lock_table = LockTable::with_capacity(16);
        let mut transaction = Transaction::new(1, 10);
        for row_id in 0..4 {
            lock_table.with_lock(row_id, |lock| {
                assert!(transaction.add_lock(row_id, LockMode::Shared, lock))
            });
        }

        transaction.release_all(&lock_table);
        assert_eq!(transaction.phase(), Phase::Aborted);
        assert!(transaction.locked_rows().is_empty());
    }
}
