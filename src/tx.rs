// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The transactional backend.
//!
//! [`TxStore::tx`] runs a closure against a [`TxSession`], a scoped store
//! whose operations form one atomic unit of work. Lost updates are prevented
//! by locking reads: the session's `find` acquires the row's mutex and holds
//! it until commit or rollback, so a second transaction touching the same
//! row blocks at `find` until the first settles. A bare "wrap it in a
//! transaction" with non-locking reads would still race; the held row lock
//! is the correctness mechanism, not an optimization to remove.
//!
//! Writes are staged in a session-local overlay (reads see the session's own
//! writes) and applied at commit while every row lock is still held. The
//! unique-email constraint is validated at commit under the index lock
//! before anything is applied, so a failed commit leaves no partial state.
//!
//! Rollback is drop-based: releasing the session (on a closure error, an
//! early return, or a panic) releases every row lock and discards every
//! staged write.

use crate::account::Account;
use crate::base::AccountId;
use crate::error::{StoreError, TxStage};
use crate::store::{Store, TxFn};
use crate::table::Table;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Owned row guard held from first read until commit or rollback.
type RowGuard = ArcMutexGuard<RawMutex, Account>;

/// Transactional view over a [`Table`].
///
/// Operations called directly on a `TxStore` run in autocommit style, like
/// the direct backend; isolation applies only to operations made through the
/// scoped store inside [`tx`](Store::tx).
#[derive(Clone)]
pub struct TxStore {
    table: Arc<Table>,
    lock_timeout: Option<Duration>,
}

impl TxStore {
    /// Creates a transactional store that blocks indefinitely on contended
    /// row locks.
    pub fn new(table: Arc<Table>) -> Self {
        TxStore {
            table,
            lock_timeout: None,
        }
    }

    /// Creates a transactional store whose transactions wait at most
    /// `timeout` for any single row lock, surfacing
    /// [`StoreError::Timeout`] when exceeded.
    ///
    /// A bounded wait also breaks transaction-versus-transaction deadlocks
    /// when multi-row transactions lock rows in conflicting orders.
    pub fn with_lock_timeout(table: Arc<Table>, timeout: Duration) -> Self {
        TxStore {
            table,
            lock_timeout: Some(timeout),
        }
    }
}

impl Store for TxStore {
    fn find(&self, id: AccountId) -> Result<Account, StoreError> {
        self.table.find(id)
    }

    fn create(&self, account: &mut Account) -> Result<(), StoreError> {
        self.table.create(account)
    }

    fn update(&self, account: &Account) -> Result<(), StoreError> {
        self.table.update(account)
    }

    fn delete(&self, id: AccountId) -> Result<(), StoreError> {
        self.table.delete(id)
    }

    fn tx(&self, f: TxFn<'_>) -> Result<(), StoreError> {
        let session = TxSession::new(&self.table, self.lock_timeout);
        match f(&session) {
            Ok(()) => session.commit(),
            Err(err) => {
                session.rollback();
                Err(err)
            }
        }
    }
}

/// A row locked by the session: the held guard plus the session's working
/// copy of the account.
struct LockedRow {
    guard: RowGuard,
    pending: Account,
    dirty: bool,
}

#[derive(Default)]
struct TxState {
    /// Rows this transaction has locked, keyed by id.
    rows: HashMap<AccountId, LockedRow>,
    /// Staged creates with pre-assigned ids, invisible until commit.
    inserts: Vec<Account>,
    /// Ids of locked rows staged for removal.
    deletes: HashSet<AccountId>,
}

/// The scoped store bound to one transaction.
///
/// Not `Sync`: a session belongs to the single closure invocation that
/// received it, and the higher-ranked borrow in [`TxFn`](crate::TxFn) keeps
/// it from outliving that closure.
struct TxSession<'t> {
    table: &'t Table,
    lock_timeout: Option<Duration>,
    state: RefCell<TxState>,
}

impl<'t> TxSession<'t> {
    fn new(table: &'t Table, lock_timeout: Option<Duration>) -> Self {
        TxSession {
            table,
            lock_timeout,
            state: RefCell::new(TxState::default()),
        }
    }

    /// Acquires and retains the row lock for `id`, capturing a working copy
    /// of the committed value. No-op if this transaction already holds it.
    fn lock_row(&self, id: AccountId) -> Result<(), StoreError> {
        if self.state.borrow().rows.contains_key(&id) {
            return Ok(());
        }
        let row = self.table.row(id).ok_or(StoreError::NotFound)?;
        let guard = match self.lock_timeout {
            None => row.lock_arc(),
            Some(timeout) => row
                .try_lock_arc_for(timeout)
                .ok_or(StoreError::Timeout { id })?,
        };
        // The row may have been deleted while we were blocked on its lock.
        if !self.table.row_is_current(id, &row) {
            return Err(StoreError::NotFound);
        }
        let pending = Account::clone(&guard);
        self.state.borrow_mut().rows.insert(
            id,
            LockedRow {
                guard,
                pending,
                dirty: false,
            },
        );
        Ok(())
    }

    /// Discards staged writes and releases every row lock.
    fn rollback(self) {
        // Drop-based: the guards release as the session is consumed.
    }

    /// Validates deferred constraints and applies staged writes, releasing
    /// the row locks only after the writes are visible. On a constraint
    /// violation nothing is applied.
    fn commit(self) -> Result<(), StoreError> {
        let TxSession { table, state, .. } = self;
        let TxState {
            mut rows,
            inserts,
            deletes,
        } = state.into_inner();

        let mut emails = table.lock_emails();

        // Validate the unique-email constraint across staged inserts and
        // email-changing updates before touching the table. Emails this
        // transaction itself frees (deleted rows, emails updated away) do
        // not conflict.
        {
            let mut freed: HashSet<&str> = HashSet::new();
            for (id, locked) in rows.iter() {
                if deletes.contains(id)
                    || (locked.dirty && locked.pending.email != locked.guard.email)
                {
                    freed.insert(locked.guard.email.as_str());
                }
            }

            let dirty = rows
                .values()
                .filter(|locked| locked.dirty && !deletes.contains(&locked.pending.id))
                .map(|locked| &locked.pending);
            let mut staged: HashMap<&str, AccountId> = HashMap::new();
            for account in inserts.iter().chain(dirty) {
                let email = account.email.as_str();
                let taken = match emails.get(email) {
                    Some(&owner) => owner != account.id && !freed.contains(email),
                    None => false,
                };
                if taken || staged.get(email).is_some_and(|&other| other != account.id) {
                    // Early return rolls back: guards drop, nothing applied.
                    return Err(StoreError::transaction(
                        TxStage::Commit,
                        format!("email already in use: {email}"),
                    ));
                }
                staged.insert(email, account.id);
            }
        }

        // Apply while every row lock is still held: deletes, then updates,
        // then inserts. Waiters blocked on a deleted row's mutex observe
        // the removal through the currency re-check.
        for id in &deletes {
            if let Some(locked) = rows.get(id) {
                emails.remove(&locked.guard.email);
            }
            table.remove_row(*id);
        }
        // Two passes over the email index so updates that swap emails
        // between rows cannot clobber each other's fresh entries.
        for (id, locked) in rows.iter() {
            if locked.dirty && !deletes.contains(id) && locked.guard.email != locked.pending.email
            {
                emails.remove(&locked.guard.email);
            }
        }
        for (id, locked) in rows.iter_mut() {
            if !locked.dirty || deletes.contains(id) {
                continue;
            }
            if locked.guard.email != locked.pending.email {
                emails.insert(locked.pending.email.clone(), *id);
            }
            *locked.guard = locked.pending.clone();
        }
        for account in inserts {
            emails.insert(account.email.clone(), account.id);
            table.insert_row(account.id, Arc::new(Mutex::new(account)));
        }

        Ok(())
    }
}

impl Store for TxSession<'_> {
    fn find(&self, id: AccountId) -> Result<Account, StoreError> {
        {
            let state = self.state.borrow();
            if state.deletes.contains(&id) {
                return Err(StoreError::NotFound);
            }
            if let Some(locked) = state.rows.get(&id) {
                return Ok(locked.pending.clone());
            }
            if let Some(staged) = state.inserts.iter().find(|a| a.id == id) {
                return Ok(staged.clone());
            }
        }
        self.lock_row(id)?;
        Ok(self.state.borrow().rows[&id].pending.clone())
    }

    fn create(&self, account: &mut Account) -> Result<(), StoreError> {
        // The id is allocated eagerly and burned on rollback, like a SQL
        // sequence. Email uniqueness is checked at commit.
        account.id = self.table.allocate_id();
        self.state.borrow_mut().inserts.push(account.clone());
        Ok(())
    }

    fn update(&self, account: &Account) -> Result<(), StoreError> {
        {
            let mut state = self.state.borrow_mut();
            if state.deletes.contains(&account.id) {
                return Err(StoreError::NotFound);
            }
            if let Some(locked) = state.rows.get_mut(&account.id) {
                locked.pending = account.clone();
                locked.dirty = true;
                return Ok(());
            }
            if let Some(staged) = state.inserts.iter_mut().find(|a| a.id == account.id) {
                *staged = account.clone();
                return Ok(());
            }
        }
        self.lock_row(account.id)?;
        let mut state = self.state.borrow_mut();
        // lock_row just inserted the entry.
        let locked = state.rows.get_mut(&account.id).unwrap();
        locked.pending = account.clone();
        locked.dirty = true;
        Ok(())
    }

    fn delete(&self, id: AccountId) -> Result<(), StoreError> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(pos) = state.inserts.iter().position(|a| a.id == id) {
                // Deleting a row created in this transaction just unstages it.
                state.inserts.remove(pos);
                return Ok(());
            }
            if state.deletes.contains(&id) {
                return Ok(());
            }
            if state.rows.contains_key(&id) {
                state.deletes.insert(id);
                return Ok(());
            }
        }
        match self.lock_row(id) {
            Ok(()) => {
                self.state.borrow_mut().deletes.insert(id);
                Ok(())
            }
            // Deleting a missing id succeeds.
            Err(StoreError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// A nested `tx` joins the enclosing transaction: the closure runs
    /// against this same session and commits or rolls back with it.
    fn tx(&self, f: TxFn<'_>) -> Result<(), StoreError> {
        f(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Operation;

    fn store_with_account(balance: i64) -> (TxStore, AccountId) {
        let store = TxStore::new(Arc::new(Table::new()));
        let mut account = Account::new("Jon", "jon@calhoun.io", balance);
        store.create(&mut account).unwrap();
        (store, account.id)
    }

    #[test]
    fn scoped_reads_see_own_writes() {
        let (store, id) = store_with_account(100);

        store
            .tx(&mut |scoped: &dyn Store| {
                let mut account = scoped.find(id)?;
                account.balance = 42;
                scoped.update(&account)?;
                assert_eq!(scoped.find(id)?.balance, 42);
                Ok(())
            })
            .unwrap();

        assert_eq!(store.find(id).unwrap().balance, 42);
    }

    #[test]
    fn staged_create_is_invisible_until_commit() {
        let table = Arc::new(Table::new());
        let store = TxStore::new(Arc::clone(&table));
        let outside = TxStore::new(table);

        store
            .tx(&mut |scoped: &dyn Store| {
                let mut account = Account::new("Amy", "amy@x.io", 10);
                scoped.create(&mut account)?;
                // Visible inside the transaction...
                assert_eq!(scoped.find(account.id)?.name, "Amy");
                // ...but not outside it.
                assert_eq!(outside.find(account.id), Err(StoreError::NotFound));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deleting_staged_create_unstages_it() {
        let (store, _) = store_with_account(100);

        store
            .tx(&mut |scoped: &dyn Store| {
                let mut account = Account::new("Amy", "amy@x.io", 10);
                scoped.create(&mut account)?;
                scoped.delete(account.id)?;
                assert_eq!(scoped.find(account.id), Err(StoreError::NotFound));
                Ok(())
            })
            .unwrap();

        // The email never reached the index, so it is reusable.
        let mut again = Account::new("Amy", "amy@x.io", 10);
        store.create(&mut again).unwrap();
    }

    #[test]
    fn update_after_delete_in_tx_is_not_found() {
        let (store, id) = store_with_account(100);

        let result = store.tx(&mut |scoped: &dyn Store| {
            let account = scoped.find(id)?;
            scoped.delete(id)?;
            scoped.update(&account)
        });
        assert_eq!(result, Err(StoreError::NotFound));

        // The closure's error rolled everything back.
        assert_eq!(store.find(id).unwrap().balance, 100);
    }

    #[test]
    fn nested_tx_joins_enclosing_transaction() {
        let (store, id) = store_with_account(100);

        let result = store.tx(&mut |scoped: &dyn Store| {
            let mut account = scoped.find(id)?;
            account.balance -= 10;
            scoped.update(&account)?;
            // The inner tx shares the session; its write rolls back with
            // the outer error.
            scoped.tx(&mut |inner: &dyn Store| {
                let mut account = inner.find(id)?;
                account.balance -= 5;
                inner.update(&account)
            })?;
            Err(StoreError::NotFound)
        });

        assert_eq!(result, Err(StoreError::NotFound));
        assert_eq!(store.find(id).unwrap().balance, 100);
    }

    #[test]
    fn delete_and_recreate_email_in_one_tx_commits() {
        let (store, id) = store_with_account(100);

        store
            .tx(&mut |scoped: &dyn Store| {
                scoped.find(id)?;
                scoped.delete(id)?;
                let mut fresh = Account::new("Jon II", "jon@calhoun.io", 0);
                scoped.create(&mut fresh)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.find(id), Err(StoreError::NotFound));
    }

    #[test]
    fn swapping_emails_between_rows_commits() {
        let store = TxStore::new(Arc::new(Table::new()));
        let mut a = Account::new("A", "a@x.io", 1);
        let mut b = Account::new("B", "b@x.io", 2);
        store.create(&mut a).unwrap();
        store.create(&mut b).unwrap();

        store
            .tx(&mut |scoped: &dyn Store| {
                let mut first = scoped.find(a.id)?;
                let mut second = scoped.find(b.id)?;
                first.email = "b@x.io".into();
                second.email = "a@x.io".into();
                scoped.update(&first)?;
                scoped.update(&second)
            })
            .unwrap();

        assert_eq!(store.find(a.id).unwrap().email, "b@x.io");
        assert_eq!(store.find(b.id).unwrap().email, "a@x.io");

        // The index stayed consistent: both emails are still taken.
        let mut dup = Account::new("C", "a@x.io", 0);
        assert!(store.create(&mut dup).is_err());
        let mut dup2 = Account::new("C", "b@x.io", 0);
        assert!(store.create(&mut dup2).is_err());
    }

    #[test]
    fn duplicate_staged_emails_fail_at_commit() {
        let store = TxStore::new(Arc::new(Table::new()));

        let result = store.tx(&mut |scoped: &dyn Store| {
            let mut a = Account::new("A", "same@x.io", 1);
            let mut b = Account::new("B", "same@x.io", 2);
            scoped.create(&mut a)?;
            scoped.create(&mut b)?;
            Ok(())
        });

        assert_eq!(
            result,
            Err(StoreError::transaction(
                TxStage::Commit,
                "email already in use: same@x.io"
            ))
        );
    }

    #[test]
    fn autocommit_ops_match_direct_semantics() {
        let (store, id) = store_with_account(100);

        // A duplicate create outside any transaction fails immediately.
        let mut dup = Account::new("Dup", "jon@calhoun.io", 0);
        assert_eq!(
            store.create(&mut dup),
            Err(StoreError::persistence(
                Operation::Create,
                "email already in use: jon@calhoun.io"
            ))
        );

        store.delete(id).unwrap();
        assert_eq!(store.find(id), Err(StoreError::NotFound));
    }
}
