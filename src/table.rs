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

//! The in-memory backing table shared by both backends.
//!
//! A [`Table`] is the persistence collaborator: it owns the rows, the
//! unique-email constraint, and the id sequence. Each row is an
//! `Arc<Mutex<Account>>` whose mutex doubles as the row-level lock: held
//! briefly by autocommit operations, held until commit or rollback by a
//! transaction session.
//!
//! # Lock ordering
//!
//! Row mutexes are always acquired before the email-index mutex, and the
//! index mutex is never held while acquiring a row mutex. DashMap shard
//! locks are leaf locks: no row or index lock is taken while a shard
//! reference is alive.

use crate::account::Account;
use crate::base::AccountId;
use crate::error::{Operation, StoreError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single account row. The mutex is the row lock.
pub(crate) type Row = Arc<Mutex<Account>>;

/// Shared row storage with constraint enforcement.
///
/// Both [`DirectStore`](crate::DirectStore) and [`TxStore`](crate::TxStore)
/// are views over one `Table`, so the direct-versus-transactional comparison
/// runs against identical data.
pub struct Table {
    /// Rows indexed by account id.
    rows: DashMap<AccountId, Row>,
    /// Unique-email index. Doubles as the commit latch: commit-time
    /// constraint validation and application happen under this lock.
    emails: Mutex<HashMap<String, AccountId>>,
    /// Id sequence. Ids are never reused.
    next_id: AtomicU64,
}

impl Table {
    /// Creates an empty table.
    pub fn new() -> Self {
        Table {
            rows: DashMap::new(),
            emails: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn allocate_id(&self) -> AccountId {
        AccountId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the live row handle for `id`, if any. The shard reference is
    /// dropped before the caller blocks on the row mutex.
    pub(crate) fn row(&self, id: AccountId) -> Option<Row> {
        self.rows.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `row` is still the table's current row for `id`.
    ///
    /// A caller that blocked on a row mutex may have been overtaken by a
    /// delete; a handle that no longer matches the live entry is a zombie
    /// and must be treated as [`StoreError::NotFound`].
    pub(crate) fn row_is_current(&self, id: AccountId, row: &Row) -> bool {
        self.rows
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), row))
    }

    pub(crate) fn lock_emails(&self) -> parking_lot::MutexGuard<'_, HashMap<String, AccountId>> {
        self.emails.lock()
    }

    pub(crate) fn insert_row(&self, id: AccountId, row: Row) {
        self.rows.insert(id, row);
    }

    pub(crate) fn remove_row(&self, id: AccountId) {
        self.rows.remove(&id);
    }

    // === Autocommit operations ===
    //
    // Used by both backends for calls made outside any transaction. Each
    // operation is internally consistent but provides no isolation across
    // operations.

    pub(crate) fn find(&self, id: AccountId) -> Result<Account, StoreError> {
        let row = self.row(id).ok_or(StoreError::NotFound)?;
        let guard = row.lock();
        if !self.row_is_current(id, &row) {
            return Err(StoreError::NotFound);
        }
        Ok(guard.clone())
    }

    pub(crate) fn create(&self, account: &mut Account) -> Result<(), StoreError> {
        let mut emails = self.emails.lock();
        if emails.contains_key(&account.email) {
            return Err(StoreError::persistence(
                Operation::Create,
                format!("email already in use: {}", account.email),
            ));
        }
        account.id = self.allocate_id();
        emails.insert(account.email.clone(), account.id);
        self.rows
            .insert(account.id, Arc::new(Mutex::new(account.clone())));
        Ok(())
    }

    pub(crate) fn update(&self, account: &Account) -> Result<(), StoreError> {
        let row = self.row(account.id).ok_or(StoreError::NotFound)?;
        let mut guard = row.lock();
        if !self.row_is_current(account.id, &row) {
            return Err(StoreError::NotFound);
        }
        if guard.email != account.email {
            let mut emails = self.emails.lock();
            if let Some(&owner) = emails.get(&account.email) {
                if owner != account.id {
                    return Err(StoreError::persistence(
                        Operation::Update,
                        format!("email already in use: {}", account.email),
                    ));
                }
            }
            emails.remove(&guard.email);
            emails.insert(account.email.clone(), account.id);
        }
        *guard = account.clone();
        Ok(())
    }

    pub(crate) fn delete(&self, id: AccountId) -> Result<(), StoreError> {
        let Some(row) = self.row(id) else {
            // Deleting a missing id succeeds.
            return Ok(());
        };
        let guard = row.lock();
        if !self.row_is_current(id, &row) {
            return Ok(());
        }
        self.emails.lock().remove(&guard.email);
        // Waiters blocked on this row's mutex re-check currency after they
        // acquire it and observe the removal as NotFound.
        self.rows.remove(&id);
        Ok(())
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
