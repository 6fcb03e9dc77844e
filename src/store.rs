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

//! The store capability interface.
//!
//! [`Store`] is the minimal surface a backend must provide: single-row CRUD
//! plus [`tx`](Store::tx), the atomicity primitive. Business operations such
//! as [`spend`](crate::spend) are written against this trait so they are
//! agnostic to which backend is injected: the unsafe
//! [`DirectStore`](crate::DirectStore) or the transactional
//! [`TxStore`](crate::TxStore).

use crate::account::Account;
use crate::base::AccountId;
use crate::error::StoreError;

/// The closure handed to [`Store::tx`].
///
/// The `&dyn Store` argument is the transaction-scoped store; its borrow is
/// higher-ranked, so the closure cannot smuggle the scoped store out of the
/// transaction; the compiler rejects any attempt to retain it past `tx`.
pub type TxFn<'a> = &'a mut dyn FnMut(&dyn Store) -> Result<(), StoreError>;

/// CRUD operations against accounts plus a transaction capability.
pub trait Store {
    /// Retrieves a snapshot of the account with the given id.
    ///
    /// Returns [`StoreError::NotFound`] if no row matches. Outside a
    /// transaction the read is not isolated from concurrent writers.
    fn find(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Persists a new account and assigns its id.
    ///
    /// Fails with [`StoreError::Persistence`] on a constraint violation
    /// (duplicate email).
    fn create(&self, account: &mut Account) -> Result<(), StoreError>;

    /// Overwrites the row matching `account.id` with the given field values.
    ///
    /// This is a full-row replace, not a field-level patch, and it performs
    /// no compare-and-swap against a previously read value, so on its own it
    /// is exposed to lost updates. Returns [`StoreError::NotFound`] if the
    /// row does not exist.
    fn update(&self, account: &Account) -> Result<(), StoreError>;

    /// Removes the row with the given id.
    ///
    /// Deleting an id that does not exist succeeds.
    fn delete(&self, id: AccountId) -> Result<(), StoreError>;

    /// Runs `f` against a scoped store whose operations form one atomic
    /// unit of work: either every effect becomes visible together or none
    /// do.
    ///
    /// If `f` returns an error the transaction rolls back and the error is
    /// propagated unchanged. If the commit itself fails the caller receives
    /// [`StoreError::Transaction`] and must treat the mutation as not having
    /// happened.
    fn tx(&self, f: TxFn<'_>) -> Result<(), StoreError>;
}
