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

//! The spend operation.

use crate::base::AccountId;
use crate::error::StoreError;
use crate::store::Store;

/// Subtracts `amount` from the balance of account `id` as one atomic unit
/// of work.
///
/// The read-modify-write runs inside [`Store::tx`] using only the scoped
/// store, so its isolation is exactly whatever the injected backend
/// provides: exact accounting under concurrency on
/// [`TxStore`](crate::TxStore), lost updates on
/// [`DirectStore`](crate::DirectStore).
///
/// No business rules are enforced here: the balance may go negative and
/// `amount` may be zero or negative (a refund). Overdraft prevention, if
/// wanted, is a caller concern layered on top with an explicit balance
/// check before the update.
///
/// # Errors
///
/// - [`StoreError::NotFound`] - no account with the given id.
/// - [`StoreError::Transaction`] - the commit failed; the spend did not
///   happen.
/// - [`StoreError::Timeout`] - a bounded wait for the row lock expired.
pub fn spend<S: Store + ?Sized>(
    store: &S,
    id: AccountId,
    amount: i64,
) -> Result<(), StoreError> {
    store.tx(&mut |scoped: &dyn Store| {
        let mut account = scoped.find(id)?;
        account.balance -= amount;
        scoped.update(&account)
    })
}
