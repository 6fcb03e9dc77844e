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

//! The concurrency-unsafe direct backend.
//!
//! Every operation runs straight against the live table with no isolation
//! boundary, and [`tx`](Store::tx) is a pass-through. A `find` followed by
//! an `update` under concurrency reliably loses updates: two callers can
//! both read the same balance and the second blind write erases the first.
//!
//! This backend exists as the negative control for
//! [`TxStore`](crate::TxStore): the test suite uses it to demonstrate the
//! exact failure mode the transactional backend prevents.

use crate::account::Account;
use crate::base::AccountId;
use crate::error::StoreError;
use crate::store::{Store, TxFn};
use crate::table::Table;
use std::sync::Arc;

/// Direct view over a [`Table`]: autocommit semantics, no transactions.
#[derive(Clone)]
pub struct DirectStore {
    table: Arc<Table>,
}

impl DirectStore {
    pub fn new(table: Arc<Table>) -> Self {
        DirectStore { table }
    }
}

impl Store for DirectStore {
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

    /// No-op pass-through: the closure runs against this store itself, so
    /// nothing it does is isolated from concurrent callers.
    fn tx(&self, f: TxFn<'_>) -> Result<(), StoreError> {
        f(self)
    }
}
