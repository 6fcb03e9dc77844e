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

//! The account record.
//!
//! # Example
//!
//! ```
//! use account_store::{Account, AccountId};
//!
//! let account = Account::new("Jon Calhoun", "jon@calhoun.io", 100);
//! assert_eq!(account.id, AccountId::UNSAVED);
//! assert_eq!(account.balance, 100);
//! ```

use crate::base::AccountId;
use serde::{Deserialize, Serialize};

/// An account row.
///
/// `balance` is a signed amount in the smallest currency unit and is the only
/// field subject to concurrent mutation. `name` and `email` are display
/// metadata; email uniqueness is enforced by the backing table, not here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub balance: i64,
}

impl Account {
    /// Builds an unsaved account. [`Store::create`](crate::Store::create)
    /// assigns the real id.
    pub fn new(name: impl Into<String>, email: impl Into<String>, balance: i64) -> Self {
        Self {
            id: AccountId::UNSAVED,
            name: name.into(),
            email: email.into(),
            balance,
        }
    }
}
