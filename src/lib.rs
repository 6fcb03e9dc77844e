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

//! # Account Store
//!
//! This library provides an account store with two competing backends that
//! make one narrow systems property concrete: **no lost updates under
//! concurrent access to the same record**.
//!
//! ## Core Components
//!
//! - [`Store`]: capability interface, account CRUD plus [`Store::tx`], the
//!   atomicity primitive.
//! - [`TxStore`]: transactional backend; operations made through the scoped
//!   store inside `tx` are indivisible with respect to other transactions.
//! - [`DirectStore`]: concurrency-unsafe backend whose `tx` is a
//!   pass-through; it reliably loses updates and serves as the negative
//!   control.
//! - [`spend`]: the multi-step read-modify-write, generic over any backend.
//! - [`Table`]: the shared in-memory persistence collaborator.
//!
//! ## Example
//!
//! ```
//! use account_store::{Account, Store, Table, TxStore, spend};
//! use std::sync::Arc;
//!
//! let store = TxStore::new(Arc::new(Table::new()));
//!
//! let mut account = Account::new("Jon Calhoun", "jon@calhoun.io", 100);
//! store.create(&mut account).unwrap();
//!
//! spend(&store, account.id, 25).unwrap();
//! spend(&store, account.id, 25).unwrap();
//!
//! assert_eq!(store.find(account.id).unwrap().balance, 50);
//! ```
//!
//! ## Concurrency
//!
//! [`TxStore`] prevents lost updates with locking reads: the first `find`
//! inside a transaction takes the row's lock and holds it to commit or
//! rollback, so a concurrent spend against the same account blocks until
//! the first one settles. The blocking is deliberate; bound it with
//! [`TxStore::with_lock_timeout`] if waiting must not be open-ended.

pub mod account;
mod base;
mod direct;
pub mod error;
mod spend;
mod store;
mod table;
mod tx;

pub use account::Account;
pub use base::AccountId;
pub use direct::DirectStore;
pub use error::{Operation, StoreError, TxStage};
pub use spend::spend;
pub use store::{Store, TxFn};
pub use table::Table;
pub use tx::TxStore;
