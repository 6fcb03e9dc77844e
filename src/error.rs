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

//! Error types for store operations.

use crate::base::AccountId;
use std::fmt;
use thiserror::Error;

/// The write operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// The transaction stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    Begin,
    Commit,
    Rollback,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStage::Begin => write!(f, "begin"),
            TxStage::Commit => write!(f, "commit"),
            TxStage::Rollback => write!(f, "rollback"),
        }
    }
}

/// Store operation errors.
///
/// A [`Transaction`](StoreError::Transaction) error means the mutation did
/// not happen, never that it partially happened. The store never retries on
/// the caller's behalf: retrying a spend after a transient transaction error
/// could double-spend, so retry policy stays with the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No account with the given id.
    #[error("account could not be located")]
    NotFound,

    /// Constraint violation or storage failure during a write.
    #[error("persistence error during {operation}: {detail}")]
    Persistence {
        operation: Operation,
        detail: String,
    },

    /// Failure to begin, commit, or roll back a transaction.
    #[error("transaction failed to {stage}: {detail}")]
    Transaction { stage: TxStage, detail: String },

    /// A bounded wait for a row lock expired before the lock was granted.
    #[error("timed out waiting for row lock on account {id}")]
    Timeout { id: AccountId },
}

impl StoreError {
    pub(crate) fn persistence(operation: Operation, detail: impl Into<String>) -> Self {
        StoreError::Persistence {
            operation,
            detail: detail.into(),
        }
    }

    pub(crate) fn transaction(stage: TxStage, detail: impl Into<String>) -> Self {
        StoreError::Transaction {
            stage,
            detail: detail.into(),
        }
    }
}
