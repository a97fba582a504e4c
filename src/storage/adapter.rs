// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::errors::StorageError;
use async_trait::async_trait;
use serde_json::{Map, Value};

#[cfg(test)]
use mockall::automock;

/// Column/value pairs. Equality filters for `get`, the new row for `add`.
pub type Params = Map<String, Value>;

/// CRUD interface implemented by the application's persistence layer.
///
/// Each adapter backs a single table. Rows are JSON objects carrying an `id`
/// column assigned by the adapter on `add`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Returns every row matching all `params`, empty when none does.
    async fn get(&self, params: &Params) -> Result<Vec<Value>, StorageError>;

    /// Inserts a new row.
    async fn add(&self, params: &Params) -> Result<(), StorageError>;

    /// Removes the row with the given id.
    async fn remove(&self, id: i64) -> Result<(), StorageError>;
}
