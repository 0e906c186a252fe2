// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use serde_json::Value;

/// Durable key-value persistence that survives process restarts
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value stored under `key`, if any
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
}
