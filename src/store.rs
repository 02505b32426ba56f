use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    fingerprint::CacheFingerprint,
};

/// A completed execution, as written by the cache server once a step succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCacheRecord {
    pub id: i64,
    /// Serialized Argo outputs, copied verbatim into the pod's outputs annotation.
    pub execution_output: String,
    #[serde(default)]
    pub started_at_in_sec: i64,
    /// Seconds a record stays usable after `started_at_in_sec`. Negative means forever.
    #[serde(default = "never_stale")]
    pub max_cache_staleness: i64,
}

fn never_stale() -> i64 {
    -1
}

impl ExecutionCacheRecord {
    pub fn is_stale(&self, now_in_sec: i64) -> bool {
        self.max_cache_staleness >= 0
            && now_in_sec.saturating_sub(self.started_at_in_sec) > self.max_cache_staleness
    }
}

/// Read side of the execution cache. Shared by every in-flight admission request.
#[async_trait]
pub trait ExecutionCacheStore: Send + Sync {
    /// Look up a fresh record for `key`. Stale records are reported as absent.
    async fn get_execution_cache(
        &self,
        key: &CacheFingerprint,
    ) -> Result<Option<ExecutionCacheRecord>>;
}

fn now_in_sec() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn fresh(key: &CacheFingerprint, record: ExecutionCacheRecord) -> Option<ExecutionCacheRecord> {
    if record.is_stale(now_in_sec()) {
        debug!(key = %key, id = record.id, "ignoring stale cache record");
        return None;
    }
    Some(record)
}

/// Turn the value stored under `key` into a record, if there is a usable one.
fn decode(key: &CacheFingerprint, raw: Option<String>) -> Result<Option<ExecutionCacheRecord>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let record: ExecutionCacheRecord = serde_json::from_str(&raw).map_err(|e| {
        Error::CacheLookup(format!("record stored under {} is not valid: {}", key, e))
    })?;
    Ok(fresh(key, record))
}

/// Records kept as json strings under the hex fingerprint.
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect and ping. The connection manager reconnects on its own after this.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;
        let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        info!(reply = %pong, "connected to redis");
        Ok(Self { connection })
    }
}

#[async_trait]
impl ExecutionCacheStore for RedisCacheStore {
    async fn get_execution_cache(
        &self,
        key: &CacheFingerprint,
    ) -> Result<Option<ExecutionCacheRecord>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.get(key.to_hex()).await?;
        decode(key, raw)
    }
}

/// In-process store, handy for tests and running without a backend.
#[derive(Default)]
pub struct MemoryCacheStore {
    records: DashMap<CacheFingerprint, ExecutionCacheRecord>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: CacheFingerprint, record: ExecutionCacheRecord) {
        self.records.insert(key, record);
    }
}

#[async_trait]
impl ExecutionCacheStore for MemoryCacheStore {
    async fn get_execution_cache(
        &self,
        key: &CacheFingerprint,
    ) -> Result<Option<ExecutionCacheRecord>> {
        let record = self.records.get(key).map(|r| r.value().clone());
        Ok(record.and_then(|r| fresh(key, r)))
    }
}
