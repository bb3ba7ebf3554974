// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Redis-backed bucket store shared by several gateway processes
//!
//! The refill-and-consume step runs as one Lua script against the server clock, so
//! concurrent processes never double-spend points and clock skew between hosts does not
//! matter.

use redis::{Script, aio::MultiplexedConnection};
use tracing::info;

use crate::{
    error::StoreError,
    rate_limiter::{BucketPolicy, Consumption, RateLimitStore},
};

const CONSUME_SCRIPT: &str = r"
local capacity = tonumber(ARGV[1])
local refill_ms = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local clock = redis.call('TIME')
local now = tonumber(clock[1]) * 1000 + math.floor(tonumber(clock[2]) / 1000)
local state = redis.call('HMGET', KEYS[1], 'points', 'ts')
local points = tonumber(state[1])
local ts = tonumber(state[2])
if points == nil or ts == nil then
  points = capacity
  ts = now
end
local rate = capacity / refill_ms
points = math.min(capacity, points + math.max(0, now - ts) * rate)
local granted = 0
local wait = 0
if points + 1e-9 >= cost then
  points = math.max(0, points - cost)
  granted = 1
else
  wait = math.ceil((cost - points) / rate)
end
redis.call('HSET', KEYS[1], 'points', tostring(points), 'ts', now)
redis.call('PEXPIRE', KEYS[1], math.ceil(refill_ms * 2))
return {granted, tostring(points), wait}
";

/// Bucket store keeping state in Redis hashes
pub struct RedisRateLimitStore {
    connection: MultiplexedConnection,
    script: Script,
    key_prefix: String,
}

impl std::fmt::Debug for RedisRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimitStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisRateLimitStore {
    /// Connect to `url`; bucket keys are stored as `{key_prefix}:{namespace}`
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        let key_prefix = key_prefix.into();
        info!(key_prefix = %key_prefix, "connected rate limit store to redis");
        Ok(Self {
            connection,
            script: Script::new(CONSUME_SCRIPT),
            key_prefix,
        })
    }

    fn key(&self, namespace: &str) -> String {
        format!("{}:{namespace}", self.key_prefix)
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

impl RateLimitStore for RedisRateLimitStore {
    async fn try_consume(
        &self,
        namespace: &str,
        policy: BucketPolicy,
        cost: f64,
    ) -> Result<Consumption, StoreError> {
        let mut connection = self.connection.clone();
        let refill_ms = u64::try_from(policy.refill().as_millis()).unwrap_or(u64::MAX).max(1);

        let (granted, remaining, wait): (i64, String, i64) = self
            .script
            .key(self.key(namespace))
            .arg(policy.capacity())
            .arg(refill_ms)
            .arg(cost)
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;

        if granted == 1 {
            let remaining = remaining
                .parse::<f64>()
                .map_err(|err| StoreError::Unavailable(format!("malformed point count: {err}")))?;
            Ok(Consumption::Granted { remaining })
        } else {
            let wait = u64::try_from(wait).unwrap_or(0);
            Ok(Consumption::Denied {
                retry_after: std::time::Duration::from_millis(wait),
            })
        }
    }
}
