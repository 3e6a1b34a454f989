use crate::config::StoreConnectionParams;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::keys;
use crate::store::CoordinationStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, IntoConnectionInfo};
use std::time::Duration;

const SCAN_BATCH: usize = 100;

/// Delete KEYS[1] only if its value is still ARGV[1].
const RELEASE_IF_OWNER_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed coordination store.
///
/// The multiplexed connection is cheap to clone, so every operation works on
/// its own handle and no client-side locking is needed.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect<T: IntoConnectionInfo>(target: T) -> ThrottlerResult<Self> {
        let client = Client::open(target).map_err(|e| {
            ThrottlerError::StoreUnavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            ThrottlerError::StoreUnavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self { connection })
    }

    pub async fn from_params(params: &StoreConnectionParams) -> ThrottlerResult<Self> {
        Self::connect(params.connection_info()).await
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn try_acquire_as(&self, key: &str, owner: &str, ttl: Duration) -> ThrottlerResult<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("SET NX failed: {}", e)))?;

        Ok(reply.is_some())
    }

    async fn release(&self, key: &str) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("DEL failed: {}", e)))
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> ThrottlerResult<bool> {
        let mut conn = self.connection.clone();
        let deleted: i64 = redis::cmd("EVAL")
            .arg(RELEASE_IF_OWNER_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(owner)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                ThrottlerError::StoreUnavailable(format!("Script execution failed: {}", e))
            })?;

        Ok(deleted == 1)
    }

    async fn count_by_prefix(&self, prefix: &str) -> ThrottlerResult<u64> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", keys::escape_glob(prefix));

        let mut cursor: u64 = 0;
        let mut total: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| ThrottlerError::StoreUnavailable(format!("SCAN failed: {}", e)))?;

            total += batch.len() as u64;
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(total)
    }

    async fn mark_expiring(&self, key: &str, ttl: Duration) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg("")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("SET PX failed: {}", e)))
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("Ping failed: {}", e)))
    }
}
