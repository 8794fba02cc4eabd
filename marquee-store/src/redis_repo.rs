use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use uuid::Uuid;

use marquee_core::{InsertOutcome, RemoveOutcome, SeatLock, SeatLockTable, SeatPos, StoreError};

fn seat_key(screening_id: Uuid, seat: SeatPos) -> String {
    format!("seat:{}:{}:{}", screening_id, seat.row, seat.col)
}

/// Lock table on Redis. One key per seat, value is the lock as JSON, TTL
/// pinned to the lock's own expiry so lapsed entries vanish without a
/// sweeper. Both mutations run as Lua scripts; the get-compare-set is
/// atomic on the server, never in the client.
#[derive(Clone)]
pub struct RedisLockTable {
    client: redis::Client,
    insert_script: redis::Script,
    remove_script: redis::Script,
}

// KEYS[1] seat key, ARGV[1] lock json, ARGV[2] holder id, ARGV[3] ttl ms.
// 1 = created, 2 = refreshed (original created_at kept), 0 = conflict.
const INSERT_SCRIPT: &str = r#"
    local cur = redis.call('GET', KEYS[1])
    if not cur then
        redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[3])
        return 1
    end
    local held = cjson.decode(cur)
    if held.holder_id == ARGV[2] then
        local fresh = cjson.decode(ARGV[1])
        fresh.created_at = held.created_at
        redis.call('SET', KEYS[1], cjson.encode(fresh), 'PX', ARGV[3])
        return 2
    end
    return 0
"#;

// KEYS[1] seat key, ARGV[1] holder id.
// 0 = removed, 1 = not held, 2 = held by another holder.
const REMOVE_SCRIPT: &str = r#"
    local cur = redis.call('GET', KEYS[1])
    if not cur then
        return 1
    end
    local held = cjson.decode(cur)
    if held.holder_id == ARGV[1] then
        redis.call('DEL', KEYS[1])
        return 0
    end
    return 2
"#;

impl RedisLockTable {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            insert_script: redis::Script::new(INSERT_SCRIPT),
            remove_script: redis::Script::new(REMOVE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn scan_keys(
        &self,
        conn: &mut MultiplexedConnection,
        pattern: &str,
    ) -> Result<Vec<String>, redis::RedisError> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl SeatLockTable for RedisLockTable {
    async fn query(
        &self,
        screening_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, StoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("seat:{}:*", screening_id);
        let keys = self.scan_keys(&mut conn, &pattern).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut locks = Vec::new();
        for value in values.into_iter().flatten() {
            let lock: SeatLock = serde_json::from_str(&value)?;
            // TTL usually beats us to expired entries; the filter covers
            // the sliver between logical expiry and Redis eviction.
            if lock.is_active(now) {
                locks.push(lock);
            }
        }
        Ok(locks)
    }

    async fn insert(
        &self,
        lock: SeatLock,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let ttl_ms = (lock.expires_at - now).num_milliseconds();
        if ttl_ms <= 0 {
            return Err("lock expiry must lie in the future".into());
        }

        let mut conn = self.connection().await?;
        let key = seat_key(lock.screening_id, lock.seat);
        let payload = serde_json::to_string(&lock)?;
        let outcome: i64 = self
            .insert_script
            .key(key)
            .arg(payload)
            .arg(lock.holder_id.to_string())
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(InsertOutcome::Created),
            2 => Ok(InsertOutcome::Refreshed),
            _ => Ok(InsertOutcome::Conflict),
        }
    }

    async fn remove(
        &self,
        screening_id: Uuid,
        seat: SeatPos,
        holder_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<RemoveOutcome, StoreError> {
        let mut conn = self.connection().await?;
        let outcome: i64 = self
            .remove_script
            .key(seat_key(screening_id, seat))
            .arg(holder_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            0 => Ok(RemoveOutcome::Removed),
            1 => Ok(RemoveOutcome::NotHeld),
            _ => Ok(RemoveOutcome::HeldByOther),
        }
    }

    async fn sweep(&self, _now: DateTime<Utc>) -> Result<Vec<SeatLock>, StoreError> {
        // Key TTLs do the reclamation; nothing left to delete or report.
        Ok(Vec::new())
    }
}
