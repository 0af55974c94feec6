//! Redis-backed durable queue with visibility timeouts.
//!
//! Layout for a queue named `q`:
//! - `filecast:queue:q:pending`  list of message ids, pushed left, popped right
//! - `filecast:queue:q:claiming` list of ids moved off `pending` by a blocking wait
//! - `filecast:queue:q:inflight` sorted set of ids scored by visibility deadline (ms)
//! - `filecast:queue:q:messages` hash id -> payload
//! - `filecast:queue:q:receives` hash id -> receive count
//! - `filecast:queue:q:dead`     list of payloads that exceeded the receive limit
//!
//! Every id is always in `pending`, `claiming` or `inflight` until it is
//! acknowledged or dead-lettered. Popping an id and marking it in flight
//! happen inside one script, so an error or crash mid-receive never strands it.

use async_trait::async_trait;
use filecast_core::{FilecastResult, MessageQueue, ReceivedMessage};
use redis::Script;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{RedisError, RedisPool, RedisResult};

/// Requeue expired in-flight ids, then claim up to `ARGV[1]` ids.
///
/// KEYS: claiming, pending, inflight, messages, receives, dead
/// ARGV: max count, now (ms), visibility deadline (ms), receive limit (-1 = none)
///
/// Returns `[id, payload, receive_count, dead_lettered]` flattened per claimed
/// id, with a trailing dead-letter count.
const RECEIVE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[2])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('RPUSH', KEYS[2], id)
end

local max = tonumber(ARGV[1])
local limit = tonumber(ARGV[4])
local out = {}
local claimed = 0
local dead = 0
while claimed < max do
  local id = redis.call('RPOP', KEYS[1])
  if not id then
    id = redis.call('RPOP', KEYS[2])
  end
  if not id then
    break
  end
  local payload = redis.call('HGET', KEYS[4], id)
  if not payload then
    redis.call('HDEL', KEYS[5], id)
  else
    local count = redis.call('HINCRBY', KEYS[5], id, 1)
    if limit >= 0 and count > limit then
      redis.call('LPUSH', KEYS[6], payload)
      redis.call('HDEL', KEYS[4], id)
      redis.call('HDEL', KEYS[5], id)
      dead = dead + 1
    else
      redis.call('ZADD', KEYS[3], ARGV[3], id)
      table.insert(out, id)
      table.insert(out, payload)
      table.insert(out, tostring(count))
      claimed = claimed + 1
    end
  end
end
table.insert(out, tostring(dead))
table.insert(out, tostring(#expired))
return out
"#;

struct QueueKeys {
    pending: String,
    claiming: String,
    inflight: String,
    messages: String,
    receives: String,
    dead: String,
}

impl QueueKeys {
    fn new(name: &str) -> Self {
        let base = format!("filecast:queue:{}", name);
        Self {
            pending: format!("{}:pending", base),
            claiming: format!("{}:claiming", base),
            inflight: format!("{}:inflight", base),
            messages: format!("{}:messages", base),
            receives: format!("{}:receives", base),
            dead: format!("{}:dead", base),
        }
    }
}

/// Ack handles are `{id}:{receive_count}`; only the id matters for deletion.
fn handle_id(ack_handle: &str) -> &str {
    ack_handle
        .rsplit_once(':')
        .map(|(id, _)| id)
        .unwrap_or(ack_handle)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Result of one run of the receive script.
#[derive(Debug, Default, PartialEq, Eq)]
struct ClaimedBatch {
    messages: Vec<ReceivedMessage>,
    dead_lettered: usize,
    reclaimed: usize,
}

fn parse_count(raw: &str) -> RedisResult<usize> {
    raw.parse()
        .map_err(|_| RedisError::OperationFailed(format!("invalid count '{}' from receive script", raw)))
}

fn parse_claimed(mut reply: Vec<String>) -> RedisResult<ClaimedBatch> {
    let reclaimed = reply.pop().as_deref().map(parse_count).transpose()?;
    let dead_lettered = reply.pop().as_deref().map(parse_count).transpose()?;
    let (Some(reclaimed), Some(dead_lettered)) = (reclaimed, dead_lettered) else {
        return Err(RedisError::OperationFailed("truncated receive script reply".to_string()));
    };
    if reply.len() % 3 != 0 {
        return Err(RedisError::OperationFailed(format!(
            "receive script returned {} fields, expected triples",
            reply.len()
        )));
    }

    let mut messages = Vec::with_capacity(reply.len() / 3);
    for chunk in reply.chunks_exact(3) {
        let [id, payload, count] = chunk else {
            continue;
        };
        let receive_count: u32 = count
            .parse()
            .map_err(|_| RedisError::OperationFailed(format!("receive count '{}' out of range", count)))?;
        messages.push(ReceivedMessage {
            payload: payload.clone(),
            ack_handle: format!("{}:{}", id, receive_count),
            receive_count,
        });
    }
    Ok(ClaimedBatch {
        messages,
        dead_lettered,
        reclaimed,
    })
}

pub struct RedisQueue {
    pool: RedisPool,
    name: String,
    keys: QueueKeys,
    visibility_timeout: Duration,
    max_receive_count: Option<u32>,
    receive_script: Script,
}

impl RedisQueue {
    pub fn new(pool: RedisPool, name: &str, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            name: name.to_string(),
            keys: QueueKeys::new(name),
            visibility_timeout,
            max_receive_count: None,
            receive_script: Script::new(RECEIVE_SCRIPT),
        }
    }

    /// Dead-letter messages received more than `count` times.
    pub fn with_max_receive_count(mut self, count: Option<u32>) -> Self {
        self.max_receive_count = count;
        self
    }

    /// Reclaim expired ids and claim up to `max_count` in one atomic step.
    async fn claim_batch(&self, conn: &mut RedisPool, max_count: usize) -> RedisResult<Vec<ReceivedMessage>> {
        let now = now_ms();
        let deadline = now + self.visibility_timeout.as_millis() as i64;
        let limit = self.max_receive_count.map_or(-1, i64::from);

        let reply: Vec<String> = self
            .receive_script
            .key(&self.keys.claiming)
            .key(&self.keys.pending)
            .key(&self.keys.inflight)
            .key(&self.keys.messages)
            .key(&self.keys.receives)
            .key(&self.keys.dead)
            .arg(max_count)
            .arg(now)
            .arg(deadline)
            .arg(limit)
            .invoke_async(conn)
            .await?;

        let batch = parse_claimed(reply)?;
        if batch.reclaimed > 0 {
            debug!(queue = %self.name, reclaimed = batch.reclaimed, "Visibility timeout expired, messages requeued");
        }
        if batch.dead_lettered > 0 {
            warn!(queue = %self.name, count = batch.dead_lettered, "Messages exceeded receive limit, dead-lettered");
        }
        Ok(batch.messages)
    }

    async fn enqueue_inner(&self, payload: &str) -> RedisResult<String> {
        let mut conn = self.pool.clone();
        let id = Uuid::new_v4().to_string();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&self.keys.messages, &id, payload)
            .ignore()
            .lpush(&self.keys.pending, &id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(id)
    }

    async fn receive_inner(&self, max_count: usize, wait: Duration) -> RedisResult<Vec<ReceivedMessage>> {
        let mut conn = self.pool.clone();
        let messages = self.claim_batch(&mut conn, max_count).await?;
        // BLMOVE treats a zero timeout as "block forever".
        if !messages.is_empty() || wait.is_zero() {
            return Ok(messages);
        }

        // Block until an id arrives. It is parked in `claiming`, never
        // outside a key, and the next claim drains `claiming` first.
        let parked: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.keys.pending)
            .arg(&self.keys.claiming)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(wait.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        if parked.is_none() {
            return Ok(Vec::new());
        }
        self.claim_batch(&mut conn, max_count).await
    }

    async fn acknowledge_inner(&self, ack_handle: &str) -> RedisResult<()> {
        let mut conn = self.pool.clone();
        let id = handle_id(ack_handle);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrem(&self.keys.inflight, id)
            .ignore()
            .hdel(&self.keys.messages, id)
            .ignore()
            .hdel(&self.keys.receives, id)
            .ignore()
            .lrem(&self.keys.pending, 0, id)
            .ignore()
            .lrem(&self.keys.claiming, 0, id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn enqueue(&self, payload: &str) -> FilecastResult<String> {
        self.enqueue_inner(payload)
            .await
            .map_err(|e| e.into_queue_error(&self.name))
    }

    async fn receive(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> FilecastResult<Vec<ReceivedMessage>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        self.receive_inner(max_count, wait)
            .await
            .map_err(|e| e.into_queue_error(&self.name))
    }

    async fn acknowledge(&self, ack_handle: &str) -> FilecastResult<()> {
        self.acknowledge_inner(ack_handle)
            .await
            .map_err(|e| e.into_queue_error(&self.name))
    }
}
