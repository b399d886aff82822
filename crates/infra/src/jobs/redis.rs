//! Redis-backed broker (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - `{prefix}:task:{id}`: task record as JSON
//! - `{prefix}:lane:{lane}`: ready list (LPUSH / BRPOPLPUSH, FIFO)
//! - `{prefix}:lane:{lane}:processing`: ids dequeued but not yet acked
//! - `{prefix}:lane:{lane}:delayed`: sorted set of requeued ids, scored by
//!   the unix-millis time they become ready
//! - `{prefix}:lane:{lane}:claims`: hash of processing id to claim time
//!
//! A dequeue atomically moves the id from the ready list to the processing
//! list and stamps its claim time. `ack` and `requeue` remove it from there.
//! Ids whose claim is older than the lease (their worker died) are moved
//! back by [`RedisBroker::recover_in_flight`], which every dequeue also runs.
//!
//! Multi-key moves and task writes run as Lua scripts so no step can leave
//! an id outside every list, and a finished task record is never overwritten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use printopt_core::{Lane, TaskId};

use super::broker::{Broker, BrokerError};
use super::types::Task;

const DEFAULT_PREFIX: &str = "printopt";

/// Default time a claimed task may stay in flight before it is redelivered.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(30 * 60);

/// KEYS: delayed, ready. ARGV: now.
const PROMOTE_DUE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('LPUSH', KEYS[2], id)
end
return #due
"#;

/// KEYS: processing, ready, claims. ARGV: now, lease.
///
/// An id without a claim is stamped on first sight, so it is only reclaimed
/// once a full lease has passed (unless the lease is zero).
const RECLAIM_STALE: &str = r#"
local now = tonumber(ARGV[1])
local lease = tonumber(ARGV[2])
local reclaimed = 0
for _, id in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
  local claimed = tonumber(redis.call('HGET', KEYS[3], id) or '')
  if claimed == nil and lease > 0 then
    redis.call('HSET', KEYS[3], id, now)
  elseif claimed == nil or now - claimed >= lease then
    redis.call('LREM', KEYS[1], 1, id)
    redis.call('HDEL', KEYS[3], id)
    redis.call('RPUSH', KEYS[2], id)
    reclaimed = reclaimed + 1
  end
end
return reclaimed
"#;

/// KEYS: task, processing, claims, delayed. ARGV: json, id, mode, ready_at.
///
/// Returns 1 when written, 0 when the stored task is already terminal (the
/// delivery is released without a write) and -1 when there is no record.
const WRITE_TASK: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local status = cjson.decode(current)['status']
if status == 'SUCCESS' or status == 'FAILURE' then
  redis.call('LREM', KEYS[2], 1, ARGV[2])
  redis.call('HDEL', KEYS[3], ARGV[2])
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
if ARGV[3] ~= 'started' then
  redis.call('LREM', KEYS[2], 1, ARGV[2])
  redis.call('HDEL', KEYS[3], ARGV[2])
end
if ARGV[3] == 'requeue' then
  redis.call('ZADD', KEYS[4], ARGV[4], ARGV[2])
end
return 1
"#;

#[derive(Debug)]
struct Scripts {
    promote_due: redis::Script,
    reclaim_stale: redis::Script,
    write_task: redis::Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            promote_due: redis::Script::new(PROMOTE_DUE),
            reclaim_stale: redis::Script::new(RECLAIM_STALE),
            write_task: redis::Script::new(WRITE_TASK),
        }
    }
}

/// How a task write affects the task's delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Started,
    Ack,
    Requeue { ready_at: i64 },
}

impl WriteMode {
    fn as_str(self) -> &'static str {
        match self {
            WriteMode::Started => "started",
            WriteMode::Ack => "ack",
            WriteMode::Requeue { .. } => "requeue",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisBroker {
    client: Arc<redis::Client>,
    prefix: String,
    claim_lease: Duration,
    scripts: Arc<Scripts>,
    closed: Arc<AtomicBool>,
}

impl RedisBroker {
    /// Create a broker for the given Redis URL (e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(map_redis_error)?;
        Ok(Self {
            client: Arc::new(client),
            prefix: DEFAULT_PREFIX.to_string(),
            claim_lease: DEFAULT_CLAIM_LEASE,
            scripts: Arc::new(Scripts::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// How long a claimed task may run before another worker may take it.
    ///
    /// Must exceed the longest handler run time.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    fn task_key(&self, id: TaskId) -> String {
        format!("{}:task:{}", self.prefix, id)
    }

    fn ready_key(&self, lane: Lane) -> String {
        format!("{}:lane:{}", self.prefix, lane)
    }

    fn processing_key(&self, lane: Lane) -> String {
        format!("{}:lane:{}:processing", self.prefix, lane)
    }

    fn delayed_key(&self, lane: Lane) -> String {
        format!("{}:lane:{}:delayed", self.prefix, lane)
    }

    fn claims_key(&self, lane: Lane) -> String {
        format!("{}:lane:{}:claims", self.prefix, lane)
    }

    fn connection(&self) -> Result<redis::Connection, BrokerError> {
        self.client.get_connection().map_err(map_redis_error)
    }

    /// Move processing ids whose claim outlived the lease back to the front
    /// of the lane's ready list. Returns how many were moved.
    #[instrument(skip(self), fields(lane = %lane))]
    pub fn recover_in_flight(&self, lane: Lane) -> Result<usize, BrokerError> {
        let mut conn = self.connection()?;
        let recovered = self.reclaim_stale(&mut conn, lane)?;
        if recovered > 0 {
            info!(lane = %lane, recovered, "recovered in-flight tasks");
        }
        Ok(recovered)
    }

    fn reclaim_stale(&self, conn: &mut redis::Connection, lane: Lane) -> Result<usize, BrokerError> {
        let reclaimed: i64 = self
            .scripts
            .reclaim_stale
            .key(self.processing_key(lane))
            .key(self.ready_key(lane))
            .key(self.claims_key(lane))
            .arg(Utc::now().timestamp_millis())
            .arg(self.claim_lease.as_millis() as i64)
            .invoke(conn)
            .map_err(map_redis_error)?;
        if reclaimed > 0 {
            warn!(lane = %lane, reclaimed, "redelivering tasks with expired claims");
        }
        Ok(reclaimed.max(0) as usize)
    }

    /// Move delayed ids whose time has come onto the ready list.
    fn promote_due(&self, conn: &mut redis::Connection, lane: Lane) -> Result<(), BrokerError> {
        self.scripts
            .promote_due
            .key(self.delayed_key(lane))
            .key(self.ready_key(lane))
            .arg(Utc::now().timestamp_millis())
            .invoke::<i64>(conn)
            .map_err(map_redis_error)?;
        Ok(())
    }

    /// Write the task unless its stored record is already terminal.
    fn write(&self, task: &Task, mode: WriteMode) -> Result<(), BrokerError> {
        let mut conn = self.connection()?;
        let ready_at = match mode {
            WriteMode::Requeue { ready_at } => ready_at,
            _ => 0,
        };
        let written: i64 = self
            .scripts
            .write_task
            .key(self.task_key(task.id))
            .key(self.processing_key(task.lane))
            .key(self.claims_key(task.lane))
            .key(self.delayed_key(task.lane))
            .arg(encode(task)?)
            .arg(task.id.to_string())
            .arg(mode.as_str())
            .arg(ready_at)
            .invoke(&mut conn)
            .map_err(map_redis_error)?;

        match written {
            1 => Ok(()),
            0 if mode == WriteMode::Ack => Ok(()),
            0 => Err(BrokerError::Terminal(task.id)),
            _ => Err(BrokerError::NotFound(task.id)),
        }
    }

    fn load(&self, conn: &mut redis::Connection, id: TaskId) -> Result<Option<Task>, BrokerError> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.task_key(id))
            .query(conn)
            .map_err(map_redis_error)?;
        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| BrokerError::Storage(format!("failed to decode task {id}: {e}")))
        })
        .transpose()
    }
}

fn encode(task: &Task) -> Result<String, BrokerError> {
    serde_json::to_string(task)
        .map_err(|e| BrokerError::Storage(format!("failed to encode task {}: {e}", task.id)))
}

fn map_redis_error(err: redis::RedisError) -> BrokerError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        BrokerError::Unavailable(err.to_string())
    } else {
        BrokerError::Storage(err.to_string())
    }
}

impl Broker for RedisBroker {
    #[instrument(skip(self, task), fields(task_id = %task.id, lane = %task.lane))]
    fn enqueue(&self, task: Task) -> Result<TaskId, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker is closed".into()));
        }
        let mut conn = self.connection()?;
        let json = encode(&task)?;

        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.task_key(task.id))
            .arg(json)
            .ignore()
            .cmd("LPUSH")
            .arg(self.ready_key(task.lane))
            .arg(task.id.to_string())
            .ignore()
            .query::<()>(&mut conn)
            .map_err(map_redis_error)?;

        Ok(task.id)
    }

    fn dequeue(&self, lane: Lane, timeout: Duration) -> Result<Option<Task>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut conn = self.connection()?;
        self.promote_due(&mut conn, lane)?;
        self.reclaim_stale(&mut conn, lane)?;

        let ready = self.ready_key(lane);
        let processing = self.processing_key(lane);
        let id: Option<String> = if timeout.is_zero() {
            redis::cmd("RPOPLPUSH")
                .arg(&ready)
                .arg(&processing)
                .query(&mut conn)
        } else {
            // BRPOPLPUSH treats 0 as "block forever"
            redis::cmd("BRPOPLPUSH")
                .arg(&ready)
                .arg(&processing)
                .arg(timeout.as_secs_f64().max(0.01))
                .query(&mut conn)
        }
        .map_err(map_redis_error)?;

        let Some(id) = id else {
            return Ok(None);
        };
        let task_id: TaskId = id
            .parse()
            .map_err(|e| BrokerError::Storage(format!("invalid task id {id:?} in {ready}: {e}")))?;

        redis::cmd("HSET")
            .arg(self.claims_key(lane))
            .arg(&id)
            .arg(Utc::now().timestamp_millis())
            .query::<()>(&mut conn)
            .map_err(map_redis_error)?;

        match self.load(&mut conn, task_id)? {
            Some(task) => {
                debug!(task_id = %task_id, lane = %lane, "dequeued task");
                Ok(Some(task))
            }
            None => {
                warn!(task_id = %task_id, lane = %lane, "dropping id without task record");
                redis::pipe()
                    .atomic()
                    .cmd("LREM")
                    .arg(&processing)
                    .arg(1)
                    .arg(&id)
                    .ignore()
                    .cmd("HDEL")
                    .arg(self.claims_key(lane))
                    .arg(&id)
                    .ignore()
                    .query::<()>(&mut conn)
                    .map_err(map_redis_error)?;
                Ok(None)
            }
        }
    }

    fn mark_started(&self, task: &Task) -> Result<(), BrokerError> {
        self.write(task, WriteMode::Started)
    }

    fn ack(&self, task: &Task) -> Result<(), BrokerError> {
        self.write(task, WriteMode::Ack)
    }

    fn requeue(&self, task: &Task, delay: Duration) -> Result<(), BrokerError> {
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        self.write(task, WriteMode::Requeue { ready_at })
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, BrokerError> {
        let mut conn = self.connection()?;
        self.load(&mut conn, task_id)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
