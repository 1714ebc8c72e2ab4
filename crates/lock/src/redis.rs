use crate::{Coordinator, LockError, LockMode, Result};
use parking_lot::Mutex;
use redis::{Client, Connection, RedisResult, Script};
use std::time::Duration;

/// Enqueue-or-grant, atomically. Time comes from the Redis server so that
/// nodes with skewed clocks agree on lease and heartbeat ages.
///
/// KEYS: queue (zset ticket), seen (zset last heartbeat ms), modes (hash),
///       holders (hash), leases (zset expiry ms), ticket counter
/// ARGV: waiter, mode (S|X), lease ms
const TRY_GRANT: &str = r"
if redis.replicate_commands then redis.replicate_commands() end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local waiter, mode, lease = ARGV[1], ARGV[2], tonumber(ARGV[3])

for _, h in ipairs(redis.call('ZRANGEBYSCORE', KEYS[5], '-inf', now)) do
  redis.call('HDEL', KEYS[4], h)
end
redis.call('ZREMRANGEBYSCORE', KEYS[5], '-inf', now)

for _, w in ipairs(redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now - lease)) do
  if w ~= waiter then
    redis.call('ZREM', KEYS[1], w)
    redis.call('ZREM', KEYS[2], w)
    redis.call('HDEL', KEYS[3], w)
  end
end

local function touch()
  for i = 1, 6 do redis.call('PEXPIRE', KEYS[i], lease * 2) end
end

if redis.call('HEXISTS', KEYS[4], waiter) == 1 then
  redis.call('ZADD', KEYS[5], now + lease, waiter)
  touch()
  return 1
end

local ticket = redis.call('ZSCORE', KEYS[1], waiter)
if not ticket then
  ticket = redis.call('INCR', KEYS[6])
  redis.call('ZADD', KEYS[1], ticket, waiter)
  redis.call('HSET', KEYS[3], waiter, mode)
end
ticket = tonumber(ticket)
redis.call('ZADD', KEYS[2], now, waiter)

local granted = false
if mode == 'X' then
  if redis.call('HLEN', KEYS[4]) == 0 then
    local head = redis.call('ZRANGE', KEYS[1], 0, 0)
    granted = head[1] == waiter
  end
else
  granted = true
  for _, m in ipairs(redis.call('HVALS', KEYS[4])) do
    if m == 'X' then granted = false end
  end
  if granted then
    for _, w in ipairs(redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ticket)) do
      if redis.call('HGET', KEYS[3], w) == 'X' then
        granted = false
        break
      end
    end
  end
end

if granted then
  redis.call('ZREM', KEYS[1], waiter)
  redis.call('ZREM', KEYS[2], waiter)
  redis.call('HDEL', KEYS[3], waiter)
  redis.call('HSET', KEYS[4], waiter, mode)
  redis.call('ZADD', KEYS[5], now + lease, waiter)
end
touch()
if granted then return 1 end
return 0
";

/// KEYS: queue, seen, modes, holders, leases
/// ARGV: waiter
const ABANDON: &str = r"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('ZREM', KEYS[5], ARGV[1])
return 1
";

/// KEYS: holders, leases
/// ARGV: holder
const RELEASE: &str = r"
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
";

/// Per-resource Redis keys. The resource is a hash tag so every key of one
/// resource lands on the same cluster slot.
struct Keys {
    queue: String,
    seen: String,
    modes: String,
    holders: String,
    leases: String,
    ticket: String,
}

impl Keys {
    fn new(prefix: &str, resource: &str) -> Self {
        let base = format!("{prefix}:{{{resource}}}");
        Self {
            queue: format!("{base}:queue"),
            seen: format!("{base}:seen"),
            modes: format!("{base}:modes"),
            holders: format!("{base}:holders"),
            leases: format!("{base}:leases"),
            ticket: format!("{base}:ticket"),
        }
    }
}

fn mode_flag(mode: LockMode) -> &'static str {
    match mode {
        LockMode::Shared => "S",
        LockMode::Exclusive => "X",
    }
}

/// A [`Coordinator`] backed by a Redis server.
///
/// Uses one connection, re-established after any failure. Every operation
/// is a single Lua script and therefore atomic on the server.
pub struct RedisCoordinator {
    client: Client,
    connection: Mutex<Option<Connection>>,
    key_prefix: String,
    timeout: Duration,
    try_grant: Script,
    abandon: Script,
    release: Script,
}

impl RedisCoordinator {
    /// `timeout` bounds connecting and each round trip.
    pub fn new(url: &str, key_prefix: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| LockError::Config(format!("invalid redis url '{url}': {e}")))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            key_prefix: key_prefix.to_string(),
            timeout,
            try_grant: Script::new(TRY_GRANT),
            abandon: Script::new(ABANDON),
            release: Script::new(RELEASE),
        })
    }

    fn connect(&self) -> RedisResult<Connection> {
        let con = self.client.get_connection_with_timeout(self.timeout)?;
        con.set_read_timeout(Some(self.timeout))?;
        con.set_write_timeout(Some(self.timeout))?;
        Ok(con)
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Result<T> {
        let mut slot = self.connection.lock();
        let result = match slot.as_mut() {
            Some(con) => f(con),
            None => self.connect().and_then(|mut con| {
                let result = f(&mut con);
                *slot = Some(con);
                result
            }),
        };
        result.map_err(|e| {
            // Drop the connection; the next call reconnects.
            *slot = None;
            LockError::Coordination(e.to_string())
        })
    }
}

impl Coordinator for RedisCoordinator {
    fn try_grant(
        &self,
        resource: &str,
        waiter: &str,
        mode: LockMode,
        lease: Duration,
    ) -> Result<bool> {
        let keys = Keys::new(&self.key_prefix, resource);
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let granted: i64 = self.with_connection(|con| {
            self.try_grant
                .prepare_invoke()
                .key(&keys.queue)
                .key(&keys.seen)
                .key(&keys.modes)
                .key(&keys.holders)
                .key(&keys.leases)
                .key(&keys.ticket)
                .arg(waiter)
                .arg(mode_flag(mode))
                .arg(lease_ms)
                .invoke(con)
        })?;
        Ok(granted == 1)
    }

    fn abandon(&self, resource: &str, waiter: &str, _mode: LockMode) -> Result<()> {
        let keys = Keys::new(&self.key_prefix, resource);
        self.with_connection(|con| {
            self.abandon
                .prepare_invoke()
                .key(&keys.queue)
                .key(&keys.seen)
                .key(&keys.modes)
                .key(&keys.holders)
                .key(&keys.leases)
                .arg(waiter)
                .invoke::<i64>(con)
        })?;
        Ok(())
    }

    fn release(&self, resource: &str, holder: &str, _mode: LockMode) -> Result<()> {
        let keys = Keys::new(&self.key_prefix, resource);
        self.with_connection(|con| {
            self.release
                .prepare_invoke()
                .key(&keys.holders)
                .key(&keys.leases)
                .arg(holder)
                .invoke::<i64>(con)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_share_a_hash_tag() {
        let keys = Keys::new("sheetstore:lock", "report.xlsx");
        assert_eq!(keys.queue, "sheetstore:lock:{report.xlsx}:queue");
        assert_eq!(keys.leases, "sheetstore:lock:{report.xlsx}:leases");
    }

    #[test]
    fn test_invalid_url_is_a_config_error() {
        assert!(matches!(
            RedisCoordinator::new("not a url", "p", Duration::from_millis(100)),
            Err(LockError::Config(_))
        ));
    }
}
