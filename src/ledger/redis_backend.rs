use async_trait::async_trait;
use redis::{
    AsyncCommands,
    Script,
    aio::ConnectionManager,
};

use crate::{
    error::LedgerError,
    ledger::{
        AttemptLedger,
        AttemptRecord,
        LedgerResult,
        MAX_ATTEMPTS,
    },
};

/// Appends only while the list is below the cap; returns -1 when full.
const CAPPED_APPEND_LUA: &str = r#"
local key = KEYS[1]
local record = ARGV[1]
local limit = tonumber(ARGV[2])

if redis.call('LLEN', key) >= limit then
  return -1
end

return redis.call('RPUSH', key, record)
"#;

pub struct RedisLedger {
    manager: ConnectionManager,
    key_prefix: String,
}

impl RedisLedger {
    pub async fn new(url: &str, key_prefix: String) -> LedgerResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            key_prefix,
        })
    }
}

#[async_trait]
impl AttemptLedger for RedisLedger {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn attempts(&self, user_id: &str, problem_id: &str) -> LedgerResult<Vec<AttemptRecord>> {
        let mut conn = self.manager.clone();
        let key = attempts_key(&self.key_prefix, user_id, problem_id);
        let raw: Vec<String> = conn.lrange(&key, 0, -1).await?;
        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(LedgerError::from))
            .collect()
    }

    async fn append_attempt(&self, record: AttemptRecord) -> LedgerResult<usize> {
        let mut conn = self.manager.clone();
        let key = attempts_key(&self.key_prefix, &record.user_id, &record.problem_id);
        let payload = serde_json::to_string(&record)?;

        let count: i64 = Script::new(CAPPED_APPEND_LUA)
            .key(&key)
            .arg(payload)
            .arg(MAX_ATTEMPTS as i64)
            .invoke_async(&mut conn)
            .await?;

        if count < 0 {
            return Err(LedgerError::AttemptsExceeded {
                limit: MAX_ATTEMPTS,
            });
        }
        Ok(count as usize)
    }
}

/// `:` inside ids is escaped so distinct (user, problem) pairs never share a key.
fn attempts_key(prefix: &str, user_id: &str, problem_id: &str) -> String {
    format!("{}:{}:{}", prefix, escape(user_id), escape(problem_id))
}

fn escape(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}
