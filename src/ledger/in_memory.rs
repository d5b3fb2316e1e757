use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    error::LedgerError,
    ledger::{
        AttemptLedger,
        AttemptRecord,
        LedgerResult,
        MAX_ATTEMPTS,
    },
};

type AttemptKey = (String, String);

pub struct InMemoryLedger {
    entries: DashMap<AttemptKey, Arc<Mutex<Vec<AttemptRecord>>>>,
    limit: usize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            limit: MAX_ATTEMPTS,
        }
    }

    fn entry_for(&self, user_id: &str, problem_id: &str) -> Arc<Mutex<Vec<AttemptRecord>>> {
        self.entries
            .entry((user_id.to_string(), problem_id.to_string()))
            .or_default()
            .clone()
    }
}

#[async_trait]
impl AttemptLedger for InMemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn attempts(&self, user_id: &str, problem_id: &str) -> LedgerResult<Vec<AttemptRecord>> {
        let key = (user_id.to_string(), problem_id.to_string());
        let Some(entry) = self.entries.get(&key).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let attempts = entry.lock().await;
        Ok(attempts.clone())
    }

    async fn append_attempt(&self, record: AttemptRecord) -> LedgerResult<usize> {
        let entry = self.entry_for(&record.user_id, &record.problem_id);
        let mut attempts = entry.lock().await;
        if attempts.len() >= self.limit {
            return Err(LedgerError::AttemptsExceeded { limit: self.limit });
        }
        attempts.push(record);
        Ok(attempts.len())
    }
}
