pub mod in_memory;
pub mod redis_backend;

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::LedgerError,
    language::LanguageKey,
};

pub use in_memory::InMemoryLedger;
pub use redis_backend::RedisLedger;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Graded attempts a user may store per problem.
pub const MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub user_id: String,
    pub problem_id: String,
    pub language: LanguageKey,
    pub code: String,
    pub results: Vec<bool>,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(
        user_id: impl Into<String>,
        problem_id: impl Into<String>,
        language: LanguageKey,
        code: impl Into<String>,
        results: Vec<bool>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            problem_id: problem_id.into(),
            language,
            code: code.into(),
            results,
            recorded_at: Utc::now(),
        }
    }
}

/// Stores the pass/fail vector of each graded attempt.
///
/// `append_attempt` must check the cap and append atomically: once
/// `MAX_ATTEMPTS` records exist it fails with `AttemptsExceeded` and leaves
/// the stored attempts untouched.
#[async_trait]
pub trait AttemptLedger: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempts(&self, user_id: &str, problem_id: &str) -> LedgerResult<Vec<AttemptRecord>>;

    /// Returns the number of stored attempts after the append.
    async fn append_attempt(&self, record: AttemptRecord) -> LedgerResult<usize>;
}
