pub mod breaker;
pub mod judge0;
pub mod poller;

use std::fmt;

use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};

use crate::error::GradeResult;

pub use breaker::{
    BreakerConfig,
    CircuitBreaker,
};
pub use judge0::Judge0Client;
pub use poller::Poller;

/// Opaque token the execution service hands out for a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(pub String);

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub id: u32,
    #[serde(default)]
    pub description: String,
}

impl ExecutionStatus {
    pub const IN_QUEUE: u32 = 1;
    pub const PROCESSING: u32 = 2;
    pub const ACCEPTED: u32 = 3;

    pub fn is_terminal(&self) -> bool {
        !matches!(self.id, Self::IN_QUEUE | Self::PROCESSING)
    }

    pub fn is_success(&self) -> bool {
        self.id == Self::ACCEPTED
    }
}

/// Decoded execution result. Text fields are plain UTF-8; `None` means the
/// service reported `null`, which is not the same as an empty string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub token: Option<ExecutionHandle>,
    pub status: ExecutionStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub message: Option<String>,
    pub time_secs: Option<f64>,
    pub memory_kb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Pending { token: ExecutionHandle },
    Completed(ExecutionResult),
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submits one program. With `wait` the service runs it synchronously and
    /// the outcome is `Completed`; otherwise only a handle comes back.
    async fn submit(
        &self,
        source: &str,
        language_id: u32,
        wait: bool,
    ) -> GradeResult<SubmitOutcome>;

    async fn fetch(&self, handle: &ExecutionHandle) -> GradeResult<ExecutionResult>;

    /// `false` while calls are being refused without reaching the service.
    async fn is_available(&self) -> bool {
        true
    }
}
