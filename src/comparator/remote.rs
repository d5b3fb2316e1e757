use std::time::Duration;

use async_trait::async_trait;

use crate::{
    comparator::{
        Comparator,
        ComparisonOutcome,
        ComparisonRequest,
    },
    error::{
        GradeError,
        GradeResult,
    },
};

/// Delegates grading to an external semantic judge over HTTP.
pub struct RemoteComparator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RemoteComparator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> GradeResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GradeError::Comparator(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl Comparator for RemoteComparator {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn compare(&self, request: &ComparisonRequest) -> GradeResult<ComparisonOutcome> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GradeError::Comparator(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GradeError::Comparator(format!(
                "judge responded with {status}"
            )));
        }

        response
            .json::<ComparisonOutcome>()
            .await
            .map_err(|e| GradeError::Comparator(format!("unreadable judge response: {e}")))
    }
}
