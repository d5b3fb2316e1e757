//! One grading session: validate, assemble, run, parse and compare.
//!
//! The session is strictly sequential and holds no shared mutable state; only
//! the calls to the execution service, the poll sleeps and the comparator
//! suspend.

use std::{
    sync::Arc,
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::{
    comparator::{
        Comparator,
        ComparisonRequest,
        LabeledOutputs,
    },
    error::{
        GradeError,
        GradeResult,
    },
    executor::{
        ExecutionBackend,
        ExecutionResult,
        ExecutionStatus,
        Poller,
        SubmitOutcome,
    },
    harness::{
        self,
        SubmissionRequest,
    },
    language::LanguageRegistry,
    metrics::MetricsRegistry,
};

/// Test cases beyond this count are ignored.
pub const MAX_TEST_CASES: usize = 5;

pub const DEFAULT_REFERENCE_SPACING: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_REFERENCE_BATCH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Argument list as source text, e.g. `[1, 2], 3`.
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub language: String,
    pub source: String,
    pub function_name: String,
    #[serde(default)]
    pub indent_width: usize,
    #[serde(default)]
    pub problem_title: String,
    #[serde(default)]
    pub problem_description: String,
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub graded: bool,
    pub is_correct: Vec<bool>,
    pub hint: Option<String>,
    pub actual_outputs: Vec<String>,
    pub status: ExecutionStatus,
    pub time_secs: Option<f64>,
    pub memory_kb: Option<u64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingStage {
    Validating,
    Assembling,
    Submitting,
    Polling,
    Parsing,
    Comparing,
    Done,
    Failed,
}

impl GradingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Assembling => "assembling",
            Self::Submitting => "submitting",
            Self::Polling => "polling",
            Self::Parsing => "parsing",
            Self::Comparing => "comparing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

pub struct GradingPipeline {
    registry: Arc<LanguageRegistry>,
    backend: Arc<dyn ExecutionBackend>,
    comparator: Arc<dyn Comparator>,
    poller: Poller,
    wait: bool,
    reference_spacing: Duration,
    max_reference_batch: usize,
    metrics: Arc<MetricsRegistry>,
}

impl GradingPipeline {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        backend: Arc<dyn ExecutionBackend>,
        comparator: Arc<dyn Comparator>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry,
            backend,
            comparator,
            poller: Poller::default().with_metrics(metrics.clone()),
            wait: false,
            reference_spacing: DEFAULT_REFERENCE_SPACING,
            max_reference_batch: DEFAULT_MAX_REFERENCE_BATCH,
            metrics,
        }
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller.with_metrics(self.metrics.clone());
        self
    }

    /// Ask the execution service to run submissions synchronously.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_reference_spacing(mut self, spacing: Duration) -> Self {
        self.reference_spacing = spacing;
        self
    }

    pub fn with_max_reference_batch(mut self, max: usize) -> Self {
        self.max_reference_batch = max.max(1);
        self
    }

    pub fn max_reference_batch(&self) -> usize {
        self.max_reference_batch
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.backend.as_ref()
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub async fn grade(&self, request: &GradeRequest) -> GradeResult<Verdict> {
        let grading_id = Uuid::new_v4();
        self.metrics.grading_started();
        tracing::info!(
            %grading_id,
            language = %request.language,
            cases = request.test_cases.len(),
            "grading started"
        );

        let outcome = self.run(grading_id, request).await;
        match &outcome {
            Ok(verdict) => {
                self.metrics.grading_completed(verdict.graded);
                tracing::info!(
                    %grading_id,
                    stage = GradingStage::Done.as_str(),
                    graded = verdict.graded,
                    passed = verdict.is_correct.iter().filter(|ok| **ok).count(),
                    "grading finished"
                );
            }
            Err(err) => {
                self.metrics.grading_failed(err.code());
                tracing::warn!(
                    %grading_id,
                    stage = GradingStage::Failed.as_str(),
                    code = err.code(),
                    error = %err,
                    "grading failed"
                );
            }
        }
        outcome
    }

    /// Grades reference solutions one after another, pausing after every
    /// submission that reached the execution service so a bulk run does not
    /// flood it. Requests rejected locally cost no pause.
    pub async fn grade_references(&self, requests: &[GradeRequest]) -> Vec<GradeResult<Verdict>> {
        let mut verdicts = Vec::with_capacity(requests.len());
        let mut submitted = false;
        for request in requests {
            if submitted {
                tokio::time::sleep(self.reference_spacing).await;
            }
            let outcome = self.grade(request).await;
            submitted = !matches!(&outcome, Err(err) if err.is_local());
            verdicts.push(outcome);
        }
        verdicts
    }

    async fn run(&self, grading_id: Uuid, request: &GradeRequest) -> GradeResult<Verdict> {
        enter(grading_id, GradingStage::Validating);
        validate(&self.registry, request)?;
        let cases = &request.test_cases[..request.test_cases.len().min(MAX_TEST_CASES)];

        enter(grading_id, GradingStage::Assembling);
        let program = harness::assemble(&self.registry, &SubmissionRequest {
            language: request.language.clone(),
            source: request.source.clone(),
            function_name: request.function_name.clone(),
            test_args: cases.iter().map(|case| case.input.clone()).collect(),
            indent_width: request.indent_width,
        })?;

        enter(grading_id, GradingStage::Submitting);
        let submitted = self
            .backend
            .submit(&program.source, program.judge0_id, self.wait)
            .await?;
        self.metrics.execution_submitted();

        let result = match submitted {
            SubmitOutcome::Completed(result) if result.status.is_terminal() => result,
            SubmitOutcome::Completed(ExecutionResult {
                token: Some(token), ..
            })
            | SubmitOutcome::Pending { token } => {
                enter(grading_id, GradingStage::Polling);
                let result = self.poller.poll_until_terminal(self.backend(), &token).await?;
                if !result.status.is_terminal() {
                    return Err(GradeError::Timeout {
                        attempts: self.poller.max_retries(),
                    });
                }
                result
            }
            SubmitOutcome::Completed(_) => {
                return Err(GradeError::UnexpectedResponseShape(
                    "pending result without a token".to_string(),
                ));
            }
        };

        enter(grading_id, GradingStage::Parsing);
        let actual_outputs = split_outputs(&result, cases.len())?;

        enter(grading_id, GradingStage::Comparing);
        let comparison = ComparisonRequest {
            actual_outputs_by_label: LabeledOutputs::positional(actual_outputs.iter().cloned()),
            expected_outputs_by_label: LabeledOutputs::positional(
                cases.iter().map(|case| case.expected_output.clone()),
            ),
            problem_title: request.problem_title.clone(),
            problem_description: request.problem_description.clone(),
        };
        let outcome = self.comparator.compare(&comparison).await?;
        if outcome.is_correct.len() != cases.len() {
            return Err(GradeError::Comparator(format!(
                "{} returned {} results for {} test cases",
                self.comparator.name(),
                outcome.is_correct.len(),
                cases.len()
            )));
        }

        Ok(Verdict {
            graded: outcome.graded,
            is_correct: outcome.is_correct,
            hint: outcome.hint,
            actual_outputs,
            status: result.status,
            time_secs: result.time_secs,
            memory_kb: result.memory_kb,
            stdout: result.stdout,
            stderr: result.stderr,
            compile_output: result.compile_output,
        })
    }
}

fn enter(grading_id: Uuid, stage: GradingStage) {
    tracing::debug!(%grading_id, stage = stage.as_str(), "grading stage");
}

fn validate(registry: &LanguageRegistry, request: &GradeRequest) -> GradeResult<()> {
    if request.source.trim().is_empty() {
        return Err(GradeError::EmptySource);
    }
    registry.get(&request.language)?;
    if request.function_name.trim().is_empty() {
        return Err(GradeError::InvalidRequest(
            "function name is required".to_string(),
        ));
    }
    if request.test_cases.is_empty() {
        return Err(GradeError::InvalidRequest(
            "at least one test case is required".to_string(),
        ));
    }
    Ok(())
}

/// One output per test case: line `i` of stdout belongs to case `i`. Missing
/// lines read as empty, extra lines are ignored.
fn split_outputs(result: &ExecutionResult, cases: usize) -> GradeResult<Vec<String>> {
    let stdout = match result.stdout.as_deref() {
        Some(stdout) if !stdout.is_empty() => stdout,
        _ => {
            return Err(GradeError::NoOutput {
                status: result.status.description.clone(),
                stderr: result.stderr.clone(),
                compile_output: result.compile_output.clone(),
            });
        }
    };

    let mut lines = stdout.lines();
    Ok((0..cases)
        .map(|_| lines.next().unwrap_or_default().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{
            AtomicUsize,
            Ordering,
        },
        time::Instant,
    };

    use async_trait::async_trait;
    use base64::{
        Engine,
        engine::general_purpose::STANDARD,
    };

    use super::*;
    use crate::{
        comparator::{
            ComparisonOutcome,
            NormalizedComparator,
        },
        executor::judge0::tests::{
            FakeService,
            client_for,
            spawn_fake,
        },
    };

    async fn pipeline_for(service: FakeService) -> GradingPipeline {
        let base_url = spawn_fake(service).await;
        GradingPipeline::new(
            Arc::new(LanguageRegistry::builtin().unwrap()),
            Arc::new(client_for(base_url)),
            Arc::new(NormalizedComparator),
            Arc::new(MetricsRegistry::new()),
        )
        .with_poller(Poller::new(5, Duration::from_millis(5)))
    }

    fn squares_request() -> GradeRequest {
        GradeRequest {
            language: "python".to_string(),
            source: "def square(n):\n    return n * n".to_string(),
            function_name: "square".to_string(),
            indent_width: 4,
            problem_title: "Squares".to_string(),
            problem_description: "Return n squared".to_string(),
            test_cases: (1..=5)
                .map(|n| TestCase {
                    input: n.to_string(),
                    expected_output: (n * n).to_string(),
                })
                .collect(),
        }
    }

    fn submitted_program(service: &FakeService) -> String {
        let body = service.last_body.lock().unwrap().clone().unwrap();
        let encoded = body["source_code"].as_str().unwrap().to_string();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn empty_source_never_reaches_the_network() {
        let service = FakeService::default();
        let pipeline = pipeline_for(service.clone()).await;
        let request = GradeRequest {
            source: "   \n".to_string(),
            ..squares_request()
        };

        let err = pipeline.grade(&request).await.unwrap_err();

        assert!(matches!(err, GradeError::EmptySource));
        assert_eq!(service.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected_before_submitting() {
        let service = FakeService::default();
        let pipeline = pipeline_for(service.clone()).await;
        let request = GradeRequest {
            language: "cobol".to_string(),
            ..squares_request()
        };

        let err = pipeline.grade(&request).await.unwrap_err();

        assert!(matches!(err, GradeError::UnsupportedLanguage(key) if key == "cobol"));
        assert_eq!(service.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_function_name_or_cases_is_invalid() {
        let pipeline = pipeline_for(FakeService::default()).await;

        let unnamed = GradeRequest {
            function_name: " ".to_string(),
            ..squares_request()
        };
        assert!(matches!(
            pipeline.grade(&unnamed).await,
            Err(GradeError::InvalidRequest(_))
        ));

        let caseless = GradeRequest {
            test_cases: Vec::new(),
            ..squares_request()
        };
        assert!(matches!(
            pipeline.grade(&caseless).await,
            Err(GradeError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn correct_python_solution_passes_every_case() {
        let service = FakeService {
            stdout: Some("1\n4\n9\n16\n25\n".to_string()),
            pending_fetches: 1,
            ..Default::default()
        };
        let pipeline = pipeline_for(service.clone()).await;

        let verdict = pipeline.grade(&squares_request()).await.unwrap();

        assert!(verdict.graded);
        assert_eq!(verdict.is_correct, vec![true; 5]);
        assert_eq!(verdict.actual_outputs, vec!["1", "4", "9", "16", "25"]);
        assert_eq!(service.fetches.load(Ordering::SeqCst), 2);

        let program = submitted_program(&service);
        assert!(program.contains("print(square(1))"));
        assert!(program.contains("print(square(5))"));
    }

    #[tokio::test]
    async fn short_output_still_yields_one_flag_per_case() {
        let service = FakeService {
            stdout: Some("1\n4\n9\n".to_string()),
            ..Default::default()
        };
        let pipeline = pipeline_for(service).await;

        let verdict = pipeline.grade(&squares_request()).await.unwrap();

        assert_eq!(verdict.is_correct, vec![true, true, true, false, false]);
        assert_eq!(verdict.actual_outputs[3], "");
        assert_eq!(verdict.actual_outputs[4], "");
    }

    #[tokio::test]
    async fn only_the_first_five_cases_are_run() {
        let service = FakeService {
            stdout: Some("1\n4\n9\n16\n25\n36\n49\n".to_string()),
            ..Default::default()
        };
        let pipeline = pipeline_for(service.clone()).await;
        let request = GradeRequest {
            test_cases: (1..=7)
                .map(|n| TestCase {
                    input: n.to_string(),
                    expected_output: (n * n).to_string(),
                })
                .collect(),
            ..squares_request()
        };

        let verdict = pipeline.grade(&request).await.unwrap();

        assert_eq!(verdict.is_correct.len(), MAX_TEST_CASES);
        assert!(!submitted_program(&service).contains("square(6)"));
    }

    #[tokio::test]
    async fn service_error_on_submit_is_reported() {
        let service = FakeService {
            submit_status: Some(500),
            ..Default::default()
        };
        let pipeline = pipeline_for(service).await;

        let err = pipeline.grade(&squares_request()).await.unwrap_err();

        assert!(matches!(
            err,
            GradeError::ExecutionService {
                status: Some(500),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn never_finishing_execution_times_out() {
        let service = FakeService {
            stdout: Some("1\n".to_string()),
            pending_fetches: usize::MAX,
            ..Default::default()
        };
        let pipeline = pipeline_for(service.clone())
            .await
            .with_poller(Poller::new(3, Duration::from_millis(1)));

        let err = pipeline.grade(&squares_request()).await.unwrap_err();

        assert!(matches!(err, GradeError::Timeout { attempts: 3 }));
        assert_eq!(service.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn silent_program_is_no_output() {
        let pipeline = pipeline_for(FakeService::default()).await;

        let err = pipeline.grade(&squares_request()).await.unwrap_err();

        assert!(matches!(err, GradeError::NoOutput { status, .. } if status == "Accepted"));
    }

    #[tokio::test]
    async fn wait_mode_skips_polling() {
        let service = FakeService {
            stdout: Some("1\n4\n9\n16\n25\n".to_string()),
            ..Default::default()
        };
        let pipeline = pipeline_for(service.clone()).await.with_wait(true);

        let verdict = pipeline.grade(&squares_request()).await.unwrap();

        assert!(verdict.is_correct.iter().all(|ok| *ok));
        assert_eq!(service.fetches.load(Ordering::SeqCst), 0);
    }

    struct CountingComparator {
        calls: AtomicUsize,
        flags: Vec<bool>,
    }

    #[async_trait]
    impl Comparator for CountingComparator {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn compare(&self, _: &ComparisonRequest) -> GradeResult<ComparisonOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ComparisonOutcome {
                graded: true,
                hint: Some("check the last case".to_string()),
                is_correct: self.flags.clone(),
            })
        }
    }

    async fn pipeline_with(comparator: Arc<CountingComparator>) -> GradingPipeline {
        let service = FakeService {
            stdout: Some("1\n4\n9\n16\n25\n".to_string()),
            ..Default::default()
        };
        let base_url = spawn_fake(service).await;
        GradingPipeline::new(
            Arc::new(LanguageRegistry::builtin().unwrap()),
            Arc::new(client_for(base_url)),
            comparator,
            Arc::new(MetricsRegistry::new()),
        )
        .with_wait(true)
    }

    #[tokio::test]
    async fn comparator_runs_once_and_supplies_the_hint() {
        let comparator = Arc::new(CountingComparator {
            calls: AtomicUsize::new(0),
            flags: vec![true, true, true, true, false],
        });
        let pipeline = pipeline_with(comparator.clone()).await;

        let verdict = pipeline.grade(&squares_request()).await.unwrap();

        assert_eq!(comparator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(verdict.hint.as_deref(), Some("check the last case"));
        assert!(!verdict.is_correct[4]);
    }

    #[tokio::test]
    async fn comparator_result_of_wrong_length_is_an_error() {
        let comparator = Arc::new(CountingComparator {
            calls: AtomicUsize::new(0),
            flags: vec![true],
        });
        let pipeline = pipeline_with(comparator).await;

        let err = pipeline.grade(&squares_request()).await.unwrap_err();

        assert!(matches!(err, GradeError::Comparator(_)));
    }

    #[tokio::test]
    async fn reference_runs_are_spaced_out() {
        let service = FakeService {
            stdout: Some("1\n4\n9\n16\n25\n".to_string()),
            ..Default::default()
        };
        let pipeline = pipeline_for(service.clone())
            .await
            .with_wait(true)
            .with_reference_spacing(Duration::from_millis(60));
        let requests = vec![squares_request(), squares_request(), squares_request()];

        let started = Instant::now();
        let verdicts = pipeline.grade_references(&requests).await;

        assert!(started.elapsed() >= Duration::from_millis(120));
        assert!(verdicts.iter().all(Result::is_ok));
        assert_eq!(service.submissions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn locally_rejected_references_cost_no_pause() {
        let service = FakeService {
            stdout: Some("1\n4\n9\n16\n25\n".to_string()),
            ..Default::default()
        };
        let pipeline = pipeline_for(service.clone())
            .await
            .with_wait(true)
            .with_reference_spacing(Duration::from_millis(400));
        let empty = GradeRequest {
            source: String::new(),
            ..squares_request()
        };
        let requests = vec![empty.clone(), empty.clone(), squares_request(), empty];

        let started = Instant::now();
        let verdicts = pipeline.grade_references(&requests).await;

        // Only the pause after the single real submission is taken.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(800));
        assert!(verdicts[2].is_ok());
        assert!(matches!(verdicts[3], Err(GradeError::EmptySource)));
        assert_eq!(service.submissions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crlf_output_is_split_per_line() {
        let result = ExecutionResult {
            token: None,
            status: ExecutionStatus {
                id: ExecutionStatus::ACCEPTED,
                description: "Accepted".to_string(),
            },
            stdout: Some("a\r\nb\r\n".to_string()),
            stderr: None,
            compile_output: None,
            message: None,
            time_secs: None,
            memory_kb: None,
        };
        assert_eq!(split_outputs(&result, 3).unwrap(), vec!["a", "b", ""]);
    }
}
