use std::sync::Arc;

use axum::{
    Json,
    Router,
    extract::{
        Path,
        State,
    },
    http::StatusCode,
    routing::{
        get,
        post,
    },
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::{
        ApiError,
        GradeError,
        LedgerError,
    },
    executor::{
        ExecutionHandle,
        ExecutionResult,
        SubmitOutcome,
    },
    grading::{
        GradeRequest,
        GradingPipeline,
        Verdict,
    },
    language::LanguageKey,
    ledger::{
        AttemptLedger,
        AttemptRecord,
        MAX_ATTEMPTS,
    },
    metrics::MetricsRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<GradingPipeline>,
    ledger: Arc<dyn AttemptLedger>,
    metrics: Arc<MetricsRegistry>,
}

pub fn routes(
    pipeline: Arc<GradingPipeline>,
    ledger: Arc<dyn AttemptLedger>,
    metrics: Arc<MetricsRegistry>,
) -> Router {
    let state = AppState {
        pipeline,
        ledger,
        metrics,
    };
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_text))
        .route("/v1/languages", get(languages))
        .route("/v1/grade", post(grade))
        .route("/v1/references/grade", post(grade_references))
        .route("/v1/executions", post(submit_execution))
        .route("/v1/executions/poll", post(poll_execution))
        .route("/v1/executions/{token}", get(get_execution))
        .route("/v1/attempts/{user_id}/{problem_id}", get(list_attempts))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeBody {
    #[serde(flatten)]
    request: GradeRequest,
    user_id: Option<String>,
    problem_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GradeResponse {
    #[serde(flatten)]
    verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts_used: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ReferenceOutcome {
    Graded(Verdict),
    Failed {
        error: &'static str,
        message: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LanguageSummary {
    key: LanguageKey,
    name: &'static str,
    judge0_id: u32,
}

#[derive(Debug, Deserialize)]
struct ExecutionBody {
    source: String,
    language: String,
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Deserialize)]
struct PollBody {
    token: String,
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let backend = state.pipeline.backend();
    Json(serde_json::json!({
        "ok": true,
        "executor": backend.name(),
        "executorAvailable": backend.is_available().await,
    }))
}

async fn metrics_text(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render_prometheus())
}

async fn languages(State(state): State<AppState>) -> Json<Vec<LanguageSummary>> {
    Json(
        state
            .pipeline
            .registry()
            .iter()
            .map(|d| LanguageSummary {
                key: d.key,
                name: d.name,
                judge0_id: d.judge0_id,
            })
            .collect(),
    )
}

async fn grade(
    State(state): State<AppState>,
    Json(body): Json<GradeBody>,
) -> Result<Json<GradeResponse>, ApiError> {
    let owner = match (body.user_id, body.problem_id) {
        (Some(user_id), Some(problem_id)) => Some((user_id, problem_id)),
        (None, None) => None,
        _ => {
            return Err(GradeError::InvalidRequest(
                "userId and problemId must be given together".to_string(),
            )
            .into());
        }
    };

    if let Some((user_id, problem_id)) = &owner {
        let used = state.ledger.attempts(user_id, problem_id).await?.len();
        if used >= MAX_ATTEMPTS {
            state.metrics.attempt_rejected();
            return Err(LedgerError::AttemptsExceeded {
                limit: MAX_ATTEMPTS,
            }
            .into());
        }
    }

    let verdict = state.pipeline.grade(&body.request).await?;

    let mut attempts_used = None;
    if let Some((user_id, problem_id)) = owner.filter(|_| verdict.graded) {
        let language = body.request.language.parse::<LanguageKey>()?;
        let record = AttemptRecord::new(
            user_id,
            problem_id,
            language,
            body.request.source,
            verdict.is_correct.clone(),
        );
        match state.ledger.append_attempt(record).await {
            Ok(count) => {
                state.metrics.attempt_recorded();
                attempts_used = Some(count);
            }
            Err(err) => {
                if matches!(err, LedgerError::AttemptsExceeded { .. }) {
                    state.metrics.attempt_rejected();
                }
                return Err(err.into());
            }
        }
    }

    Ok(Json(GradeResponse {
        verdict,
        attempts_used,
    }))
}

/// Runs reference solutions in order; one failure does not stop the batch.
async fn grade_references(
    State(state): State<AppState>,
    Json(requests): Json<Vec<GradeRequest>>,
) -> Result<Json<Vec<ReferenceOutcome>>, ApiError> {
    let max = state.pipeline.max_reference_batch();
    if requests.len() > max {
        return Err(GradeError::InvalidRequest(format!(
            "at most {max} reference solutions per batch"
        ))
        .into());
    }

    let outcomes = state
        .pipeline
        .grade_references(&requests)
        .await
        .into_iter()
        .map(|outcome| match outcome {
            Ok(verdict) => ReferenceOutcome::Graded(verdict),
            Err(err) => ReferenceOutcome::Failed {
                error: err.code(),
                message: err.to_string(),
            },
        })
        .collect();
    Ok(Json(outcomes))
}

async fn submit_execution(
    State(state): State<AppState>,
    Json(body): Json<ExecutionBody>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    let descriptor = state.pipeline.registry().get(&body.language)?;
    let outcome = state
        .pipeline
        .backend()
        .submit(&body.source, descriptor.judge0_id, body.wait)
        .await?;
    state.metrics.execution_submitted();

    let status = match outcome {
        SubmitOutcome::Pending { .. } => StatusCode::ACCEPTED,
        SubmitOutcome::Completed(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let handle = ExecutionHandle(token);
    let result = state
        .pipeline
        .backend()
        .fetch(&handle)
        .await
        .map_err(not_found)?;
    Ok(Json(result))
}

async fn poll_execution(
    State(state): State<AppState>,
    Json(body): Json<PollBody>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let handle = ExecutionHandle(body.token);
    let result = state
        .pipeline
        .poller()
        .poll_until_terminal(state.pipeline.backend(), &handle)
        .await
        .map_err(not_found)?;
    Ok(Json(result))
}

async fn list_attempts(
    State(state): State<AppState>,
    Path((user_id, problem_id)): Path<(String, String)>,
) -> Result<Json<Vec<AttemptRecord>>, ApiError> {
    Ok(Json(state.ledger.attempts(&user_id, &problem_id).await?))
}

fn not_found(err: GradeError) -> ApiError {
    match err {
        GradeError::ExecutionService {
            status: Some(404), ..
        } => ApiError::NotFound,
        other => other.into(),
    }
}
