use std::{
    collections::HashSet,
    time::Duration,
};

use async_trait::async_trait;
use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use http::header::{
    HeaderName,
    HeaderValue,
};
use reqwest::RequestBuilder;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

use crate::{
    config::ExecutorConfig,
    error::{
        GradeError,
        GradeResult,
    },
    executor::{
        CircuitBreaker,
        ExecutionBackend,
        ExecutionHandle,
        ExecutionResult,
        ExecutionStatus,
        SubmitOutcome,
    },
};

const HOST_HEADER: &str = "X-RapidAPI-Host";
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for a Judge0-compatible execution service.
///
/// Source goes out base64-encoded and every text field of a result is decoded
/// exactly once here, so callers only ever see plain text.
pub struct Judge0Client {
    client: reqwest::Client,
    base_url: String,
    auth: Option<(HeaderName, HeaderValue)>,
    host: Option<HeaderValue>,
    timeout: Duration,
    language_ids: HashSet<u32>,
    breaker: CircuitBreaker,
}

#[derive(Debug, Serialize)]
struct SubmissionBody {
    source_code: String,
    language_id: u32,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    token: Option<String>,
    status: Option<ExecutionStatus>,
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
    time: Option<Value>,
    memory: Option<Value>,
}

impl Judge0Client {
    pub fn new(
        cfg: &ExecutorConfig,
        language_ids: impl IntoIterator<Item = u32>,
        breaker: CircuitBreaker,
    ) -> GradeResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .tcp_nodelay(true)
            .build()?;

        let auth = match (&cfg.auth_header, &cfg.auth_token) {
            (Some(header), Some(token)) => Some((
                HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                    GradeError::InvalidRequest(format!("invalid executor auth header: {e}"))
                })?,
                header_value(token)?,
            )),
            _ => None,
        };
        let host = cfg.host_header.as_deref().map(header_value).transpose()?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            auth,
            host,
            timeout: Duration::from_millis(cfg.timeout_ms),
            language_ids: language_ids.into_iter().collect(),
            breaker,
        })
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some((header, token)) = &self.auth {
            request = request.header(header.clone(), token.clone());
        }
        if let Some(host) = &self.host {
            request = request.header(HOST_HEADER, host.clone());
        }
        request.timeout(self.timeout)
    }

    async fn send(&self, request: RequestBuilder) -> GradeResult<Value> {
        if !self.breaker.allow_request().await {
            return Err(GradeError::ExecutionService {
                status: None,
                message: "execution service circuit is open".to_string(),
            });
        }

        let response = match self.authorize(request).send().await {
            Ok(response) => response,
            Err(err) => {
                self.breaker.record_failure().await;
                return Err(err.into());
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                self.breaker.record_failure().await;
                return Err(err.into());
            }
        };

        if status.is_server_error() {
            self.breaker.record_failure().await;
        } else {
            self.breaker.record_success().await;
        }

        if !status.is_success() {
            return Err(GradeError::ExecutionService {
                status: Some(status.as_u16()),
                message: truncate(&body),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| GradeError::UnexpectedResponseShape(format!("invalid json: {e}")))
    }
}

#[async_trait]
impl ExecutionBackend for Judge0Client {
    fn name(&self) -> &'static str {
        "judge0"
    }

    async fn submit(
        &self,
        source: &str,
        language_id: u32,
        wait: bool,
    ) -> GradeResult<SubmitOutcome> {
        if source.trim().is_empty() {
            return Err(GradeError::EmptySource);
        }
        if !self.language_ids.contains(&language_id) {
            return Err(GradeError::UnsupportedLanguage(language_id.to_string()));
        }

        let body = SubmissionBody {
            source_code: STANDARD.encode(source),
            language_id,
        };
        let request = self
            .client
            .post(format!("{}/submissions", self.base_url))
            .query(&[("base64_encoded", "true"), ("wait", bool_param(wait))])
            .json(&body);

        let outcome = classify(self.send(request).await?)?;
        match &outcome {
            SubmitOutcome::Pending { token } => {
                tracing::debug!(token = %token, language_id, "submission queued");
            }
            SubmitOutcome::Completed(result) => {
                tracing::debug!(
                    token = ?result.token,
                    language_id,
                    status = result.status.id,
                    "submission completed synchronously"
                );
            }
        }
        Ok(outcome)
    }

    async fn fetch(&self, handle: &ExecutionHandle) -> GradeResult<ExecutionResult> {
        let request = self
            .client
            .get(format!("{}/submissions/{}", self.base_url, handle.0))
            .query(&[("base64_encoded", "true"), ("fields", "*")]);

        match classify(self.send(request).await?)? {
            SubmitOutcome::Completed(mut result) => {
                if result.token.is_none() {
                    result.token = Some(handle.clone());
                }
                Ok(result)
            }
            SubmitOutcome::Pending { .. } => Err(GradeError::UnexpectedResponseShape(
                "fetch response carries no result fields".to_string(),
            )),
        }
    }

    async fn is_available(&self) -> bool {
        !self.breaker.is_open().await
    }
}

fn header_value(value: &str) -> GradeResult<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|e| GradeError::InvalidRequest(format!("invalid executor header value: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Decides once, at the boundary, which of the two response shapes the
/// service sent. A `stdout` key (even `null`) marks a result.
pub fn classify(payload: Value) -> GradeResult<SubmitOutcome> {
    let Some(object) = payload.as_object() else {
        return Err(GradeError::UnexpectedResponseShape(
            "expected a json object".to_string(),
        ));
    };

    if object.contains_key("stdout") {
        let raw: RawResult = serde_json::from_value(payload)
            .map_err(|e| GradeError::UnexpectedResponseShape(e.to_string()))?;
        return decode_result(raw).map(SubmitOutcome::Completed);
    }

    match object.get("token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(SubmitOutcome::Pending {
            token: ExecutionHandle(token.to_string()),
        }),
        _ => Err(GradeError::UnexpectedResponseShape(truncate(
            &payload.to_string(),
        ))),
    }
}

fn decode_result(raw: RawResult) -> GradeResult<ExecutionResult> {
    let status = raw.status.ok_or_else(|| {
        GradeError::UnexpectedResponseShape("result is missing status".to_string())
    })?;

    Ok(ExecutionResult {
        token: raw.token.map(ExecutionHandle),
        status,
        stdout: decode_field("stdout", raw.stdout)?,
        stderr: decode_field("stderr", raw.stderr)?,
        compile_output: decode_field("compile_output", raw.compile_output)?,
        message: decode_field("message", raw.message)?,
        time_secs: raw.time.as_ref().and_then(number_f64),
        memory_kb: raw.memory.as_ref().and_then(number_u64),
    })
}

/// `null` stays `None`; the service wraps base64 at 60 columns, so line
/// breaks are dropped before decoding.
pub fn decode_field(name: &str, value: Option<String>) -> GradeResult<Option<String>> {
    let Some(encoded) = value else {
        return Ok(None);
    };
    let compact = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();
    let bytes = STANDARD.decode(compact).map_err(|e| {
        GradeError::UnexpectedResponseShape(format!("{name} is not valid base64: {e}"))
    })?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

fn number_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
