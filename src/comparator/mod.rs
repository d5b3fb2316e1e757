pub mod normalized;
pub mod remote;

use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
    Serializer,
    ser::SerializeMap,
};

use crate::error::GradeResult;

pub use normalized::NormalizedComparator;
pub use remote::RemoteComparator;

pub fn case_label(index: usize) -> String {
    format!("testCase{}", index + 1)
}

/// Outputs keyed by test-case label, kept in test-case order. Serialises as a
/// JSON object whose keys appear in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabeledOutputs(Vec<(String, String)>);

impl LabeledOutputs {
    /// Labels `values` positionally as `testCase1`, `testCase2`, ...
    pub fn positional<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            values
                .into_iter()
                .enumerate()
                .map(|(idx, value)| (case_label(idx), value.into()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(label, _)| label.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, value)| value.as_str())
    }
}

impl Serialize for LabeledOutputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, value) in &self.0 {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRequest {
    pub actual_outputs_by_label: LabeledOutputs,
    pub expected_outputs_by_label: LabeledOutputs,
    pub problem_title: String,
    pub problem_description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonOutcome {
    pub graded: bool,
    #[serde(default)]
    pub hint: Option<String>,
    pub is_correct: Vec<bool>,
}

/// Decides which actual outputs count as correct.
///
/// Implementations return one flag per expected label, in label order.
#[async_trait]
pub trait Comparator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compare(&self, request: &ComparisonRequest) -> GradeResult<ComparisonOutcome>;
}
