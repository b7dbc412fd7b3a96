use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of running one handler under any strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub name: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub elapsed_ms: f64,
    /// Child exit status, parallel strategy only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    pub fn success(name: impl Into<String>, result: Value, elapsed_ms: f64) -> Self {
        Self {
            name: name.into(),
            result: Some(result),
            error: None,
            elapsed_ms,
            exit_code: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            name: name.into(),
            result: None,
            error: Some(error.into()),
            elapsed_ms,
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Sum of elapsed times.
pub fn total_ms(results: &[ExecutionResult]) -> f64 {
    results.iter().map(|r| r.elapsed_ms).sum()
}

/// Largest elapsed time, `0.0` for an empty slice.
pub fn max_ms(results: &[ExecutionResult]) -> f64 {
    results.iter().map(|r| r.elapsed_ms).fold(0.0, f64::max)
}
