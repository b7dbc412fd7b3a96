//! Job registry: maps a job name to the handler that produces its result.

use std::any::Any;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::heavy;
use crate::record::JobPayload;

/// An executable unit of work. Runs at most once.
pub type Handler = Box<dyn FnOnce() -> Result<Value, JobError> + Send + 'static>;

/// Handler failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Convert a caught panic payload into a handler failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new(format!("panic: {message}"))
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Registry lookup error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown job `{name}` (available: {})", .available.join(", "))]
    UnknownJob { name: String, available: Vec<String> },
}

/// Lookup from job name to handler.
pub trait JobRegistry: Send + Sync {
    /// Every name this registry can resolve.
    fn names(&self) -> Vec<String>;

    /// Build the handler for `name`, bound to `payload`.
    fn resolve(&self, name: &str, payload: &JobPayload) -> Result<Handler, RegistryError>;

    fn contains(&self, name: &str) -> bool {
        self.names().iter().any(|n| n == name)
    }

    fn unknown(&self, name: &str) -> RegistryError {
        RegistryError::UnknownJob {
            name: name.to_string(),
            available: self.names(),
        }
    }
}

impl<R: JobRegistry + ?Sized> JobRegistry for Arc<R> {
    fn names(&self) -> Vec<String> {
        (**self).names()
    }

    fn resolve(&self, name: &str, payload: &JobPayload) -> Result<Handler, RegistryError> {
        (**self).resolve(name, payload)
    }
}

/// The built-in job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Primes,
    Matrix,
    Hash,
    Fibonacci,
    Sort,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Primes,
        JobKind::Matrix,
        JobKind::Hash,
        JobKind::Fibonacci,
        JobKind::Sort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Primes => "primes",
            JobKind::Matrix => "matrix",
            JobKind::Hash => "hash",
            JobKind::Fibonacci => "fibonacci",
            JobKind::Sort => "sort",
        }
    }

    /// Run this job with the given arguments on the current thread.
    pub fn run(&self, payload: &JobPayload) -> Result<Value, JobError> {
        match self {
            JobKind::Primes => {
                let limit = param(payload, "limit", 500_000, 0..=50_000_000)?;
                let count = heavy::sieve_primes(limit as usize);
                Ok(json!({ "count": count, "job": "sieve_primes" }))
            }
            JobKind::Matrix => {
                let size = param(payload, "size", 150, 1..=1_000)?;
                let c00 = heavy::matrix_multiply(size as usize, heavy::RNG_SEED);
                Ok(json!({ "size": size, "c00": c00 }))
            }
            JobKind::Hash => {
                let iterations = param(payload, "iterations", 50_000, 1..=10_000_000)?;
                let hash = heavy::hash_chain(iterations);
                Ok(json!({ "hash": &hash[..16], "job": "hash_chain" }))
            }
            JobKind::Fibonacci => {
                let n = param(payload, "n", 35, 0..=u64::from(heavy::MAX_FIBONACCI))?;
                let fib = heavy::fibonacci(n as u32)
                    .ok_or_else(|| JobError::new(format!("fibonacci({n}) overflows u64")))?;
                Ok(json!({ "n": n, "fib": fib, "job": "fibonacci" }))
            }
            JobKind::Sort => {
                let size = param(payload, "size", 100_000, 1..=10_000_000)?;
                let min = heavy::sort_stress(size as usize, heavy::RNG_SEED);
                Ok(json!({ "min": min, "job": "sort_stress" }))
            }
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| RegistryError::UnknownJob {
                name: s.to_string(),
                available: JobKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            })
    }
}

/// Read an optional non-negative integer argument from the payload.
fn param(payload: &JobPayload, key: &str, default: u64, range: RangeInclusive<u64>) -> Result<u64, JobError> {
    let value = match payload.get(key) {
        None | Some(Value::Null) => default,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| JobError::new(format!("`{key}` must be a non-negative integer, got {v}")))?,
    };
    if !range.contains(&value) {
        return Err(JobError::new(format!(
            "`{key}` = {value} is out of range {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

/// The built-in CPU-bound workloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeavyJobs;

impl JobRegistry for HeavyJobs {
    fn names(&self) -> Vec<String> {
        JobKind::ALL.iter().map(|k| k.as_str().to_string()).collect()
    }

    fn resolve(&self, name: &str, payload: &JobPayload) -> Result<Handler, RegistryError> {
        let kind: JobKind = name.parse()?;
        let payload = payload.clone();
        Ok(Box::new(move || kind.run(&payload)))
    }

    fn contains(&self, name: &str) -> bool {
        name.parse::<JobKind>().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> JobPayload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn names_cover_every_kind() {
        assert_eq!(HeavyJobs.names(), vec!["primes", "matrix", "hash", "fibonacci", "sort"]);
        assert!(HeavyJobs.contains("hash"));
        assert!(!HeavyJobs.contains("Hash"));
    }

    #[test]
    fn unknown_name_is_a_registry_error() {
        let err = HeavyJobs.resolve("nope", &JobPayload::new()).err().unwrap();
        let RegistryError::UnknownJob { name, available } = &err;
        assert_eq!(name, "nope");
        assert_eq!(available.len(), 5);
        assert!(err.to_string().contains("primes, matrix"));
    }

    #[test]
    fn payload_overrides_defaults() {
        let handler = HeavyJobs.resolve("primes", &payload(json!({"limit": 100}))).unwrap();
        assert_eq!(handler().unwrap(), json!({"count": 25, "job": "sieve_primes"}));

        let handler = HeavyJobs.resolve("fibonacci", &payload(json!({"n": 10}))).unwrap();
        assert_eq!(handler().unwrap(), json!({"n": 10, "fib": 55, "job": "fibonacci"}));
    }

    #[test]
    fn bad_arguments_fail_the_handler_not_the_lookup() {
        let handler = HeavyJobs.resolve("fibonacci", &payload(json!({"n": 200}))).unwrap();
        let err = handler().unwrap_err();
        assert!(err.message.contains("out of range"), "{err}");

        let handler = HeavyJobs.resolve("matrix", &payload(json!({"size": "big"}))).unwrap();
        assert!(handler().unwrap_err().message.contains("non-negative integer"));
    }

    #[test]
    fn hash_result_is_truncated() {
        let handler = HeavyJobs.resolve("hash", &payload(json!({"iterations": 10}))).unwrap();
        let value = handler().unwrap();
        assert_eq!(value["hash"].as_str().unwrap().len(), 16);
        assert_eq!(value["job"], "hash_chain");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = JobError::from_panic(Box::new("boom"));
        assert_eq!(err.message, "panic: boom");
        let err = JobError::from_panic(Box::new(String::from("bang")));
        assert_eq!(err.message, "panic: bang");
        let err = JobError::from_panic(Box::new(7u8));
        assert_eq!(err.message, "panic: handler panicked");
    }
}
