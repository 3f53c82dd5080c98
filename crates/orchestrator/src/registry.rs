//! In-memory correlation of active jobs.
//!
//! Each submitted job is registered under its engine-assigned prompt
//! ID together with the client identity used at submission and the
//! parameter values that were actually applied. Monitoring looks the
//! record up to reattach to the right event stream; terminal updates
//! (and dropped monitors) evict it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Correlation state for one in-flight job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Client identity used when the workflow was submitted. The
    /// progress socket must reuse it to see this job's events.
    pub client_id: String,
    /// Parameter values applied to the workflow, including generated
    /// seeds. Reported back to clients for reproducibility.
    pub applied_params: Map<String, Value>,
    pub submitted_at: DateTime<Utc>,
}

/// Thread-safe prompt-ID -> [`JobRecord`] map.
///
/// Uses a std mutex rather than an async one so eviction can run from
/// `Drop` impls. Every critical section is a few map operations, so
/// holding the lock across an await never comes up.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, prompt_id: String, record: JobRecord) {
        self.lock().insert(prompt_id, record);
    }

    pub fn get(&self, prompt_id: &str) -> Option<JobRecord> {
        self.lock().get(prompt_id).cloned()
    }

    /// Remove and return the record, if still present. Idempotent:
    /// both the terminal-update path and monitor teardown call this.
    pub fn remove(&self, prompt_id: &str) -> Option<JobRecord> {
        self.lock().remove(prompt_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobRecord>> {
        // A poisoned registry only means another thread panicked
        // mid-operation; the map itself is still usable.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> JobRecord {
        let mut params = Map::new();
        params.insert("seed".to_string(), json!(42));
        JobRecord {
            client_id: "cid-1".to_string(),
            applied_params: params,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let registry = JobRegistry::new();
        registry.insert("p1".to_string(), record());

        let fetched = registry.get("p1").unwrap();
        assert_eq!(fetched.client_id, "cid-1");
        assert_eq!(fetched.applied_params["seed"], json!(42));

        assert!(registry.remove("p1").is_some());
        assert!(registry.get("p1").is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = JobRegistry::new();
        registry.insert("p1".to_string(), record());
        assert!(registry.remove("p1").is_some());
        assert!(registry.remove("p1").is_none());
    }

    #[test]
    fn unknown_prompt_id_yields_none() {
        let registry = JobRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.is_empty());
    }
}
