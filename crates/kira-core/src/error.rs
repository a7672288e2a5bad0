use thiserror::Error;

/// Failures the engine can isolate per task or per storage key.
///
/// Application layers wrap these in `anyhow`; engine seams return them
/// directly so callers can decide whether to skip, retry or fall back.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid civil date {input:?}: expected YYYY-MM-DD")]
    InvalidDateFormat { input: String },

    #[error("notify call for task {task_id} failed: {reason}")]
    NetworkFailure { task_id: i64, reason: String },

    #[error("notify call for task {task_id} returned an unusable response: {reason}")]
    MalformedResponse { task_id: i64, reason: String },

    #[error("storage key {key} unavailable: {reason}")]
    StorageUnavailable { key: String, reason: String },

    #[error("invalid setting: {reason}")]
    InvalidSetting { reason: String },
}

impl EngineError {
    pub fn storage(key: &str, err: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    /// Retriable dispatch failures; the dedup store is never touched for these.
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure { .. } | Self::MalformedResponse { .. }
        )
    }
}
