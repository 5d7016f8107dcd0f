//! Per-task log correlation ids.
//!
//! Rust has no implicit per-task context comparable to Python's
//! `asyncio.Task.current_task()`, so the id is carried explicitly:
//! generated once per webhook-originated task and threaded through every
//! call that might log.

use data_encoding::BASE32;
use rand::RngCore;

/// Opaque token attached to every log record and error envelope emitted
/// while a task runs. Base32 of 20 random bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 20];
        rand::rng().fill_bytes(&mut bytes);
        CorrelationId(BASE32.encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefixes a log line with `[correlation_id]`, matching the original
/// service's `ContextLogRecord` format.
#[macro_export]
macro_rules! log_with {
    ($level:ident, $corr:expr, $($arg:tt)+) => {
        log::$level!("[{}] {}", $corr, format!($($arg)+));
    };
}
