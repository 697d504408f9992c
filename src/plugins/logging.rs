//! Operation logging through `tracing`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{Cache, CacheEntry};
use crate::error::CacheError;
use crate::plugins::Plugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(CacheError::Configuration(format!(
                "Unknown log level: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Logs cache operations. Reads are logged at `Debug`, writes and deletes at
/// `Info`; anything below `min_level` is dropped.
#[derive(Debug, Clone)]
pub struct LoggingPlugin {
    min_level: LogLevel,
    redact_values: bool,
}

impl LoggingPlugin {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level,
            redact_values: false,
        }
    }

    /// Replace values with a placeholder in log lines.
    pub fn redacted(mut self) -> Self {
        self.redact_values = true;
        self
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// The fields that would be logged for an operation, or None when the
    /// operation's level is below the threshold.
    pub fn record(
        &self,
        level: LogLevel,
        operation: &'static str,
        key: &str,
        value: Option<&Value>,
    ) -> Option<LogRecord> {
        if level < self.min_level {
            return None;
        }
        let value = value.map(|value| {
            if self.redact_values {
                "<redacted>".to_string()
            } else {
                value.to_string()
            }
        });
        Some(LogRecord {
            operation,
            key: key.to_string(),
            value,
        })
    }

    fn log(&self, level: LogLevel, operation: &'static str, key: &str, value: Option<&Value>) {
        let Some(record) = self.record(level, operation, key, value) else {
            return;
        };
        let LogRecord { operation, key, value } = record;
        let value = value.as_deref();
        match level {
            LogLevel::Trace => trace!(operation, key = %key, value, "cache operation"),
            LogLevel::Debug => debug!(operation, key = %key, value, "cache operation"),
            LogLevel::Info => info!(operation, key = %key, value, "cache operation"),
            LogLevel::Warn => warn!(operation, key = %key, value, "cache operation"),
            LogLevel::Error => error!(operation, key = %key, value, "cache operation"),
        }
    }
}

/// Structured fields of one logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub operation: &'static str,
    pub key: String,
    /// Rendered value, `<redacted>` when redaction is on
    pub value: Option<String>,
}

impl Default for LoggingPlugin {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_init(&self, cache: &Cache) {
        self.log(LogLevel::Info, "init", cache.strategy_name(), None);
    }

    fn on_destroy(&self, cache: &Cache) {
        self.log(LogLevel::Info, "destroy", cache.strategy_name(), None);
    }

    fn before_get(&self, key: &str) {
        self.log(LogLevel::Debug, "get", key, None);
    }

    fn after_set(&self, key: &str, entry: &CacheEntry) {
        self.log(LogLevel::Info, "set", key, Some(&entry.value));
    }

    fn before_delete(&self, key: &str) -> bool {
        self.log(LogLevel::Debug, "delete", key, None);
        true
    }

    fn after_delete(&self, key: &str, value: &Value) {
        self.log(LogLevel::Info, "deleted", key, Some(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_threshold_filters_records() {
        let plugin = LoggingPlugin::new(LogLevel::Info);
        assert!(plugin.record(LogLevel::Debug, "get", "k", None).is_none());
        assert_eq!(
            plugin.record(LogLevel::Info, "set", "k", Some(&json!(1))),
            Some(LogRecord {
                operation: "set",
                key: "k".to_string(),
                value: Some("1".to_string()),
            })
        );
    }

    #[test]
    fn test_redaction() {
        let plugin = LoggingPlugin::new(LogLevel::Trace).redacted();
        let record = plugin
            .record(LogLevel::Info, "set", "token", Some(&json!("abc123")))
            .unwrap();
        assert_eq!(record.key, "token");
        assert_eq!(record.value.as_deref(), Some("<redacted>"));
    }

    #[test]
    fn test_never_vetoes_deletes() {
        assert!(LoggingPlugin::default().before_delete("k"));
    }
}
