//! Logging settings.

use pulse_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Log level and output format for binaries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Level or `EnvFilter` directive. `RUST_LOG` wins when set.
    pub level: String,
    /// Stderr output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
