//! Settings types.
//!
//! | Module | Section |
//! |--------|---------|
//! | `realtime` | Endpoint, reconnect policy, transport strategy |
//! | `logging` | Log level and output format |

mod logging;
mod realtime;

pub use logging::LoggingSettings;
pub use realtime::{RealtimeSettings, TransportKind};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.pulse/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Realtime connection settings.
    pub realtime: RealtimeSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl PulseSettings {
    /// Reject values the realtime client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rt = &self.realtime;
        if rt.endpoint.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "endpoint",
                reason: "must not be empty".into(),
            });
        }
        if !rt.reconnect_growth_factor.is_finite() || rt.reconnect_growth_factor < 1.0 {
            return Err(SettingsError::Invalid {
                field: "reconnectGrowthFactor",
                reason: format!("must be >= 1.0, got {}", rt.reconnect_growth_factor),
            });
        }
        if rt.outbound_buffer == 0 {
            return Err(SettingsError::Invalid {
                field: "outboundBuffer",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
