use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Startup configuration for the process-wide time source.
///
/// Intended to be embedded in an application's configuration file and handed
/// to [`init`](crate::init).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Setting `realtime: true` keeps the system clock. Only when it is
    /// `false` is a mock installed.
    #[serde(default = "default_true")]
    pub realtime: bool,
    /// The instant the mock starts frozen at. Defaults to the current time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            realtime: true,
            start_at: None,
        }
    }
}

fn default_true() -> bool {
    true
}
