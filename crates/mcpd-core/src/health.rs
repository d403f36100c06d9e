use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthOutcome {
    Ok,
    Timeout,
    Transport,
    Protocol,
}

impl HealthOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// Rolling record of the most recent probe of one client.
///
/// Written only by the health scheduler; readable by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub outcome: HealthOutcome,
    /// Consecutive failures up to and including this probe.
    pub consecutive_failures: u32,
}

impl HealthRecord {
    pub fn new(latency: Duration, outcome: HealthOutcome, consecutive_failures: u32) -> Self {
        Self {
            at: Utc::now(),
            latency,
            outcome,
            consecutive_failures,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
