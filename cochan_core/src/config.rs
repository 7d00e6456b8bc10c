use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoroutineError, Result};

/// Used when nothing else has been configured.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

static DEFAULT_TIMEOUT: OnceLock<Duration> = OnceLock::new();

/// Set the process-wide default timeout.
///
/// Can be set once. Handles capture the default when they are created, so
/// call this before creating any coroutine that relies on it.
pub fn set_default_timeout(timeout: Duration) -> Result<()> {
    DEFAULT_TIMEOUT
        .set(timeout)
        .map_err(|_| CoroutineError::DefaultTimeoutAlreadySet)
}

pub fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT.get().copied().unwrap_or(FALLBACK_TIMEOUT)
}

/// Per-handle settings, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Bound used by the `*_with_default_timeout` resume/yield variants.
    #[serde(with = "millis")]
    pub default_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_timeout: default_timeout(),
        }
    }
}

impl Config {
    pub fn with_timeout(timeout: Duration) -> Self {
        Config {
            default_timeout: timeout,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
