use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{adaptation::AdaptationKind, error::PlayerResult};

/// Tuning knobs of the playback core.
///
/// All durations are expressed in seconds so the options can be loaded from
/// a plain JSON document:
///
/// ```json
/// { "target_buffer": 12.0, "max_segment_retries": 2, "adaptation": { "type": "hybrid" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// Buffered media a stream tries to keep ahead of the playback position.
    pub target_buffer: f64,
    /// Consecutive failures on one segment before the stream gives up.
    pub max_segment_retries: u32,
    /// Lower bound between two manifest refreshes.
    pub min_refresh_interval: f64,
    /// Upper bound of the refresh backoff after failed refreshes.
    pub max_refresh_backoff: f64,
    /// Consecutive failed refreshes after which the known segments are
    /// treated as the end of a live presentation.
    pub max_refresh_failures: u32,
    /// Smoothing factor of the download rate estimator, in `(0, 1]`.
    pub estimator_alpha: f64,
    pub adaptation: AdaptationKind,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            target_buffer: 30.0,
            max_segment_retries: 3,
            min_refresh_interval: 1.0,
            max_refresh_backoff: 30.0,
            max_refresh_failures: 5,
            estimator_alpha: 0.3,
            adaptation: AdaptationKind::default(),
        }
    }
}

impl PlayerOptions {
    pub fn from_json(data: &str) -> PlayerResult<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn target_buffer(mut self, secs: f64) -> Self {
        self.target_buffer = secs;
        self
    }

    pub fn max_segment_retries(mut self, retries: u32) -> Self {
        self.max_segment_retries = retries;
        self
    }

    pub fn min_refresh_interval(mut self, secs: f64) -> Self {
        self.min_refresh_interval = secs;
        self
    }

    pub fn max_refresh_backoff(mut self, secs: f64) -> Self {
        self.max_refresh_backoff = secs;
        self
    }

    pub fn max_refresh_failures(mut self, failures: u32) -> Self {
        self.max_refresh_failures = failures;
        self
    }

    pub fn estimator_alpha(mut self, alpha: f64) -> Self {
        self.estimator_alpha = alpha;
        self
    }

    pub fn adaptation(mut self, adaptation: AdaptationKind) -> Self {
        self.adaptation = adaptation;
        self
    }

    pub(crate) fn target_buffer_duration(&self) -> Duration {
        secs(self.target_buffer)
    }

    pub(crate) fn min_refresh_duration(&self) -> Duration {
        secs(self.min_refresh_interval)
    }

    pub(crate) fn max_backoff_duration(&self) -> Duration {
        secs(self.max_refresh_backoff)
    }

    pub(crate) fn smoothing_factor(&self) -> f64 {
        self.estimator_alpha.clamp(f64::EPSILON, 1.0)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
