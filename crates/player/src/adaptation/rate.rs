use serde::{Deserialize, Serialize};

use super::{best_within, current_in, AdaptationLogic, Telemetry};
use crate::model::{AdaptationSet, Representation, RepresentationId};

/// Throughput driven selection with switch hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateBasedLogic {
    /// Share of the measured rate considered usable.
    pub safety_factor: f64,
    /// An up-switch needs `usable rate >= candidate * up_hysteresis`.
    pub up_hysteresis: f64,
    /// A down-switch happens once `usable rate < current * down_hysteresis`.
    pub down_hysteresis: f64,
}

impl Default for RateBasedLogic {
    fn default() -> Self {
        Self {
            safety_factor: 0.9,
            up_hysteresis: 1.2,
            down_hysteresis: 1.0,
        }
    }
}

impl RateBasedLogic {
    pub(super) fn decide<'a>(
        &self,
        set: &'a AdaptationSet,
        current: Option<&RepresentationId>,
        rate: Option<u64>,
    ) -> Option<&'a Representation> {
        let Some(rate) = rate else {
            // cold start
            return current_in(set, current).or_else(|| set.lowest());
        };

        let usable = rate as f64 * self.safety_factor;
        let candidate = best_within(set, usable)?;
        let Some(current) = current_in(set, current) else {
            return Some(candidate);
        };

        if candidate.bandwidth > current.bandwidth {
            let headroom = usable >= candidate.bandwidth as f64 * self.up_hysteresis;
            return Some(if headroom { candidate } else { current });
        }
        if candidate.bandwidth < current.bandwidth {
            let unsustainable = usable < current.bandwidth as f64 * self.down_hysteresis;
            return Some(if unsustainable { candidate } else { current });
        }
        Some(current)
    }
}

impl AdaptationLogic for RateBasedLogic {
    fn select<'a>(
        &self,
        set: &'a AdaptationSet,
        current: Option<&RepresentationId>,
        telemetry: &Telemetry,
    ) -> Option<&'a Representation> {
        let selected = self.decide(set, current, telemetry.download_rate)?;
        tracing::trace!(
            rate = ?telemetry.download_rate,
            selected = %selected.id,
            bandwidth = selected.bandwidth,
            "rate-based selection"
        );
        Some(selected)
    }

    fn name(&self) -> &'static str {
        "rate-based"
    }
}
