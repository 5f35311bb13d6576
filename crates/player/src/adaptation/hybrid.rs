use serde::{Deserialize, Serialize};

use super::{current_in, AdaptationLogic, RateBasedLogic, Telemetry};
use crate::model::{AdaptationSet, Representation, RepresentationId};

/// Rate based selection guarded by the buffer level.
///
/// Up-switches wait until `min_buffer_for_up_switch` seconds are buffered.
/// Under `panic_buffer` seconds the stream drops to the lowest representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridLogic {
    #[serde(flatten)]
    pub rate: RateBasedLogic,
    pub min_buffer_for_up_switch: f64,
    pub panic_buffer: f64,
}

impl Default for HybridLogic {
    fn default() -> Self {
        Self {
            rate: RateBasedLogic::default(),
            min_buffer_for_up_switch: 8.0,
            panic_buffer: 2.0,
        }
    }
}

impl AdaptationLogic for HybridLogic {
    fn select<'a>(
        &self,
        set: &'a AdaptationSet,
        current: Option<&RepresentationId>,
        telemetry: &Telemetry,
    ) -> Option<&'a Representation> {
        let buffered = telemetry.buffered.as_secs_f64();
        let current_rep = current_in(set, current);

        // Only panic once there is something to drain; an empty buffer at
        // start-up is handled by the up-switch gate below.
        if current_rep.is_some() && buffered < self.panic_buffer {
            return set.lowest();
        }

        let proposed = self.rate.decide(set, current, telemetry.download_rate)?;
        let Some(current_rep) = current_rep else {
            return if buffered >= self.min_buffer_for_up_switch {
                Some(proposed)
            } else {
                set.lowest()
            };
        };

        if proposed.bandwidth > current_rep.bandwidth && buffered < self.min_buffer_for_up_switch {
            return Some(current_rep);
        }
        Some(proposed)
    }

    fn name(&self) -> &'static str {
        "hybrid"
    }
}
