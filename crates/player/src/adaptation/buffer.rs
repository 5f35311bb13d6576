use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{current_in, AdaptationLogic, Telemetry};
use crate::model::{AdaptationSet, Representation, RepresentationId};

/// Buffer occupancy driven selection.
///
/// Below `reservoir` seconds of buffer the lowest representation is used,
/// above `reservoir + cushion` the highest. In between the buffer level is
/// mapped linearly onto the bitrate ladder, and the current representation is
/// kept until the mapped rate reaches a neighbour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferBasedLogic {
    pub reservoir: f64,
    pub cushion: f64,
}

impl Default for BufferBasedLogic {
    fn default() -> Self {
        Self {
            reservoir: 5.0,
            cushion: 15.0,
        }
    }
}

impl BufferBasedLogic {
    fn mapped_rate(&self, set: &AdaptationSet, buffered: Duration) -> Option<f64> {
        let min = set.lowest()?.bandwidth as f64;
        let max = set.highest()?.bandwidth as f64;
        let buffered = buffered.as_secs_f64();

        if buffered <= self.reservoir {
            return Some(min);
        }
        if self.cushion <= 0.0 || buffered >= self.reservoir + self.cushion {
            return Some(max);
        }
        let ratio = (buffered - self.reservoir) / self.cushion;
        Some(min + (max - min) * ratio)
    }

    pub(super) fn decide<'a>(
        &self,
        set: &'a AdaptationSet,
        current: Option<&RepresentationId>,
        buffered: Duration,
    ) -> Option<&'a Representation> {
        let rate = self.mapped_rate(set, buffered)?;
        let ladder = set.ladder();
        let up_target = ladder
            .iter()
            .rev()
            .find(|r| r.bandwidth as f64 <= rate)
            .copied()
            .or_else(|| ladder.first().copied())?;

        let Some(current) = current_in(set, current) else {
            return Some(up_target);
        };
        let position = ladder.iter().position(|r| r.id == current.id)?;

        let higher = ladder.get(position + 1);
        if higher.is_some_and(|r| rate >= r.bandwidth as f64) {
            return Some(up_target);
        }

        let lower = position.checked_sub(1).map(|i| ladder[i]);
        if lower.is_some_and(|r| rate <= r.bandwidth as f64) {
            let down_target = ladder
                .iter()
                .find(|r| r.bandwidth as f64 >= rate)
                .copied()
                .unwrap_or(current);
            return Some(down_target);
        }

        Some(current)
    }
}

impl AdaptationLogic for BufferBasedLogic {
    fn select<'a>(
        &self,
        set: &'a AdaptationSet,
        current: Option<&RepresentationId>,
        telemetry: &Telemetry,
    ) -> Option<&'a Representation> {
        self.decide(set, current, telemetry.buffered)
    }

    fn name(&self) -> &'static str {
        "buffer-based"
    }
}
