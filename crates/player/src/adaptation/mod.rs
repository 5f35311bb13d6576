mod buffer;
mod estimator;
mod fixed;
mod hybrid;
mod rate;

pub use buffer::BufferBasedLogic;
pub use estimator::BandwidthEstimator;
pub use fixed::{FixedLogic, FixedQuality};
pub use hybrid::HybridLogic;
pub use rate::RateBasedLogic;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{AdaptationSet, Representation, RepresentationId};

/// Measurements available to a selection at a segment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Telemetry {
    /// Most recent download rate estimate in bits per second.
    pub download_rate: Option<u64>,
    /// Media buffered ahead of the playback position on this track.
    pub buffered: Duration,
    pub target_buffer: Duration,
}

/// Picks the representation used for the next segment of a track.
///
/// Called once per segment boundary. Given the same telemetry twice in a row,
/// with the first answer passed back as `current`, an implementation must
/// return the same representation again.
pub trait AdaptationLogic: Send {
    /// Returns `None` only for an adaptation set without representations.
    fn select<'a>(
        &self,
        set: &'a AdaptationSet,
        current: Option<&RepresentationId>,
        telemetry: &Telemetry,
    ) -> Option<&'a Representation>;

    fn name(&self) -> &'static str;
}

/// Built-in strategies, selected by configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdaptationKind {
    Fixed(FixedLogic),
    RateBased(RateBasedLogic),
    BufferBased(BufferBasedLogic),
    Hybrid(HybridLogic),
}

impl Default for AdaptationKind {
    fn default() -> Self {
        Self::RateBased(RateBasedLogic::default())
    }
}

impl AdaptationLogic for AdaptationKind {
    fn select<'a>(
        &self,
        set: &'a AdaptationSet,
        current: Option<&RepresentationId>,
        telemetry: &Telemetry,
    ) -> Option<&'a Representation> {
        match self {
            Self::Fixed(logic) => logic.select(set, current, telemetry),
            Self::RateBased(logic) => logic.select(set, current, telemetry),
            Self::BufferBased(logic) => logic.select(set, current, telemetry),
            Self::Hybrid(logic) => logic.select(set, current, telemetry),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Fixed(logic) => logic.name(),
            Self::RateBased(logic) => logic.name(),
            Self::BufferBased(logic) => logic.name(),
            Self::Hybrid(logic) => logic.name(),
        }
    }
}

/// The current representation if it still belongs to `set`.
fn current_in<'a>(
    set: &'a AdaptationSet,
    current: Option<&RepresentationId>,
) -> Option<&'a Representation> {
    current.and_then(|id| set.representation(id))
}

/// Highest representation whose bandwidth fits in `budget`, or the lowest one.
fn best_within(set: &AdaptationSet, budget: f64) -> Option<&Representation> {
    set.representations
        .iter()
        .filter(|r| r.bandwidth as f64 <= budget)
        .max_by_key(|r| r.bandwidth)
        .or_else(|| set.lowest())
}
