use serde::{Deserialize, Serialize};

use super::{AdaptationLogic, Telemetry};
use crate::model::{AdaptationSet, Representation, RepresentationId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedQuality {
    #[default]
    Lowest,
    Highest,
    /// A representation id, falling back to the lowest one when absent.
    Id(String),
}

/// Always plays the same quality regardless of network conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedLogic {
    pub quality: FixedQuality,
}

impl FixedLogic {
    pub fn new(quality: FixedQuality) -> Self {
        Self { quality }
    }
}

impl AdaptationLogic for FixedLogic {
    fn select<'a>(
        &self,
        set: &'a AdaptationSet,
        _current: Option<&RepresentationId>,
        _telemetry: &Telemetry,
    ) -> Option<&'a Representation> {
        match &self.quality {
            FixedQuality::Lowest => set.lowest(),
            FixedQuality::Highest => set.highest(),
            FixedQuality::Id(id) => set
                .representation(&RepresentationId::new(id.as_str()))
                .or_else(|| set.lowest()),
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
