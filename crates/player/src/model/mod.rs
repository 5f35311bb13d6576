//! Manifest snapshot shared by the streams of one playback session.
//!
//! Entities reference each other through stable string ids instead of
//! pointers, so a stream created against one snapshot can resolve its
//! adaptation set and representation again in the next one.

mod merge;
mod segment;

pub use merge::MergeReport;
pub use segment::{ByteRange, MergeOutcome, Segment, SegmentList};

use std::{fmt, time::Duration};

use crate::error::{PlayerError, PlayerResult};

macro_rules! define_id {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(String);

            impl $name {
                pub fn new(id: impl Into<String>) -> Self {
                    Self(id.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(id: &str) -> Self {
                    Self::new(id)
                }
            }
        )+
    };
}

define_id!(PeriodId, AdaptationSetId, RepresentationId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        if mime_type.starts_with("video") {
            Some(Self::Video)
        } else if mime_type.starts_with("audio") {
            Some(Self::Audio)
        } else if mime_type.starts_with("text") || mime_type.starts_with("application/ttml") {
            Some(Self::Subtitle)
        } else {
            None
        }
    }

    /// Playback can not continue without a mandatory track.
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, Self::Subtitle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub id: RepresentationId,
    /// Declared bitrate in bits per second.
    pub bandwidth: u64,
    pub segments: SegmentList,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationSet {
    pub id: AdaptationSetId,
    pub kind: TrackKind,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn representation(&self, id: &RepresentationId) -> Option<&Representation> {
        self.representations.iter().find(|r| &r.id == id)
    }

    pub fn lowest(&self) -> Option<&Representation> {
        self.representations.iter().min_by_key(|r| r.bandwidth)
    }

    pub fn highest(&self) -> Option<&Representation> {
        self.representations.iter().max_by_key(|r| r.bandwidth)
    }

    /// Representations ordered from the lowest to the highest bandwidth.
    pub fn ladder(&self) -> Vec<&Representation> {
        let mut ladder: Vec<_> = self.representations.iter().collect();
        ladder.sort_by_key(|r| r.bandwidth);
        ladder
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub id: PeriodId,
    pub start: Duration,
    pub duration: Option<Duration>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Period {
    pub fn adaptation_set(&self, id: &AdaptationSetId) -> Option<&AdaptationSet> {
        self.adaptation_sets.iter().find(|a| &a.id == id)
    }

    pub fn end(&self) -> Option<Duration> {
        self.duration.map(|d| self.start + d)
    }

    /// Marks every segment list of the period as complete.
    pub fn close_segment_lists(&mut self) {
        for set in &mut self.adaptation_sets {
            for representation in &mut set.representations {
                representation.segments.close();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub periods: Vec<Period>,
    pub is_live: bool,
    /// Refresh period declared by the document, live only.
    pub min_update_period: Option<Duration>,
    /// Total presentation duration when known.
    pub duration: Option<Duration>,
}

impl Manifest {
    pub fn period(&self, id: &PeriodId) -> Option<&Period> {
        self.periods.iter().find(|p| &p.id == id)
    }

    pub fn period_index(&self, id: &PeriodId) -> Option<usize> {
        self.periods.iter().position(|p| &p.id == id)
    }

    /// Checks the structure the playback core relies on.
    pub fn validate(&self) -> PlayerResult<()> {
        if self.periods.is_empty() {
            return Err(PlayerError::NoPeriodFound);
        }

        for period in &self.periods {
            for set in &period.adaptation_sets {
                if set.representations.is_empty() {
                    return Err(PlayerError::RepresentationUnavailable(format!(
                        "adaptation set {} of period {} has no representation",
                        set.id, period.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Presentation duration, falling back to the end of the last period.
    pub fn total_duration(&self) -> Option<Duration> {
        if self.is_live {
            return None;
        }
        self.duration.or_else(|| {
            self.periods.last().and_then(|period| {
                period.end().or_else(|| {
                    period
                        .adaptation_sets
                        .iter()
                        .filter_map(|set| set.representations.first())
                        .filter_map(|r| r.segments.last())
                        .map(|s| s.end())
                        .max()
                })
            })
        })
    }
}
