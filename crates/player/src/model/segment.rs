use std::time::Duration;

use url::Url;

use crate::error::{PlayerError, PlayerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Value of the HTTP `Range` header. Empty ranges and ranges past
    /// `u64::MAX` have no header.
    pub fn to_http_range(&self) -> PlayerResult<String> {
        let Some(length) = self.length else {
            return Ok(format!("bytes={}-", self.offset));
        };
        let last = length
            .checked_sub(1)
            .and_then(|tail| self.offset.checked_add(tail))
            .ok_or_else(|| {
                PlayerError::ManifestParse(format!(
                    "byte range of {length} bytes at {} can not be requested",
                    self.offset
                ))
            })?;
        Ok(format!("bytes={}-{last}", self.offset))
    }
}

/// One addressable chunk of a representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Stable across refreshes of the same live source.
    pub sequence: u64,
    pub start: Duration,
    pub duration: Duration,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
}

impl Segment {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    fn is_same_content(&self, other: &Segment) -> bool {
        self.url == other.url && self.byte_range == other.byte_range
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub appended: usize,
    pub pruned: usize,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.appended == 0 && self.pruned == 0
    }
}

impl std::ops::AddAssign for MergeOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.appended += rhs.appended;
        self.pruned += rhs.pruned;
    }
}

/// Segments of a representation, ordered by sequence number.
///
/// An open-ended list belongs to a live source and may still grow on the next
/// manifest refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentList {
    segments: Vec<Segment>,
    open_ended: bool,
}

impl SegmentList {
    pub fn new(mut segments: Vec<Segment>, open_ended: bool) -> Self {
        segments.sort_by_key(|s| s.sequence);
        segments.dedup_by_key(|s| s.sequence);
        Self {
            segments,
            open_ended,
        }
    }

    pub fn is_open_ended(&self) -> bool {
        self.open_ended
    }

    /// No segment will be added to this list anymore.
    pub fn close(&mut self) {
        self.open_ended = false;
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn first(&self) -> Option<&Segment> {
        self.segments.first()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn get(&self, sequence: u64) -> Option<&Segment> {
        self.segments
            .binary_search_by_key(&sequence, |s| s.sequence)
            .ok()
            .map(|index| &self.segments[index])
    }

    /// Sequence number of the segment covering `time`.
    ///
    /// Times before the first segment map to the first one. Times past the end
    /// of a closed list have no segment.
    pub fn sequence_at(&self, time: Duration) -> Option<u64> {
        let index = self.segments.partition_point(|s| s.start <= time);
        if index == 0 {
            return self.first().map(|s| s.sequence);
        }

        let segment = &self.segments[index - 1];
        if time >= segment.end() && index == self.segments.len() && !self.open_ended {
            return None;
        }
        Some(segment.sequence)
    }

    pub fn duration(&self) -> Duration {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last.end().saturating_sub(first.start),
            _ => Duration::ZERO,
        }
    }

    /// Merges a refreshed copy of this list.
    ///
    /// Segments known on both sides must describe the same content. Segments
    /// older than the refreshed window are pruned and newer ones appended;
    /// nothing is renumbered. Refreshed documents whose timeline restarts at
    /// zero (HLS media playlists) are rebased onto the known timeline.
    pub fn merge(&mut self, refreshed: SegmentList) -> PlayerResult<MergeOutcome> {
        let SegmentList {
            segments: incoming,
            open_ended,
        } = refreshed;
        self.open_ended = open_ended;

        let mut outcome = MergeOutcome::default();
        let Some(incoming_first) = incoming.first() else {
            return Ok(outcome);
        };

        let Some(last) = self.segments.last().cloned() else {
            outcome.appended = incoming.len();
            self.segments = incoming;
            return Ok(outcome);
        };

        for segment in &incoming {
            if let Some(known) = self.get(segment.sequence) {
                if !known.is_same_content(segment) {
                    return Err(PlayerError::ManifestParse(format!(
                        "sequence {} was reused with different content",
                        segment.sequence
                    )));
                }
            }
        }

        // Pick an anchor to translate incoming times onto the known timeline.
        let anchor = incoming
            .iter()
            .rev()
            .find_map(|s| self.get(s.sequence).map(|known| (s.start, known.start)));
        let (incoming_origin, known_origin) = match anchor {
            Some(pair) => pair,
            None => {
                if incoming_first.start >= last.end() {
                    (incoming_first.start, incoming_first.start)
                } else {
                    let gap = incoming_first
                        .sequence
                        .saturating_sub(last.sequence.saturating_add(1));
                    let skipped = u32::try_from(gap)
                        .ok()
                        .and_then(|gap| last.duration.checked_mul(gap))
                        .and_then(|skipped| last.end().checked_add(skipped))
                        .ok_or_else(|| {
                            PlayerError::ManifestParse(format!(
                                "{gap} segments missing before sequence {}",
                                incoming_first.sequence
                            ))
                        })?;
                    (incoming_first.start, skipped)
                }
            }
        };

        let prune_before = incoming_first.sequence;
        let before = self.segments.len();
        self.segments.retain(|s| s.sequence >= prune_before);
        outcome.pruned = before - self.segments.len();

        let known_last = self.segments.last().map(|s| s.sequence);
        for mut segment in incoming {
            if known_last.is_some_and(|last| segment.sequence <= last) {
                continue;
            }
            segment.start = known_origin + segment.start.saturating_sub(incoming_origin);
            self.segments.push(segment);
            outcome.appended += 1;
        }

        Ok(outcome)
    }
}
