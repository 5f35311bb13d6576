use std::time::Duration;

use url::Url;

use crate::{
    adaptation::{AdaptationLogic, BandwidthEstimator, Telemetry},
    config::PlayerOptions,
    connection::{Chunk, ChunkRequest, ConnectionManager, RequestHandle, RequestPurpose},
    demux::{Block, DemuxSink},
    error::PlayerError,
    model::{AdaptationSet, AdaptationSetId, RepresentationId, SegmentList, TrackKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Idle,
    Buffering,
    Eof,
    Error,
}

/// Collaborators borrowed by a stream for the duration of one call.
pub(crate) struct StreamContext<'a> {
    pub connections: &'a mut dyn ConnectionManager,
    pub sink: &'a mut dyn DemuxSink,
    pub adaptation: &'a dyn AdaptationLogic,
    pub options: &'a PlayerOptions,
    pub epoch: u64,
}

#[derive(Debug)]
struct PendingFetch {
    handle: RequestHandle,
    sequence: u64,
    representation: RepresentationId,
    url: Url,
    start: Duration,
    duration: Duration,
}

/// Fetch state machine of one track.
///
/// The stream keeps at most one request in flight, so blocks reach the sink in
/// sequence order whatever the completion order of the transport is.
#[derive(Debug)]
pub struct Stream {
    track: AdaptationSetId,
    kind: TrackKind,
    status: StreamStatus,

    representation: Option<RepresentationId>,
    next_sequence: Option<u64>,
    /// End of the last block handed to the sink.
    delivered_end: Duration,
    estimator: BandwidthEstimator,

    pending: Option<PendingFetch>,
    failures: u32,
    discontinuity: bool,
    reactivations: u32,
    error: Option<PlayerError>,
}

impl Stream {
    /// Creates a stream positioned on the segment covering `start`.
    pub(crate) fn new(set: &AdaptationSet, start: Duration, options: &PlayerOptions) -> Self {
        let next_sequence = set.lowest().and_then(|r| r.segments.sequence_at(start));
        let delivered_end = set
            .lowest()
            .zip(next_sequence)
            .and_then(|(r, sequence)| r.segments.get(sequence))
            .map_or(start, |s| s.start);

        Self {
            track: set.id.clone(),
            kind: set.kind,
            status: StreamStatus::Idle,
            representation: None,
            next_sequence,
            delivered_end,
            estimator: BandwidthEstimator::new(options.smoothing_factor()),
            pending: None,
            failures: 0,
            discontinuity: false,
            reactivations: 0,
            error: None,
        }
    }

    pub fn track(&self) -> &AdaptationSetId {
        &self.track
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn representation(&self) -> Option<&RepresentationId> {
        self.representation.as_ref()
    }

    pub fn next_sequence(&self) -> Option<u64> {
        self.next_sequence
    }

    pub fn delivered_end(&self) -> Duration {
        self.delivered_end
    }

    pub fn download_rate(&self) -> Option<u64> {
        self.estimator.estimate()
    }

    pub(crate) fn reactivations(&self) -> u32 {
        self.reactivations
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The next block starts a new timeline, e.g. after a period change.
    pub(crate) fn flag_discontinuity(&mut self) {
        self.discontinuity = true;
    }

    pub(crate) fn take_error(&mut self) -> Option<PlayerError> {
        self.error.take()
    }

    pub fn buffered(&self, position: Duration) -> Duration {
        self.delivered_end.saturating_sub(position)
    }

    fn set_status(&mut self, status: StreamStatus) {
        if self.status != status {
            tracing::debug!(track = %self.track, from = ?self.status, to = ?status, "stream status changed");
            self.status = status;
        }
    }

    fn fail(&mut self, error: PlayerError) {
        tracing::warn!(track = %self.track, "stream failed: {error}");
        self.error = Some(error);
        self.set_status(StreamStatus::Error);
    }

    /// Issues the next fetch when the track needs more data.
    ///
    /// `force` ignores the buffer target, so one more segment is requested
    /// even with a full buffer.
    pub(crate) fn advance(
        &mut self,
        ctx: &mut StreamContext<'_>,
        set: &AdaptationSet,
        position: Duration,
        force: bool,
    ) {
        if !matches!(self.status, StreamStatus::Idle | StreamStatus::Buffering)
            || self.pending.is_some()
        {
            return;
        }

        let target_buffer = ctx.options.target_buffer_duration();
        let buffered = self.buffered(position);
        if buffered >= target_buffer && !force {
            return;
        }

        let telemetry = Telemetry {
            download_rate: self.estimator.estimate(),
            buffered,
            target_buffer,
        };
        let Some(selected) = ctx
            .adaptation
            .select(set, self.representation.as_ref(), &telemetry)
        else {
            self.fail(PlayerError::RepresentationUnavailable(format!(
                "adaptation set {} has no representation",
                set.id
            )));
            return;
        };
        if self.representation.as_ref() != Some(&selected.id) {
            tracing::info!(
                track = %self.track,
                from = ?self.representation.as_ref().map(|r| r.as_str()),
                to = %selected.id,
                bandwidth = selected.bandwidth,
                logic = ctx.adaptation.name(),
                "representation selected"
            );
            self.representation = Some(selected.id.clone());
        }

        let segments = &selected.segments;
        let Some(sequence) = self.next_sequence.or_else(|| segments.first().map(|s| s.sequence))
        else {
            if !segments.is_open_ended() {
                self.set_status(StreamStatus::Eof);
            }
            return;
        };
        self.next_sequence = Some(sequence);

        let Some(segment) = segments.get(sequence) else {
            self.locate_missing(segments, sequence);
            return;
        };

        let handle = ctx.connections.submit(ChunkRequest {
            url: segment.url.clone(),
            byte_range: segment.byte_range.clone(),
            purpose: RequestPurpose::Segment {
                track: self.track.clone(),
                sequence,
                epoch: ctx.epoch,
            },
        });
        tracing::trace!(track = %self.track, sequence, %handle, "segment requested");

        self.pending = Some(PendingFetch {
            handle,
            sequence,
            representation: selected.id.clone(),
            url: segment.url.clone(),
            start: segment.start,
            duration: segment.duration,
        });
        self.set_status(StreamStatus::Buffering);
    }

    /// `sequence` is not in the list of the selected representation.
    fn locate_missing(&mut self, segments: &SegmentList, sequence: u64) {
        match (segments.first(), segments.last()) {
            (Some(first), _) if sequence < first.sequence => {
                // left behind by the live window
                self.resync(first.sequence);
            }
            (_, Some(last)) if sequence <= last.sequence => {
                // hole in the numbering, skip it
                self.next_sequence = segments
                    .iter()
                    .map(|s| s.sequence)
                    .find(|s| *s > sequence);
                self.discontinuity = true;
            }
            _ if segments.is_open_ended() => {
                // waiting for the live edge to move
            }
            _ => self.set_status(StreamStatus::Eof),
        }
    }

    fn resync(&mut self, sequence: u64) {
        tracing::info!(
            track = %self.track,
            from = ?self.next_sequence,
            to = sequence,
            "resynchronized to the oldest available segment"
        );
        self.next_sequence = Some(sequence);
        self.discontinuity = true;
        self.failures = 0;
    }

    fn take_pending(&mut self, handle: RequestHandle) -> Option<PendingFetch> {
        match &self.pending {
            Some(pending) if pending.handle == handle => self.pending.take(),
            _ => None,
        }
    }

    /// Hands a downloaded segment to the sink.
    ///
    /// Returns `false` when the completion does not belong to the pending fetch.
    pub(crate) fn on_chunk_ready(
        &mut self,
        ctx: &mut StreamContext<'_>,
        handle: RequestHandle,
        chunk: Chunk,
    ) -> bool {
        let Some(pending) = self.take_pending(handle) else {
            tracing::debug!(track = %self.track, %handle, "dropping unexpected completion");
            return false;
        };

        self.estimator.record(chunk.data.len(), chunk.elapsed);

        let end = pending.start + pending.duration;
        if !self.discontinuity && pending.start < self.delivered_end && end <= self.delivered_end {
            self.fail(PlayerError::DiscontinuityUnresolvable(format!(
                "segment {} ({:?}..{end:?}) lies before media already delivered up to {:?}",
                pending.sequence, pending.start, self.delivered_end
            )));
            return true;
        }

        let block = Block {
            track: self.track.clone(),
            kind: self.kind,
            sequence: pending.sequence,
            pts: pending.start,
            duration: pending.duration,
            data: chunk.data,
            discontinuity: self.discontinuity,
        };
        if let Err(e) = ctx.sink.push(block) {
            self.fail(e);
            return true;
        }

        tracing::trace!(
            track = %self.track,
            sequence = pending.sequence,
            representation = %pending.representation,
            rate = ?self.estimator.estimate(),
            "segment delivered"
        );
        self.delivered_end = self.delivered_end.max(end);
        self.next_sequence = Some(pending.sequence + 1);
        self.discontinuity = false;
        self.failures = 0;
        true
    }

    /// Records a failed fetch. The segment is requested again on a later
    /// advance until the retry limit is reached.
    pub(crate) fn on_chunk_failed(
        &mut self,
        ctx: &mut StreamContext<'_>,
        handle: RequestHandle,
        error: PlayerError,
    ) -> bool {
        let Some(pending) = self.take_pending(handle) else {
            return false;
        };

        self.failures += 1;
        let max_retries = ctx.options.max_segment_retries.max(1);
        if self.failures >= max_retries || !error.is_transient() {
            self.fail(PlayerError::SegmentFetch {
                url: pending.url.to_string(),
                reason: format!("{error} after {} attempt(s)", self.failures),
            });
        } else {
            tracing::warn!(
                track = %self.track,
                sequence = pending.sequence,
                attempt = self.failures,
                "segment fetch failed, retry later: {error}"
            );
        }
        true
    }

    /// Revalidates the stream against a refreshed adaptation set.
    ///
    /// Returns `true` when the stream had to jump to a newer segment.
    pub(crate) fn on_manifest_refresh(
        &mut self,
        ctx: &mut StreamContext<'_>,
        set: &AdaptationSet,
    ) -> bool {
        if let Some(current) = &self.representation {
            if set.representation(current).is_none() {
                tracing::warn!(track = %self.track, representation = %current, "representation vanished");
                self.representation = None;
            }
        }

        let Some(representation) = self
            .representation
            .as_ref()
            .and_then(|id| set.representation(id))
            .or_else(|| set.lowest())
        else {
            return false;
        };
        let segments = &representation.segments;
        let Some(next) = self.next_sequence else {
            return false;
        };

        let mut resynced = false;
        if let Some(first) = segments.first() {
            if next < first.sequence {
                if let Some(pending) = self.pending.take() {
                    ctx.connections.cancel(pending.handle);
                }
                self.resync(first.sequence);
                resynced = true;
            }
        }

        if self.status == StreamStatus::Eof
            && segments.is_open_ended()
            && segments.last().is_some_and(|last| last.sequence >= next)
        {
            self.set_status(StreamStatus::Buffering);
        }
        resynced
    }

    /// Positions the stream on the segment covering `time`.
    pub(crate) fn seek(&mut self, ctx: &mut StreamContext<'_>, set: &AdaptationSet, time: Duration) {
        self.cancel(ctx);

        let Some(representation) = self
            .representation
            .as_ref()
            .and_then(|id| set.representation(id))
            .or_else(|| set.lowest())
        else {
            return;
        };
        let segments = &representation.segments;

        self.discontinuity = true;
        self.failures = 0;
        match segments.sequence_at(time).and_then(|sequence| segments.get(sequence)) {
            Some(segment) => {
                self.next_sequence = Some(segment.sequence);
                self.delivered_end = segment.start;
                if self.status == StreamStatus::Eof {
                    self.set_status(StreamStatus::Idle);
                }
            }
            None => {
                self.next_sequence = segments.last().map(|s| s.sequence + 1);
                self.delivered_end = segments.last().map_or(time, |s| s.end());
                if self.status != StreamStatus::Error {
                    self.set_status(StreamStatus::Eof);
                }
            }
        }
        tracing::debug!(track = %self.track, ?time, next = ?self.next_sequence, "stream seeked");
    }

    /// Leaves the `Error` state. Returns `false` when the stream was not failed.
    pub(crate) fn reactivate(&mut self) -> bool {
        if self.status != StreamStatus::Error {
            return false;
        }
        self.reactivations += 1;
        self.failures = 0;
        self.error = None;
        tracing::info!(track = %self.track, attempt = self.reactivations, "stream reactivated");
        self.set_status(StreamStatus::Idle);
        true
    }

    pub(crate) fn cancel(&mut self, ctx: &mut StreamContext<'_>) {
        if let Some(pending) = self.pending.take() {
            ctx.connections.cancel(pending.handle);
        }
    }
}
