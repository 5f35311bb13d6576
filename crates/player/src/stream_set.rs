use std::time::Duration;

use crate::{
    config::PlayerOptions,
    connection::{Completion, RequestPurpose},
    error::PlayerError,
    model::{AdaptationSet, Period, PeriodId},
    stream::{Stream, StreamContext, StreamStatus},
};

/// Streams of the active period.
///
/// Every request issued by the set is tagged with its `epoch`. Completions
/// from another epoch belong to a torn down set and are discarded.
pub struct StreamSet {
    period: PeriodId,
    epoch: u64,
    streams: Vec<Stream>,
    /// Optional streams given up after a failure.
    disabled: Vec<bool>,
    /// High-water mark of the playback clock.
    clock: Duration,
}

impl StreamSet {
    pub(crate) fn new(
        period: &Period,
        epoch: u64,
        start: Duration,
        discontinuity: bool,
        options: &PlayerOptions,
    ) -> Self {
        let streams: Vec<Stream> = period
            .adaptation_sets
            .iter()
            .map(|set| {
                let mut stream = Stream::new(set, start, options);
                if discontinuity {
                    stream.flag_discontinuity();
                }
                stream
            })
            .collect();
        let clock = streams
            .iter()
            .map(|s| s.delivered_end())
            .min()
            .unwrap_or(start);

        tracing::info!(
            period = %period.id,
            epoch,
            tracks = streams.len(),
            "stream set activated"
        );
        Self {
            period: period.id.clone(),
            epoch,
            disabled: vec![false; streams.len()],
            streams,
            clock,
        }
    }

    pub fn period(&self) -> &PeriodId {
        &self.period
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    /// Streams still contributing to playback.
    fn active(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams
            .iter_mut()
            .zip(&self.disabled)
            .filter(|(_, disabled)| !**disabled)
            .map(|(stream, _)| stream)
    }

    pub(crate) fn advance(
        &mut self,
        ctx: &mut StreamContext<'_>,
        period: &Period,
        position: Duration,
        force: bool,
    ) {
        for stream in self.active() {
            match period.adaptation_set(stream.track()) {
                Some(set) => stream.advance(ctx, set, position, force),
                None => tracing::warn!(track = %stream.track(), "track missing from period"),
            }
        }
        self.disable_failed_optional();
        self.update_clock();
    }

    /// Routes a segment completion to its stream.
    ///
    /// Returns `false` when the completion was stale and dropped.
    pub(crate) fn dispatch(&mut self, ctx: &mut StreamContext<'_>, completion: Completion) -> bool {
        let Completion {
            handle,
            purpose,
            result,
        } = completion;
        let RequestPurpose::Segment { track, epoch, .. } = purpose else {
            return false;
        };
        if epoch != self.epoch {
            tracing::debug!(%handle, epoch, current = self.epoch, "dropping completion of a previous epoch");
            return false;
        }

        let Some(stream) = self.active().find(|s| s.track() == &track) else {
            return false;
        };
        let accepted = match result {
            Ok(chunk) => stream.on_chunk_ready(ctx, handle, chunk),
            Err(error) => stream.on_chunk_failed(ctx, handle, error),
        };
        self.disable_failed_optional();
        self.update_clock();
        accepted
    }

    fn disable_failed_optional(&mut self) {
        for (stream, disabled) in self.streams.iter_mut().zip(self.disabled.iter_mut()) {
            if !*disabled && !stream.kind().is_mandatory() && stream.status() == StreamStatus::Error
            {
                tracing::warn!(track = %stream.track(), "optional track disabled");
                *disabled = true;
            }
        }
    }

    fn contributes_to_clock(stream: &Stream, disabled: bool) -> bool {
        if disabled {
            return false;
        }
        stream.kind().is_mandatory()
            || !matches!(stream.status(), StreamStatus::Eof | StreamStatus::Error)
    }

    fn update_clock(&mut self) {
        let lowest = self
            .streams
            .iter()
            .zip(&self.disabled)
            .filter(|(stream, disabled)| Self::contributes_to_clock(stream, **disabled))
            .map(|(stream, _)| stream.delivered_end())
            .min();
        if let Some(lowest) = lowest {
            self.clock = self.clock.max(lowest);
        }
    }

    /// Presentation time delivered on every contributing track. Never decreases,
    /// seeks excepted.
    pub fn clock(&self) -> Duration {
        self.clock
    }

    /// Every mandatory track reached its end.
    pub fn is_exhausted(&self) -> bool {
        let mut tracks = self
            .streams
            .iter()
            .zip(&self.disabled)
            .filter(|(stream, disabled)| !**disabled && stream.kind().is_mandatory())
            .peekable();
        if tracks.peek().is_none() {
            // only optional tracks
            return self
                .streams
                .iter()
                .zip(&self.disabled)
                .all(|(stream, disabled)| *disabled || stream.status() == StreamStatus::Eof);
        }
        tracks.all(|(stream, _)| stream.status() == StreamStatus::Eof)
    }

    pub fn has_failed_mandatory(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.kind().is_mandatory() && s.status() == StreamStatus::Error)
    }

    /// A mandatory track failed and can not be brought back.
    ///
    /// Without manifest refreshes nothing can restore a failed track, so the
    /// failure is final right away.
    pub fn is_failed(&self, refreshable: bool) -> bool {
        self.streams.iter().any(|s| {
            s.kind().is_mandatory()
                && s.status() == StreamStatus::Error
                && (!refreshable || s.reactivations() > 0)
        })
    }

    pub(crate) fn take_errors(&mut self) -> Vec<PlayerError> {
        self.streams
            .iter_mut()
            .filter_map(|s| s.take_error())
            .collect()
    }

    /// Revalidates every stream against a refreshed period and gives failed
    /// mandatory tracks their single reactivation.
    ///
    /// Returns the number of streams that had to resynchronize.
    pub(crate) fn on_manifest_refresh(&mut self, ctx: &mut StreamContext<'_>, period: &Period) -> usize {
        let mut resynced = 0;
        for stream in self.active() {
            let Some(set) = period.adaptation_set(stream.track()) else {
                continue;
            };
            if stream.status() == StreamStatus::Error
                && stream.kind().is_mandatory()
                && stream.reactivations() == 0
                && has_segments(set)
            {
                stream.reactivate();
            }
            if stream.on_manifest_refresh(ctx, set) {
                resynced += 1;
            }
        }
        resynced
    }

    /// Moves every stream to `time`. The clock restarts from the new position.
    pub(crate) fn seek(&mut self, ctx: &mut StreamContext<'_>, period: &Period, time: Duration) {
        for stream in self.active() {
            if let Some(set) = period.adaptation_set(stream.track()) {
                stream.seek(ctx, set, time);
            }
        }
        self.clock = self
            .streams
            .iter()
            .zip(&self.disabled)
            .filter(|(stream, disabled)| Self::contributes_to_clock(stream, **disabled))
            .map(|(stream, _)| stream.delivered_end())
            .min()
            .unwrap_or(time);
    }

    /// Cancels every outstanding fetch.
    pub(crate) fn drain(&mut self, ctx: &mut StreamContext<'_>) {
        for stream in self.streams.iter_mut() {
            stream.cancel(ctx);
        }
        tracing::debug!(period = %self.period, epoch = self.epoch, "stream set drained");
    }

    pub fn has_pending(&self) -> bool {
        self.streams.iter().any(Stream::has_pending)
    }

    /// Buffered duration of the shortest contributing track.
    pub fn buffered(&self, position: Duration) -> Duration {
        self.streams
            .iter()
            .zip(&self.disabled)
            .filter(|(stream, disabled)| Self::contributes_to_clock(stream, **disabled))
            .map(|(stream, _)| stream.buffered(position))
            .min()
            .unwrap_or_default()
    }
}

fn has_segments(set: &AdaptationSet) -> bool {
    set.representations.iter().any(|r| !r.segments.is_empty())
}
