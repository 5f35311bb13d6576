use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use url::Url;

use crate::{
    adaptation::AdaptationLogic,
    config::PlayerOptions,
    connection::{ChunkRequest, Completion, ConnectionManager, RequestHandle, RequestPurpose},
    demux::DemuxSink,
    error::{PlayerError, PlayerResult},
    model::{Manifest, MergeReport},
    parser::ManifestParser,
    stream::StreamContext,
    stream_set::StreamSet,
};

/// Coarse outcome of one [`PlaylistManager::demux`] tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxStatus {
    MoreData,
    Eof,
    Error,
}

/// Input of one orchestrator tick.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Monotonic time driving the refresh timer.
    pub now: Instant,
    /// Presentation time currently played out by the host.
    pub position: Duration,
}

impl Tick {
    pub fn new(now: Instant, position: Duration) -> Self {
        Self { now, position }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlQuery {
    CanSeek,
    CanPause,
    Duration,
    /// Estimated size in bytes of the presentation at the current selection.
    Size,
    Position,
    Seek(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    CanSeek(bool),
    CanPause(bool),
    Duration(Option<Duration>),
    Size(Option<u64>),
    Position(Duration),
    /// Whether the seek was performed.
    Seek(bool),
}

/// Collaborators the streams talk to.
struct Pipeline {
    connections: Box<dyn ConnectionManager>,
    sink: Box<dyn DemuxSink>,
    options: PlayerOptions,
}

impl Pipeline {
    fn context(&mut self, epoch: u64) -> StreamContext<'_> {
        StreamContext {
            connections: &mut *self.connections,
            sink: &mut *self.sink,
            adaptation: &self.options.adaptation,
            options: &self.options,
            epoch,
        }
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    next_update: Option<Instant>,
    failures: u32,
    pending: Option<RequestHandle>,
    /// Merged snapshot waiting for the next tick.
    staged: Option<Manifest>,
}

pub struct PlaylistManagerBuilder {
    options: PlayerOptions,
    manifest_url: Option<Url>,
}

impl PlaylistManagerBuilder {
    pub fn new() -> Self {
        Self {
            options: PlayerOptions::default(),
            manifest_url: None,
        }
    }

    pub fn options(mut self, options: PlayerOptions) -> Self {
        self.options = options;
        self
    }

    /// Location refreshed live manifests are requested from. Without it the
    /// host feeds refreshed documents through
    /// [`PlaylistManager::apply_document`].
    pub fn manifest_url(mut self, url: Url) -> Self {
        self.manifest_url = Some(url);
        self
    }

    pub fn build<P, C, S>(
        self,
        document: impl Into<Bytes>,
        parser: P,
        connections: C,
        sink: S,
    ) -> PlaylistManager
    where
        P: ManifestParser + 'static,
        C: ConnectionManager + 'static,
        S: DemuxSink + 'static,
    {
        PlaylistManager {
            document: document.into(),
            manifest_url: self.manifest_url,
            parser: Box::new(parser),
            pipeline: Pipeline {
                connections: Box::new(connections),
                sink: Box::new(sink),
                options: self.options,
            },
            manifest: Arc::new(Manifest::default()),
            streams: None,
            epoch: 0,
            clock_floor: Duration::ZERO,
            refresh: RefreshState::default(),
            state: State::Created,
            last_error: None,
        }
    }
}

impl Default for PlaylistManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Playing,
    Finished(DemuxStatus),
    Stopped,
}

/// Drives adaptive playback of one presentation.
///
/// The host calls [`demux`](Self::demux) once per tick. A tick never blocks:
/// it drains finished downloads, applies a refreshed manifest if one is
/// staged, requests the next refresh when due and lets every stream issue its
/// next fetch.
pub struct PlaylistManager {
    document: Bytes,
    manifest_url: Option<Url>,
    parser: Box<dyn ManifestParser>,
    pipeline: Pipeline,

    manifest: Arc<Manifest>,
    streams: Option<StreamSet>,
    epoch: u64,
    /// Clock reached by stream sets already torn down.
    clock_floor: Duration,

    refresh: RefreshState,
    state: State,
    last_error: Option<PlayerError>,
}

impl PlaylistManager {
    pub fn builder() -> PlaylistManagerBuilder {
        PlaylistManagerBuilder::new()
    }

    /// Parses the initial document and activates the first period.
    pub fn start(&mut self, now: Instant) -> PlayerResult<()> {
        if self.state == State::Playing {
            return Ok(());
        }

        let manifest = self.parser.parse(&self.document)?;
        manifest.validate()?;
        tracing::info!(
            periods = manifest.periods.len(),
            live = manifest.is_live,
            adaptation = self.pipeline.options.adaptation.name(),
            "playback started"
        );

        self.manifest = Arc::new(manifest);
        self.state = State::Playing;
        self.last_error = None;
        self.activate(0, Duration::ZERO, false);
        self.schedule_next_update(now);
        Ok(())
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn streams(&self) -> Option<&StreamSet> {
        self.streams.as_ref()
    }

    pub fn last_error(&self) -> Option<&PlayerError> {
        self.last_error.as_ref()
    }

    /// Playback clock, the presentation time delivered on every mandatory track.
    pub fn clock(&self) -> Duration {
        self.streams
            .as_ref()
            .map_or(self.clock_floor, |s| s.clock().max(self.clock_floor))
    }

    fn record_error(&mut self, error: PlayerError) {
        self.last_error = Some(error);
    }

    /// Replaces the current stream set with one for period `index`.
    fn activate(&mut self, index: usize, start: Duration, discontinuity: bool) {
        self.teardown();

        let manifest = self.manifest.clone();
        let Some(period) = manifest.periods.get(index) else {
            return;
        };
        self.epoch += 1;
        self.streams = Some(StreamSet::new(
            period,
            self.epoch,
            start.max(period.start),
            discontinuity,
            &self.pipeline.options,
        ));
    }

    /// Drains and drops the current stream set.
    fn teardown(&mut self) {
        if let Some(mut streams) = self.streams.take() {
            streams.drain(&mut self.pipeline.context(streams.epoch()));
            self.clock_floor = self.clock_floor.max(streams.clock());
        }
    }

    /// Runs one tick.
    ///
    /// `force_one_step` lets every stream fetch one segment even when its
    /// buffer is full.
    pub fn demux(&mut self, tick: Tick, force_one_step: bool) -> DemuxStatus {
        match self.state {
            State::Created => {
                self.record_error(PlayerError::NotStarted);
                return DemuxStatus::Error;
            }
            State::Stopped => return DemuxStatus::Eof,
            State::Finished(status) => return status,
            State::Playing => {}
        }

        self.drain_completions(tick.now);
        self.apply_staged();
        if self.manifest_url.is_some() && self.needs_update(tick.now) {
            if let Err(e) = self.update_playlist() {
                self.record_error(e);
            }
        }

        let manifest = self.manifest.clone();
        let Some(streams) = self.streams.as_mut() else {
            return self.finish(DemuxStatus::Eof);
        };
        let Some(index) = manifest.period_index(streams.period()) else {
            self.record_error(PlayerError::NoPeriodFound);
            return self.finish(DemuxStatus::Error);
        };
        let period = &manifest.periods[index];

        let epoch = streams.epoch();
        streams.advance(
            &mut self.pipeline.context(epoch),
            period,
            tick.position,
            force_one_step,
        );
        let errors = streams.take_errors();
        let failed = streams.is_failed(manifest.is_live);
        let exhausted = streams.is_exhausted();
        let degraded = streams.has_failed_mandatory();
        if let Some(error) = errors.into_iter().last() {
            self.record_error(error);
        }

        if failed {
            tracing::error!(period = %period.id, "mandatory track failed");
            self.teardown();
            return self.finish(DemuxStatus::Error);
        }
        if degraded {
            // a refresh may still bring the track back
            return DemuxStatus::MoreData;
        }
        if exhausted {
            if index + 1 < manifest.periods.len() {
                tracing::info!(from = %period.id, to = %manifest.periods[index + 1].id, "period transition");
                self.activate(index + 1, Duration::ZERO, true);
                return DemuxStatus::MoreData;
            }
            if manifest.is_live && !self.is_refresh_degraded() {
                // a refresh may announce the next period
                return DemuxStatus::MoreData;
            }
            tracing::info!("end of presentation");
            self.teardown();
            return self.finish(DemuxStatus::Eof);
        }
        DemuxStatus::MoreData
    }

    fn finish(&mut self, status: DemuxStatus) -> DemuxStatus {
        self.state = State::Finished(status);
        status
    }

    fn drain_completions(&mut self, now: Instant) {
        while let Some(completion) = self.pipeline.connections.poll() {
            match completion.purpose {
                RequestPurpose::Manifest => self.on_manifest_completion(completion, now),
                RequestPurpose::Segment { .. } => {
                    let Some(streams) = self.streams.as_mut() else {
                        continue;
                    };
                    let epoch = streams.epoch();
                    streams.dispatch(&mut self.pipeline.context(epoch), completion);
                }
            }
        }
    }

    fn on_manifest_completion(&mut self, completion: Completion, now: Instant) {
        if self.refresh.pending != Some(completion.handle) {
            tracing::debug!(handle = %completion.handle, "dropping stale manifest completion");
            return;
        }
        self.refresh.pending = None;

        let result = completion
            .result
            .map_err(|e| PlayerError::ManifestFetch(e.to_string()))
            .and_then(|chunk| self.apply_document(&chunk.data));
        match result {
            Ok(report) => {
                self.refresh.failures = 0;
                tracing::debug!(
                    appended = report.segments.appended,
                    pruned = report.segments.pruned,
                    new_periods = report.new_periods,
                    "manifest refreshed"
                );
            }
            Err(e) => {
                self.refresh.failures += 1;
                tracing::warn!(failures = self.refresh.failures, "manifest refresh failed: {e}");
                self.record_error(e);
                if self.refresh.failures == self.pipeline.options.max_refresh_failures.max(1) {
                    self.close_known_segments();
                }
            }
        }
        self.schedule_next_update(now);
    }

    /// Stages a snapshot whose segment lists end with the segments known so
    /// far. A later successful refresh opens them again.
    fn close_known_segments(&mut self) {
        tracing::warn!(
            failures = self.refresh.failures,
            "manifest unreachable, playing out the known segments"
        );
        let mut closed = self
            .refresh
            .staged
            .take()
            .unwrap_or_else(|| self.manifest.as_ref().clone());
        for period in &mut closed.periods {
            period.close_segment_lists();
        }
        self.refresh.staged = Some(closed);
    }

    fn is_refresh_degraded(&self) -> bool {
        self.refresh.failures >= self.pipeline.options.max_refresh_failures.max(1)
    }

    /// Whether a live manifest refresh is due.
    pub fn needs_update(&self, now: Instant) -> bool {
        self.state == State::Playing
            && self.manifest.is_live
            && self.refresh.pending.is_none()
            && self.refresh.next_update.is_some_and(|deadline| now >= deadline)
    }

    /// Requests the manifest again. The response is merged when it completes
    /// and takes effect on the following tick.
    pub fn update_playlist(&mut self) -> PlayerResult<RequestHandle> {
        if let Some(handle) = self.refresh.pending {
            return Ok(handle);
        }
        let url = self
            .manifest_url
            .clone()
            .ok_or_else(|| PlayerError::ManifestFetch("no manifest URL to refresh from".to_string()))?;

        let handle = self.pipeline.connections.submit(ChunkRequest::manifest(url));
        tracing::debug!(%handle, "manifest refresh requested");
        self.refresh.pending = Some(handle);
        self.refresh.next_update = None;
        Ok(handle)
    }

    /// Parses a refreshed document and merges it into the current snapshot.
    ///
    /// The merged snapshot replaces the current one at the start of the next
    /// tick.
    pub fn apply_document(&mut self, document: &[u8]) -> PlayerResult<MergeReport> {
        let refreshed = self.parser.parse(document)?;
        let base = self.refresh.staged.as_ref().unwrap_or(self.manifest.as_ref());
        let playing = self.streams.as_ref().map(|s| s.period());

        let (merged, report) = base.merge(refreshed, playing)?;
        merged.validate()?;
        self.refresh.staged = Some(merged);
        Ok(report)
    }

    fn apply_staged(&mut self) {
        let Some(staged) = self.refresh.staged.take() else {
            return;
        };
        let manifest = Arc::new(staged);
        self.manifest = manifest.clone();

        let Some(streams) = self.streams.as_mut() else {
            return;
        };
        let Some(period) = manifest.period(streams.period()) else {
            tracing::warn!(period = %streams.period(), "active period left the manifest");
            return;
        };
        let epoch = streams.epoch();
        let resynced = streams.on_manifest_refresh(&mut self.pipeline.context(epoch), period);
        if resynced > 0 {
            tracing::info!(resynced, "streams resynchronized after refresh");
        }
    }

    /// Computes the next refresh deadline.
    ///
    /// The interval is the declared update period floored by
    /// `min_refresh_interval`, doubled for every consecutive failed refresh
    /// and capped by `max_refresh_backoff`.
    pub fn schedule_next_update(&mut self, now: Instant) {
        if !self.manifest.is_live {
            self.refresh.next_update = None;
            return;
        }

        let options = &self.pipeline.options;
        let base = self
            .manifest
            .min_update_period
            .unwrap_or_default()
            .max(options.min_refresh_duration());
        let backoff = base.saturating_mul(2u32.saturating_pow(self.refresh.failures.min(16)));
        let delay = backoff.min(options.max_backoff_duration().max(base));

        tracing::trace!(?delay, failures = self.refresh.failures, "next manifest refresh scheduled");
        self.refresh.next_update = Some(now + delay);
    }

    pub fn next_update(&self) -> Option<Instant> {
        self.refresh.next_update
    }

    pub fn control(&mut self, query: ControlQuery) -> PlayerResult<ControlResult> {
        if self.state == State::Created {
            return Err(PlayerError::NotStarted);
        }

        Ok(match query {
            ControlQuery::CanSeek => ControlResult::CanSeek(self.can_seek()),
            ControlQuery::CanPause => ControlResult::CanPause(true),
            ControlQuery::Duration => ControlResult::Duration(self.manifest.total_duration()),
            ControlQuery::Size => ControlResult::Size(self.estimated_size()),
            ControlQuery::Position => ControlResult::Position(self.clock()),
            ControlQuery::Seek(time) => ControlResult::Seek(self.seek(time)),
        })
    }

    fn can_seek(&self) -> bool {
        !self.manifest.is_live && self.state != State::Stopped
    }

    /// Bandwidth of the current selection times the presentation duration.
    fn estimated_size(&self) -> Option<u64> {
        let duration = self.manifest.total_duration()?;
        let streams = self.streams.as_ref()?;
        let period = self.manifest.period(streams.period())?;

        let bits: u64 = streams
            .streams()
            .iter()
            .filter_map(|stream| {
                let set = period.adaptation_set(stream.track())?;
                stream
                    .representation()
                    .and_then(|id| set.representation(id))
                    .or_else(|| set.lowest())
                    .map(|r| r.bandwidth)
            })
            .sum();
        Some((bits as f64 * duration.as_secs_f64() / 8.0) as u64)
    }

    fn seek(&mut self, time: Duration) -> bool {
        if !self.can_seek() {
            return false;
        }

        let manifest = self.manifest.clone();
        let index = manifest
            .periods
            .iter()
            .rposition(|p| p.start <= time)
            .unwrap_or(0);
        let target = &manifest.periods[index];
        tracing::info!(?time, period = %target.id, "seek");

        self.state = State::Playing;
        self.clock_floor = Duration::ZERO;
        match self.streams.as_mut().filter(|s| s.period() == &target.id) {
            Some(streams) => {
                let epoch = streams.epoch();
                streams.seek(&mut self.pipeline.context(epoch), target, time);
            }
            None => {
                self.teardown();
                self.clock_floor = Duration::ZERO;
                self.activate(index, time, true);
            }
        }
        true
    }

    /// Cancels every outstanding request and releases the streams.
    pub fn stop(&mut self) {
        self.teardown();
        if let Some(handle) = self.refresh.pending.take() {
            self.pipeline.connections.cancel(handle);
        }
        self.refresh = RefreshState::default();
        self.state = State::Stopped;
        tracing::info!("playback stopped");
    }
}
