use std::time::Duration;

use chrono::{DateTime, Utc};
use dash_mpd::{SegmentTemplate, SegmentTimeline, MPD};
use url::Url;

use super::{
    parse_byte_range, resolve_url, template::TemplateVars, utf8, ManifestParser,
};
use crate::{
    error::{PlayerError, PlayerResult},
    model::{
        AdaptationSet, AdaptationSetId, Manifest, Period, PeriodId, Representation,
        RepresentationId, Segment, SegmentList, TrackKind,
    },
};

/// Reads MPEG-DASH MPD documents.
///
/// Supported addressing modes are `SegmentTemplate` with or without a
/// `SegmentTimeline`, `SegmentList`, and a single `BaseURL` per
/// representation. Segment sequence numbers are the DASH segment numbers, so
/// they stay stable across refreshes of a dynamic MPD.
pub struct DashParser {
    manifest_url: Url,
    wall_clock: Option<DateTime<Utc>>,
}

impl DashParser {
    pub fn new(manifest_url: Url) -> Self {
        Self {
            manifest_url,
            wall_clock: None,
        }
    }

    /// Pins the wall clock used to compute the availability window of
    /// dynamic `@duration` templates.
    pub fn with_wall_clock(mut self, now: DateTime<Utc>) -> Self {
        self.wall_clock = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.wall_clock.unwrap_or_else(Utc::now)
    }
}

impl ManifestParser for DashParser {
    fn parse(&self, document: &[u8]) -> PlayerResult<Manifest> {
        let mpd = dash_mpd::parse(utf8(document)?)?;
        let is_live = mpd.mpdtype.as_deref() == Some("dynamic");

        let base_url = match mpd.base_url.first() {
            Some(base) => resolve_url(&self.manifest_url, &base.base)?,
            None => self.manifest_url.clone(),
        };
        let window = AvailabilityWindow {
            is_live,
            availability_start: mpd.availabilityStartTime,
            time_shift_buffer_depth: mpd.timeShiftBufferDepth,
            now: self.now(),
        };

        let timings = period_timings(&mpd, is_live)?;
        let mut periods = Vec::with_capacity(mpd.periods.len());
        for (index, (period, (start, duration))) in mpd.periods.iter().zip(timings).enumerate() {
            let period_id = period
                .id
                .clone()
                .unwrap_or_else(|| format!("period-{index}"));
            let base_url = match period.BaseURL.first() {
                Some(base) => resolve_url(&base_url, &base.base)?,
                None => base_url.clone(),
            };

            let mut adaptation_sets = Vec::with_capacity(period.adaptations.len());
            for (set_index, adaptation) in period.adaptations.iter().enumerate() {
                let Some(kind) = track_kind(adaptation) else {
                    tracing::debug!(
                        period = %period_id,
                        index = set_index,
                        "Skipping adaptation set with unsupported content type"
                    );
                    continue;
                };
                let set_id = adaptation
                    .id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| format!("set-{set_index}"));
                let base_url = match adaptation.BaseURL.first() {
                    Some(base) => resolve_url(&base_url, &base.base)?,
                    None => base_url.clone(),
                };

                let mut representations = Vec::with_capacity(adaptation.representations.len());
                for (rep_index, representation) in adaptation.representations.iter().enumerate() {
                    let id = representation
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("{set_id}-{rep_index}"));
                    let base_url = match representation.BaseURL.first() {
                        Some(base) => resolve_url(&base_url, &base.base)?,
                        None => base_url.clone(),
                    };
                    let bandwidth = representation.bandwidth.unwrap_or(0);

                    let target = SegmentTarget {
                        base_url,
                        representation_id: &id,
                        bandwidth,
                        period_start: start,
                        period_duration: duration,
                    };

                    let templates = [
                        representation.SegmentTemplate.as_ref(),
                        adaptation.SegmentTemplate.as_ref(),
                        period.SegmentTemplate.as_ref(),
                    ];
                    let segments = if let Some(template) = InheritedTemplate::resolve(&templates) {
                        match template.timeline {
                            Some(timeline) => target.timeline_segments(&template, timeline)?,
                            None => target.numbered_segments(&template, &window)?,
                        }
                    } else if let Some(list) = representation
                        .SegmentList
                        .as_ref()
                        .or(adaptation.SegmentList.as_ref())
                    {
                        target.listed_segments(list)?
                    } else {
                        vec![target.whole_resource()]
                    };

                    let open_ended = is_live && !reaches_period_end(&segments, start, duration);
                    representations.push(Representation {
                        id: RepresentationId::new(id),
                        bandwidth,
                        segments: SegmentList::new(segments, open_ended),
                    });
                }

                adaptation_sets.push(AdaptationSet {
                    id: AdaptationSetId::new(set_id),
                    kind,
                    representations,
                });
            }

            periods.push(Period {
                id: PeriodId::new(period_id),
                start,
                duration,
                adaptation_sets,
            });
        }

        Ok(Manifest {
            periods,
            is_live,
            min_update_period: if is_live {
                mpd.minimumUpdatePeriod
            } else {
                None
            },
            duration: mpd.mediaPresentationDuration,
        })
    }
}

/// Start and duration of every period.
///
/// A missing `@start` follows the previous period, and a missing `@duration`
/// ends at the next period or at the end of the presentation.
fn period_timings(mpd: &MPD, is_live: bool) -> PlayerResult<Vec<(Duration, Option<Duration>)>> {
    let mut timings: Vec<(Duration, Option<Duration>)> = Vec::with_capacity(mpd.periods.len());
    for period in &mpd.periods {
        let start = match (period.start, timings.last()) {
            (Some(start), _) => start,
            (None, None) => Duration::ZERO,
            (None, Some((previous_start, Some(previous_duration)))) => {
                *previous_start + *previous_duration
            }
            (None, Some((_, None))) => {
                return Err(PlayerError::ManifestParse(
                    "period start can not be derived from an unbounded period".to_string(),
                ))
            }
        };

        if let Some(previous) = timings.last_mut() {
            if previous.1.is_none() {
                previous.1 = Some(start.saturating_sub(previous.0));
            }
        }
        timings.push((start, period.duration));
    }

    if let (false, Some(last), Some(total)) =
        (is_live, timings.last_mut(), mpd.mediaPresentationDuration)
    {
        if last.1.is_none() {
            last.1 = Some(total.saturating_sub(last.0));
        }
    }
    Ok(timings)
}

/// Whether the last listed segment ends the period. Only a bounded period
/// can be complete.
fn reaches_period_end(segments: &[Segment], start: Duration, duration: Option<Duration>) -> bool {
    let (Some(duration), Some(last)) = (duration, segments.iter().map(Segment::end).max()) else {
        return false;
    };
    // timescale rounding
    last + Duration::from_millis(1) >= start + duration
}

fn track_kind(adaptation: &dash_mpd::AdaptationSet) -> Option<TrackKind> {
    let first = adaptation.representations.first();
    [
        adaptation.contentType.as_deref(),
        adaptation.mimeType.as_deref(),
        first.and_then(|r| r.contentType.as_deref()),
        first.and_then(|r| r.mimeType.as_deref()),
    ]
    .into_iter()
    .flatten()
    .find_map(TrackKind::from_mime_type)
}

struct AvailabilityWindow {
    is_live: bool,
    availability_start: Option<DateTime<Utc>>,
    time_shift_buffer_depth: Option<Duration>,
    now: DateTime<Utc>,
}

/// `SegmentTemplate` attributes after inheritance from the enclosing
/// adaptation set and period.
struct InheritedTemplate<'a> {
    media: &'a str,
    timescale: u64,
    start_number: u64,
    presentation_time_offset: u64,
    duration: Option<f64>,
    timeline: Option<&'a SegmentTimeline>,
}

impl<'a> InheritedTemplate<'a> {
    /// `templates` is ordered from the innermost element outwards.
    fn resolve(templates: &[Option<&'a SegmentTemplate>]) -> Option<Self> {
        let chain: Vec<&SegmentTemplate> = templates.iter().flatten().copied().collect();
        if chain.is_empty() {
            return None;
        }
        let media = chain.iter().find_map(|&t| t.media.as_deref())?;

        Some(Self {
            media,
            timescale: chain
                .iter()
                .find_map(|&t| t.timescale)
                .unwrap_or(1)
                .max(1),
            start_number: chain.iter().find_map(|&t| t.startNumber).unwrap_or(1),
            presentation_time_offset: chain
                .iter()
                .find_map(|&t| t.presentationTimeOffset)
                .unwrap_or(0),
            duration: chain.iter().find_map(|&t| t.duration),
            timeline: chain.iter().find_map(|&t| t.SegmentTimeline.as_ref()),
        })
    }

    fn seconds(&self, ticks: u64) -> Duration {
        secs(ticks as f64 / self.timescale as f64)
    }
}

struct SegmentTarget<'a> {
    base_url: Url,
    representation_id: &'a str,
    bandwidth: u64,
    period_start: Duration,
    period_duration: Option<Duration>,
}

impl SegmentTarget<'_> {
    fn vars(&self, number: u64, time: Option<u64>) -> TemplateVars<'_> {
        TemplateVars {
            representation_id: self.representation_id,
            bandwidth: self.bandwidth,
            number: Some(number),
            time,
        }
    }

    fn timeline_segments(
        &self,
        template: &InheritedTemplate<'_>,
        timeline: &SegmentTimeline,
    ) -> PlayerResult<Vec<Segment>> {
        let offset = template.presentation_time_offset;
        let period_end_ticks = self
            .period_duration
            .map(|d| (d.as_secs_f64() * template.timescale as f64) as u64 + offset);

        let mut segments = Vec::new();
        let mut number = template.start_number;
        let mut time = timeline.segments.first().and_then(|s| s.t).unwrap_or(0);
        for (index, s) in timeline.segments.iter().enumerate() {
            if let Some(t) = s.t {
                time = t;
            }
            if s.d == 0 {
                return Err(PlayerError::ManifestParse(
                    "SegmentTimeline entry with zero duration".to_string(),
                ));
            }

            let repeat = match s.r.unwrap_or(0) {
                r if r >= 0 => r as u64,
                // negative repeat lasts until the next entry or the period end
                _ => timeline
                    .segments
                    .get(index + 1)
                    .and_then(|next| next.t)
                    .or(period_end_ticks)
                    .map(|end| end.saturating_sub(time).div_ceil(s.d).saturating_sub(1))
                    .unwrap_or(0),
            };

            for _ in 0..=repeat {
                let url = resolve_url(
                    &self.base_url,
                    &self.vars(number, Some(time)).expand(template.media),
                )?;
                segments.push(Segment {
                    sequence: number,
                    start: self.period_start + template.seconds(time.saturating_sub(offset)),
                    duration: template.seconds(s.d),
                    url,
                    byte_range: None,
                });
                time += s.d;
                number += 1;
            }
        }
        Ok(segments)
    }

    fn numbered_segments(
        &self,
        template: &InheritedTemplate<'_>,
        window: &AvailabilityWindow,
    ) -> PlayerResult<Vec<Segment>> {
        let ticks = template.duration.ok_or_else(|| {
            PlayerError::ManifestParse("SegmentTemplate without duration or timeline".to_string())
        })?;
        let duration = ticks / template.timescale as f64;
        if duration.is_nan() || duration <= 0.0 {
            return Err(PlayerError::ManifestParse(
                "SegmentTemplate duration must be positive".to_string(),
            ));
        }

        let in_period = self
            .period_duration
            .map(|d| (d.as_secs_f64() / duration).ceil() as u64);
        let (first, end) = if window.is_live {
            let availability_start = window.availability_start.ok_or_else(|| {
                PlayerError::ManifestParse("dynamic MPD without availabilityStartTime".to_string())
            })?;
            let elapsed = (window.now - availability_start)
                .to_std()
                .unwrap_or_default()
                .saturating_sub(self.period_start);
            // only segments that have been completely produced
            let mut end = (elapsed.as_secs_f64() / duration).floor() as u64;
            if let Some(in_period) = in_period {
                end = end.min(in_period);
            }
            let depth = window
                .time_shift_buffer_depth
                .map(|d| (d.as_secs_f64() / duration).ceil() as u64)
                .unwrap_or(end);
            (end.saturating_sub(depth), end)
        } else {
            let count = in_period.ok_or_else(|| {
                PlayerError::ManifestParse("static period without duration".to_string())
            })?;
            (0, count)
        };

        (first..end)
            .map(|index| {
                let number = template.start_number + index;
                let time = (index as f64 * ticks) as u64 + template.presentation_time_offset;
                Ok(Segment {
                    sequence: number,
                    start: self.period_start + secs(index as f64 * duration),
                    duration: secs(duration),
                    url: resolve_url(&self.base_url, &self.vars(number, Some(time)).expand(template.media))?,
                    byte_range: None,
                })
            })
            .collect()
    }

    fn listed_segments(&self, list: &dash_mpd::SegmentList) -> PlayerResult<Vec<Segment>> {
        let count = list.segment_urls.len().max(1);
        let duration = match list.duration {
            Some(ticks) => secs(ticks as f64 / list.timescale.unwrap_or(1).max(1) as f64),
            None => self.period_duration.unwrap_or_default() / count as u32,
        };

        let mut start = self.period_start;
        let mut segments = Vec::with_capacity(list.segment_urls.len());
        for (index, segment_url) in list.segment_urls.iter().enumerate() {
            let url = match segment_url.media.as_deref() {
                Some(media) => resolve_url(&self.base_url, media)?,
                None => self.base_url.clone(),
            };
            let byte_range = segment_url
                .mediaRange
                .as_deref()
                .map(parse_byte_range)
                .transpose()?;

            segments.push(Segment {
                sequence: index as u64 + 1,
                start,
                duration,
                url,
                byte_range,
            });
            start += duration;
        }
        Ok(segments)
    }

    /// A representation addressed only by its `BaseURL`.
    fn whole_resource(&self) -> Segment {
        Segment {
            sequence: 1,
            start: self.period_start,
            duration: self.period_duration.unwrap_or_default(),
            url: self.base_url.clone(),
            byte_range: None,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
