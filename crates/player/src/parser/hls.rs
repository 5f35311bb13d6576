use std::time::Duration;

use m3u8_rs::MediaPlaylistType;
use url::Url;

use super::{resolve_url, ManifestParser};
use crate::{
    error::{PlayerError, PlayerResult},
    model::{
        AdaptationSet, ByteRange, Manifest, Period, Representation, Segment, SegmentList,
        TrackKind,
    },
};

/// Reads a single HLS media playlist as a one-track manifest.
///
/// `EXT-X-MEDIA-SEQUENCE` numbers the segments. Segment times restart at zero
/// on every parse and are rebased when merged into a running snapshot.
pub struct HlsMediaParser {
    playlist_url: Url,
    kind: TrackKind,
    bandwidth: u64,
}

impl HlsMediaParser {
    pub fn new(playlist_url: Url) -> Self {
        Self {
            playlist_url,
            kind: TrackKind::Video,
            bandwidth: 0,
        }
    }

    pub fn kind(mut self, kind: TrackKind) -> Self {
        self.kind = kind;
        self
    }

    /// Bandwidth announced by the master playlist for this rendition.
    pub fn bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = bandwidth;
        self
    }
}

impl ManifestParser for HlsMediaParser {
    fn parse(&self, document: &[u8]) -> PlayerResult<Manifest> {
        let playlist = m3u8_rs::parse_media_playlist_res(document)
            .map_err(|_| PlayerError::ManifestParse("invalid media playlist".to_string()))?;

        let is_live =
            !playlist.end_list && !matches!(playlist.playlist_type, Some(MediaPlaylistType::Vod));

        let mut start = Duration::ZERO;
        let mut next_offset: Option<(String, u64)> = None;
        let mut segments = Vec::with_capacity(playlist.segments.len());
        for (index, segment) in playlist.segments.iter().enumerate() {
            let duration = Duration::try_from_secs_f64(segment.duration as f64).unwrap_or_default();

            // a sub-range without offset starts where the previous one of the same URI ended
            let byte_range = match &segment.byte_range {
                Some(range) => {
                    let offset = range.offset.unwrap_or_else(|| match &next_offset {
                        Some((uri, offset)) if uri == &segment.uri => *offset,
                        _ => 0,
                    });
                    let end = offset
                        .checked_add(range.length)
                        .filter(|_| range.length > 0)
                        .ok_or_else(|| {
                            PlayerError::ManifestParse(format!(
                                "invalid byte range {}@{offset} of segment {index}",
                                range.length
                            ))
                        })?;
                    next_offset = Some((segment.uri.clone(), end));
                    Some(ByteRange::new(offset, Some(range.length)))
                }
                None => None,
            };

            segments.push(Segment {
                sequence: playlist.media_sequence + index as u64,
                start,
                duration,
                url: resolve_url(&self.playlist_url, &segment.uri)?,
                byte_range,
            });
            start += duration;
        }

        let period = Period {
            id: "main".into(),
            start: Duration::ZERO,
            duration: (!is_live).then_some(start),
            adaptation_sets: vec![AdaptationSet {
                id: "main".into(),
                kind: self.kind,
                representations: vec![Representation {
                    id: "main".into(),
                    bandwidth: self.bandwidth,
                    segments: SegmentList::new(segments, is_live),
                }],
            }],
        };

        Ok(Manifest {
            periods: vec![period],
            is_live,
            min_update_period: is_live.then(|| {
                Duration::try_from_secs_f64(playlist.target_duration as f64).unwrap_or_default()
            }),
            duration: (!is_live).then_some(start),
        })
    }
}
