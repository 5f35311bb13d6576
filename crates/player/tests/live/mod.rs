use std::time::{Duration, Instant};

use iori_player::{
    parser::{DashParser, HlsMediaParser},
    stream::StreamStatus,
    ControlQuery, ControlResult, DemuxStatus, PlayerError, PlayerOptions, PlaylistManager, Tick,
};
use url::Url;

use crate::{
    fake::{FakeNetwork, RecordingSink},
    run_to_end,
};

const PLAYLIST_URL: &str = "https://live.test/index.m3u8";
const MPD_URL: &str = "https://live.test/live.mpd";

/// An 8s opening period followed by the running programme.
const TWO_PERIOD_MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="2024-01-01T00:00:00Z" minimumUpdatePeriod="PT4S">
  <Period id="p0" start="PT0S" duration="PT8S">
    <AdaptationSet id="video" contentType="video">
      <SegmentTemplate media="p0-$Number$.m4s" timescale="1000" startNumber="1">
        <SegmentTimeline>
          <S t="0" d="4000" r="1"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v" bandwidth="800000"/>
    </AdaptationSet>
  </Period>
  <Period id="p1" start="PT8S">
    <AdaptationSet id="video" contentType="video">
      <SegmentTemplate media="p1-$Number$.m4s" timescale="1000" startNumber="1">
        <SegmentTimeline>
          <S t="0" d="4000" r="1"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v" bandwidth="800000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

fn playlist(first: u64, count: u64) -> String {
    let mut playlist = format!(
        "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:{first}
"
    );
    for sequence in first..first + count {
        playlist.push_str(&format!("#EXTINF:4.0,\nseg{sequence}.ts\n"));
    }
    playlist
}

fn live(
    document: String,
    options: PlayerOptions,
) -> anyhow::Result<(PlaylistManager, FakeNetwork, RecordingSink)> {
    let url = Url::parse(PLAYLIST_URL)?;
    let network = FakeNetwork::new();
    let sink = RecordingSink::default();
    let manager = PlaylistManager::builder()
        .options(options)
        .manifest_url(url.clone())
        .build(document, HlsMediaParser::new(url), network.clone(), sink.clone());
    Ok((manager, network, sink))
}

fn at(origin: Instant, secs: u64) -> Tick {
    Tick::new(origin + Duration::from_secs(secs), Duration::ZERO)
}

#[test]
fn test_pruned_window_resynchronizes() -> anyhow::Result<()> {
    let (mut manager, network, sink) = live(playlist(1, 5), PlayerOptions::default())?;
    network.hold_segments(true);
    network.push_manifest(&playlist(3, 5));

    let t0 = Instant::now();
    manager.start(t0)?;
    assert_eq!(manager.next_update(), Some(t0 + Duration::from_secs(4)));

    assert_eq!(manager.demux(at(t0, 0), false), DemuxStatus::MoreData);
    assert_eq!(network.segment_urls(), ["https://live.test/seg1.ts"]);

    // refresh is due: request it, then apply it on the next tick
    assert_eq!(manager.demux(at(t0, 4), false), DemuxStatus::MoreData);
    assert_eq!(network.manifest_requests(), 1);
    assert_eq!(manager.demux(at(t0, 4), false), DemuxStatus::MoreData);

    let stream = &manager.streams().unwrap().streams()[0];
    assert_eq!(stream.next_sequence(), Some(3));
    assert_eq!(network.cancelled().len(), 1);
    assert_eq!(
        network.segment_urls(),
        ["https://live.test/seg1.ts", "https://live.test/seg3.ts"]
    );

    network.release_reversed();
    manager.demux(at(t0, 4), false);
    let blocks = sink.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].sequence, 3);
    assert_eq!(blocks[0].pts, Duration::from_secs(8));
    assert!(blocks[0].discontinuity);
    Ok(())
}

#[test]
fn test_unchanged_refresh_is_idempotent() -> anyhow::Result<()> {
    let (mut manager, network, _sink) = live(playlist(1, 5), PlayerOptions::default())?;
    network.hold_segments(true);

    let t0 = Instant::now();
    manager.start(t0)?;
    manager.demux(at(t0, 0), false);

    let report = manager.apply_document(playlist(1, 5).as_bytes())?;
    assert!(report.is_unchanged());
    let before = manager.manifest().clone();

    manager.demux(at(t0, 0), false);
    assert_eq!(manager.manifest().as_ref(), before.as_ref());
    assert!(network.cancelled().is_empty());
    let stream = &manager.streams().unwrap().streams()[0];
    assert_eq!(stream.next_sequence(), Some(1));
    assert_eq!(network.segment_urls().len(), 1);
    Ok(())
}

#[test]
fn test_failed_refresh_backs_off() -> anyhow::Result<()> {
    let options = PlayerOptions::default().max_refresh_backoff(10.0);
    let (mut manager, network, _sink) = live(playlist(1, 5), options)?;
    network.fail("index.m3u8", 2, 500);
    network.push_manifest(&playlist(2, 5));

    let t0 = Instant::now();
    manager.start(t0)?;

    manager.demux(at(t0, 4), false);
    assert_eq!(manager.next_update(), None);
    manager.demux(at(t0, 4), false);
    assert_eq!(manager.next_update(), Some(t0 + Duration::from_secs(12)));
    assert!(matches!(
        manager.last_error(),
        Some(PlayerError::ManifestFetch(_))
    ));

    // not due yet
    assert!(!manager.needs_update(t0 + Duration::from_secs(11)));
    manager.demux(at(t0, 11), false);
    assert_eq!(network.manifest_requests(), 1);

    manager.demux(at(t0, 12), false);
    manager.demux(at(t0, 12), false);
    assert_eq!(manager.next_update(), Some(t0 + Duration::from_secs(22)));

    manager.demux(at(t0, 22), false);
    assert_eq!(manager.demux(at(t0, 22), false), DemuxStatus::MoreData);
    assert_eq!(manager.next_update(), Some(t0 + Duration::from_secs(26)));
    assert_eq!(network.manifest_requests(), 3);
    Ok(())
}

#[test]
fn test_end_list_finishes_live_presentation() -> anyhow::Result<()> {
    let (mut manager, network, sink) = live(playlist(1, 2), PlayerOptions::default())?;
    network.push_manifest(&(playlist(1, 3) + "#EXT-X-ENDLIST\n"));

    let t0 = Instant::now();
    manager.start(t0)?;
    assert_eq!(manager.control(ControlQuery::CanSeek)?, ControlResult::CanSeek(false));
    assert_eq!(
        manager.control(ControlQuery::Seek(Duration::from_secs(4)))?,
        ControlResult::Seek(false)
    );
    assert_eq!(
        manager.control(ControlQuery::Duration)?,
        ControlResult::Duration(None)
    );

    // the live edge is reached and the stream waits
    for _ in 0..4 {
        assert_eq!(manager.demux(at(t0, 0), false), DemuxStatus::MoreData);
    }
    assert_eq!(sink.blocks().len(), 2);

    assert_eq!(run_to_end(&mut manager, t0 + Duration::from_secs(4), Duration::ZERO), DemuxStatus::Eof);
    assert_eq!(sink.blocks().len(), 3);
    assert_eq!(manager.next_update(), None);
    Ok(())
}

#[test]
fn test_failed_track_is_reactivated_once() -> anyhow::Result<()> {
    let (mut manager, network, sink) = live(playlist(1, 5), PlayerOptions::default())?;
    network.fail("seg1.ts", 3, 503);
    network.push_manifest(&playlist(1, 6));

    let t0 = Instant::now();
    manager.start(t0)?;
    for _ in 0..4 {
        assert_eq!(manager.demux(at(t0, 0), false), DemuxStatus::MoreData);
    }
    let stream = &manager.streams().unwrap().streams()[0];
    assert_eq!(stream.status(), StreamStatus::Error);
    assert!(sink.blocks().is_empty());

    manager.demux(at(t0, 4), false);
    manager.demux(at(t0, 4), false);
    manager.demux(at(t0, 4), false);
    let stream = &manager.streams().unwrap().streams()[0];
    assert_eq!(stream.status(), StreamStatus::Buffering);
    assert_eq!(sink.blocks()[0].sequence, 1);
    Ok(())
}

#[test]
fn test_second_failure_after_reactivation_is_final() -> anyhow::Result<()> {
    let (mut manager, network, _sink) = live(playlist(1, 5), PlayerOptions::default())?;
    network.fail("seg1.ts", u32::MAX, 503);
    network.push_manifest(&playlist(1, 6));

    let t0 = Instant::now();
    manager.start(t0)?;
    for _ in 0..4 {
        assert_eq!(manager.demux(at(t0, 0), false), DemuxStatus::MoreData);
    }

    assert_eq!(
        run_to_end(&mut manager, t0 + Duration::from_secs(4), Duration::ZERO),
        DemuxStatus::Error
    );
    assert!(matches!(
        manager.last_error(),
        Some(PlayerError::SegmentFetch { .. })
    ));
    Ok(())
}

#[test]
fn test_live_period_transition() -> anyhow::Result<()> {
    let url = Url::parse(MPD_URL)?;
    let network = FakeNetwork::new();
    network.push_manifest(TWO_PERIOD_MPD);
    let sink = RecordingSink::default();
    let mut manager = PlaylistManager::builder().manifest_url(url.clone()).build(
        TWO_PERIOD_MPD,
        DashParser::new(url),
        network.clone(),
        sink.clone(),
    );

    let t0 = Instant::now();
    manager.start(t0)?;
    for secs in 0..20 {
        assert_eq!(manager.demux(at(t0, secs), false), DemuxStatus::MoreData);
    }

    assert_eq!(
        network.segment_urls(),
        [
            "https://live.test/p0-1.m4s",
            "https://live.test/p0-2.m4s",
            "https://live.test/p1-1.m4s",
            "https://live.test/p1-2.m4s",
        ]
    );
    assert!(network.manifest_requests() > 0);
    assert_eq!(manager.streams().unwrap().period().as_str(), "p1");

    let blocks = sink.blocks();
    assert_eq!(blocks.len(), 4);
    assert_eq!(blocks[2].pts, Duration::from_secs(8));
    assert!(blocks[2].discontinuity);
    assert!(!blocks[3].discontinuity);
    assert_eq!(manager.clock(), Duration::from_secs(16));
    Ok(())
}

#[test]
fn test_unreachable_manifest_ends_after_known_segments() -> anyhow::Result<()> {
    let options = PlayerOptions::default()
        .max_refresh_failures(3)
        .max_refresh_backoff(10.0);
    let (mut manager, network, sink) = live(playlist(1, 2), options)?;
    network.fail("index.m3u8", u32::MAX, 500);

    let t0 = Instant::now();
    manager.start(t0)?;
    let mut ended = None;
    for secs in 0..600 {
        if manager.demux(at(t0, secs), false) == DemuxStatus::Eof {
            ended = Some(secs);
            break;
        }
    }

    // refreshes at 4s, 13s and 24s, the third failure is reported at 25s
    assert_eq!(ended, Some(25));
    assert_eq!(network.manifest_requests(), 3);
    assert_eq!(sink.blocks().len(), 2);
    assert!(matches!(
        manager.last_error(),
        Some(PlayerError::ManifestFetch(_))
    ));
    assert_eq!(manager.demux(at(t0, 30), false), DemuxStatus::Eof);
    Ok(())
}

#[test]
fn test_refresh_recovers_before_segments_run_out() -> anyhow::Result<()> {
    let options = PlayerOptions::default()
        .max_refresh_failures(1)
        .target_buffer(4.0);
    let (mut manager, network, sink) = live(playlist(1, 3), options)?;
    network.fail("index.m3u8", 1, 500);
    network.push_manifest(&playlist(1, 4));

    let t0 = Instant::now();
    manager.start(t0)?;
    // one segment ahead of the position at a time
    manager.demux(at(t0, 0), false);
    manager.demux(at(t0, 1), false);
    assert_eq!(sink.blocks().len(), 1);

    let is_open = |manager: &PlaylistManager| {
        manager.manifest().periods[0].adaptation_sets[0].representations[0]
            .segments
            .is_open_ended()
    };

    // the failed refresh closes the window, the next one opens it again
    for secs in 4..=6 {
        assert_eq!(manager.demux(at(t0, secs), false), DemuxStatus::MoreData);
    }
    assert_eq!(network.manifest_requests(), 1);
    assert!(!is_open(&manager));
    for secs in 13..=14 {
        assert_eq!(manager.demux(at(t0, secs), false), DemuxStatus::MoreData);
    }
    assert_eq!(network.manifest_requests(), 2);
    assert!(is_open(&manager));

    let tick = |secs| Tick::new(t0 + Duration::from_secs(secs), Duration::from_secs(16));
    for secs in 15..20 {
        assert_eq!(manager.demux(tick(secs), false), DemuxStatus::MoreData);
    }
    assert_eq!(sink.blocks().len(), 4);
    let stream = &manager.streams().unwrap().streams()[0];
    assert_eq!(stream.status(), StreamStatus::Buffering);
    assert_eq!(stream.next_sequence(), Some(5));
    Ok(())
}
