use std::time::{Duration, Instant};

use bytes::Bytes;
use iori_player::{
    connection::{Chunk, Completion, RequestHandle, RequestPurpose},
    model::TrackKind,
    stream::StreamStatus,
    ControlQuery, ControlResult, DemuxStatus, PlayerError, PlayerOptions, PlaylistManager, Tick,
};

use crate::{
    fake::{adaptation_set, period, representation, vod, FakeNetwork, ModelParser, RecordingSink},
    run_to_end,
};

fn manager(
    manifest: iori_player::model::Manifest,
    options: PlayerOptions,
) -> (PlaylistManager, FakeNetwork, RecordingSink) {
    let network = FakeNetwork::new();
    let sink = RecordingSink::default();
    let manager = PlaylistManager::builder().options(options).build(
        "",
        ModelParser::new(manifest),
        network.clone(),
        sink.clone(),
    );
    (manager, network, sink)
}

fn two_periods() -> iori_player::model::Manifest {
    vod(vec![
        period(
            "p0",
            0,
            8,
            vec![adaptation_set(
                "video",
                TrackKind::Video,
                vec![representation("a", 800_000, 2, 4)],
            )],
        ),
        period(
            "p1",
            8,
            8,
            vec![adaptation_set(
                "video",
                TrackKind::Video,
                vec![representation("b", 800_000, 2, 4)],
            )],
        ),
    ])
}

#[test]
fn test_rate_based_switches_up_after_sustained_rate() -> anyhow::Result<()> {
    let manifest = vod(vec![period(
        "p0",
        0,
        20,
        vec![adaptation_set(
            "video",
            TrackKind::Video,
            vec![
                representation("v500", 500_000, 5, 4),
                representation("v2000", 2_000_000, 5, 4),
            ],
        )],
    )]);
    let (mut manager, network, sink) =
        manager(manifest, PlayerOptions::default().estimator_alpha(1.0));
    network.set_rate(300_000);

    let now = Instant::now();
    manager.start(now)?;
    let tick = Tick::new(now, Duration::ZERO);
    assert_eq!(manager.demux(tick, false), DemuxStatus::MoreData);
    assert_eq!(manager.demux(tick, false), DemuxStatus::MoreData);
    let rate = manager.streams().unwrap().streams()[0].download_rate().unwrap();
    assert!(rate.abs_diff(300_000) < 1_000);

    network.set_rate(3_000_000);
    assert_eq!(run_to_end(&mut manager, now, Duration::ZERO), DemuxStatus::Eof);

    assert_eq!(
        network.segment_urls(),
        [
            "https://cdn.test/v500/0.m4s",
            "https://cdn.test/v500/1.m4s",
            "https://cdn.test/v500/2.m4s",
            "https://cdn.test/v2000/3.m4s",
            "https://cdn.test/v2000/4.m4s",
        ]
    );
    assert_eq!(sink.blocks().len(), 5);
    assert_eq!(manager.clock(), Duration::from_secs(20));
    Ok(())
}

#[test]
fn test_optional_track_failure_disables_it() -> anyhow::Result<()> {
    let manifest = vod(vec![period(
        "p0",
        0,
        24,
        vec![
            adaptation_set("video", TrackKind::Video, vec![representation("v", 800_000, 6, 4)]),
            adaptation_set("subs", TrackKind::Subtitle, vec![representation("s", 1_000, 6, 4)]),
        ],
    )]);
    let (mut manager, network, sink) = manager(manifest, PlayerOptions::default());
    network.fail("/s/", u32::MAX, 503);

    let now = Instant::now();
    manager.start(now)?;
    let tick = Tick::new(now, Duration::ZERO);
    for _ in 0..4 {
        assert_eq!(manager.demux(tick, false), DemuxStatus::MoreData);
    }

    let streams = manager.streams().unwrap();
    let subs = streams
        .streams()
        .iter()
        .find(|s| s.kind() == TrackKind::Subtitle)
        .unwrap();
    assert_eq!(subs.status(), StreamStatus::Error);
    assert!(matches!(
        manager.last_error(),
        Some(PlayerError::SegmentFetch { .. })
    ));

    assert_eq!(run_to_end(&mut manager, now, Duration::ZERO), DemuxStatus::Eof);
    assert_eq!(sink.track("video").len(), 6);
    assert!(sink.track("subs").is_empty());
    // three attempts on the first subtitle segment, nothing after it
    let subtitle_requests = network
        .segment_urls()
        .into_iter()
        .filter(|url| url.contains("/s/"))
        .count();
    assert_eq!(subtitle_requests, 3);
    Ok(())
}

#[test]
fn test_mandatory_track_failure_stops_playback() -> anyhow::Result<()> {
    let manifest = vod(vec![period(
        "p0",
        0,
        24,
        vec![
            adaptation_set("video", TrackKind::Video, vec![representation("v", 800_000, 6, 4)]),
            adaptation_set("audio", TrackKind::Audio, vec![representation("a", 128_000, 6, 4)]),
        ],
    )]);
    let (mut manager, network, _sink) = manager(manifest, PlayerOptions::default());
    network.fail("/v/", u32::MAX, 503);

    let now = Instant::now();
    manager.start(now)?;
    assert_eq!(run_to_end(&mut manager, now, Duration::ZERO), DemuxStatus::Error);
    assert!(matches!(
        manager.last_error(),
        Some(PlayerError::SegmentFetch { .. })
    ));

    // the outcome is sticky
    let tick = Tick::new(now, Duration::ZERO);
    assert_eq!(manager.demux(tick, false), DemuxStatus::Error);
    Ok(())
}

#[test]
fn test_not_found_fails_without_retry() -> anyhow::Result<()> {
    let manifest = vod(vec![period(
        "p0",
        0,
        8,
        vec![adaptation_set("video", TrackKind::Video, vec![representation("v", 800_000, 2, 4)])],
    )]);
    let (mut manager, network, _sink) = manager(manifest, PlayerOptions::default());
    network.fail("/v/0.m4s", 1, 404);

    let now = Instant::now();
    manager.start(now)?;
    assert_eq!(run_to_end(&mut manager, now, Duration::ZERO), DemuxStatus::Error);
    assert_eq!(network.segment_urls().len(), 1);
    Ok(())
}

#[test]
fn test_seek_uses_time_index() -> anyhow::Result<()> {
    let manifest = vod(vec![period(
        "p0",
        0,
        40,
        vec![adaptation_set("video", TrackKind::Video, vec![representation("v", 800_000, 10, 4)])],
    )]);
    let (mut manager, network, sink) = manager(manifest, PlayerOptions::default());

    let now = Instant::now();
    manager.start(now)?;
    assert_eq!(
        manager.control(ControlQuery::Seek(Duration::from_secs(29)))?,
        ControlResult::Seek(true)
    );

    let tick = Tick::new(now, Duration::from_secs(29));
    assert_eq!(manager.demux(tick, false), DemuxStatus::MoreData);
    assert_eq!(network.segment_urls(), ["https://cdn.test/v/7.m4s"]);

    manager.demux(tick, false);
    let blocks = sink.blocks();
    assert_eq!(blocks[0].sequence, 7);
    assert_eq!(blocks[0].pts, Duration::from_secs(28));
    assert!(blocks[0].discontinuity);
    assert_eq!(
        manager.control(ControlQuery::Position)?,
        ControlResult::Position(Duration::from_secs(32))
    );
    Ok(())
}

#[test]
fn test_period_transition_flags_discontinuity() -> anyhow::Result<()> {
    let (mut manager, _network, sink) = manager(two_periods(), PlayerOptions::default());

    let now = Instant::now();
    manager.start(now)?;

    let mut clock = Duration::ZERO;
    let tick = Tick::new(now, Duration::ZERO);
    let status = loop {
        let status = manager.demux(tick, false);
        assert!(manager.clock() >= clock, "clock went backwards");
        clock = manager.clock();
        if status != DemuxStatus::MoreData {
            break status;
        }
    };
    assert_eq!(status, DemuxStatus::Eof);
    assert_eq!(clock, Duration::from_secs(16));

    let blocks = sink.track("video");
    let pts: Vec<_> = blocks.iter().map(|b| b.pts.as_secs()).collect();
    assert_eq!(pts, [0, 4, 8, 12]);
    let flags: Vec<_> = blocks.iter().map(|b| b.discontinuity).collect();
    assert_eq!(flags, [false, false, true, false]);
    Ok(())
}

#[test]
fn test_out_of_order_completions_keep_track_order() -> anyhow::Result<()> {
    let manifest = vod(vec![period(
        "p0",
        0,
        16,
        vec![
            adaptation_set("video", TrackKind::Video, vec![representation("v", 800_000, 4, 4)]),
            adaptation_set("audio", TrackKind::Audio, vec![representation("a", 128_000, 4, 4)]),
        ],
    )]);
    let (mut manager, network, sink) = manager(manifest, PlayerOptions::default());
    network.hold_segments(true);

    let now = Instant::now();
    manager.start(now)?;
    let tick = Tick::new(now, Duration::ZERO);
    assert_eq!(manager.demux(tick, false), DemuxStatus::MoreData);
    assert_eq!(network.held(), 2);

    // unknown to every stream
    network.inject(Completion {
        handle: RequestHandle::new(999),
        purpose: RequestPurpose::Segment {
            track: "video".into(),
            sequence: 3,
            epoch: 1,
        },
        result: Ok(Chunk {
            data: Bytes::from_static(b"bogus"),
            elapsed: Duration::from_millis(1),
        }),
    });

    let mut status = DemuxStatus::MoreData;
    for _ in 0..32 {
        network.release_reversed();
        status = manager.demux(tick, false);
        if status != DemuxStatus::MoreData {
            break;
        }
    }
    assert_eq!(status, DemuxStatus::Eof);

    for track in ["video", "audio"] {
        let blocks = sink.track(track);
        let sequences: Vec<_> = blocks.iter().map(|b| b.sequence).collect();
        assert_eq!(sequences, [0, 1, 2, 3]);
        assert!(blocks.windows(2).all(|w| w[0].pts < w[1].pts));
    }
    Ok(())
}

#[test]
fn test_completion_of_previous_epoch_is_dropped() -> anyhow::Result<()> {
    let (mut manager, network, sink) = manager(two_periods(), PlayerOptions::default());
    network.hold_segments(true);

    let now = Instant::now();
    manager.start(now)?;
    manager.demux(Tick::new(now, Duration::ZERO), false);
    assert_eq!(network.held(), 1);

    manager.control(ControlQuery::Seek(Duration::from_secs(9)))?;
    let cancelled = network.cancelled();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(network.held(), 0);
    assert!(!manager.streams().unwrap().has_pending());

    // a late answer for the torn down period
    network.inject(Completion {
        handle: cancelled[0],
        purpose: RequestPurpose::Segment {
            track: "video".into(),
            sequence: 0,
            epoch: 1,
        },
        result: Ok(Chunk {
            data: Bytes::from_static(b"late"),
            elapsed: Duration::from_millis(1),
        }),
    });

    network.hold_segments(false);
    let status = run_to_end(&mut manager, now, Duration::from_secs(9));
    assert_eq!(status, DemuxStatus::Eof);

    let pts: Vec<_> = sink.blocks().iter().map(|b| b.pts.as_secs()).collect();
    assert_eq!(pts, [8, 12]);
    assert!(sink.blocks()[0].discontinuity);
    Ok(())
}

#[test]
fn test_buffer_target_limits_fetching() -> anyhow::Result<()> {
    let manifest = vod(vec![period(
        "p0",
        0,
        40,
        vec![adaptation_set("video", TrackKind::Video, vec![representation("v", 800_000, 10, 4)])],
    )]);
    let (mut manager, network, _sink) =
        manager(manifest, PlayerOptions::default().target_buffer(8.0));

    let now = Instant::now();
    manager.start(now)?;
    let tick = Tick::new(now, Duration::ZERO);
    for _ in 0..8 {
        assert_eq!(manager.demux(tick, false), DemuxStatus::MoreData);
    }
    assert_eq!(network.segment_urls().len(), 2);
    assert_eq!(
        manager.streams().unwrap().buffered(Duration::ZERO),
        Duration::from_secs(8)
    );

    // one more segment despite the full buffer
    manager.demux(tick, true);
    assert_eq!(network.segment_urls().len(), 3);
    Ok(())
}

#[test]
fn test_control_queries() -> anyhow::Result<()> {
    let (mut manager, network, _sink) = manager(two_periods(), PlayerOptions::default());
    assert!(matches!(
        manager.control(ControlQuery::CanSeek),
        Err(PlayerError::NotStarted)
    ));
    assert_eq!(
        manager.demux(Tick::new(Instant::now(), Duration::ZERO), false),
        DemuxStatus::Error
    );
    assert!(matches!(manager.last_error(), Some(PlayerError::NotStarted)));

    manager.start(Instant::now())?;
    assert_eq!(manager.control(ControlQuery::CanSeek)?, ControlResult::CanSeek(true));
    assert_eq!(manager.control(ControlQuery::CanPause)?, ControlResult::CanPause(true));
    assert_eq!(
        manager.control(ControlQuery::Duration)?,
        ControlResult::Duration(Some(Duration::from_secs(16)))
    );
    assert_eq!(
        manager.control(ControlQuery::Size)?,
        ControlResult::Size(Some(1_600_000))
    );

    network.hold_segments(true);
    manager.demux(Tick::new(Instant::now(), Duration::ZERO), false);
    manager.stop();
    assert_eq!(network.cancelled().len(), 1);
    assert_eq!(
        manager.demux(Tick::new(Instant::now(), Duration::ZERO), false),
        DemuxStatus::Eof
    );
    assert_eq!(manager.control(ControlQuery::CanSeek)?, ControlResult::CanSeek(false));
    Ok(())
}
