use std::time::{Duration, Instant};

use iori_player::{
    adaptation::{AdaptationKind, HybridLogic},
    connection::HttpConnectionManager,
    demux::Block,
    parser::DashParser,
    DemuxStatus, PlayerOptions, PlaylistManager, Tick,
};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mpd_url = Url::parse("https://livesim.dashif.org/livesim2/testpic_2s/Manifest.mpd")?;
    let client = reqwest::Client::new();
    let document = client
        .get(mpd_url.clone())
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    let (sender, mut receiver) = mpsc::unbounded_channel::<Block>();
    tokio::spawn(async move {
        while let Some(block) = receiver.recv().await {
            tracing::info!(
                track = %block.track,
                sequence = block.sequence,
                pts = ?block.pts,
                bytes = block.data.len(),
                discontinuity = block.discontinuity,
                "block"
            );
        }
    });

    let options = PlayerOptions::default()
        .target_buffer(10.0)
        .adaptation(AdaptationKind::Hybrid(HybridLogic::default()));
    let mut manager = PlaylistManager::builder()
        .options(options)
        .manifest_url(mpd_url.clone())
        .build(
            document,
            DashParser::new(mpd_url),
            HttpConnectionManager::current(client),
            sender,
        );

    let started = Instant::now();
    manager.start(started)?;

    loop {
        let now = Instant::now();
        // pretend playback runs in real time, a few seconds behind the download
        let position = now.duration_since(started).saturating_sub(Duration::from_secs(4));
        match manager.demux(Tick::new(now, position), false) {
            DemuxStatus::MoreData => tokio::time::sleep(Duration::from_millis(50)).await,
            DemuxStatus::Eof => break,
            DemuxStatus::Error => {
                if let Some(e) = manager.last_error() {
                    anyhow::bail!("Playback failed: {e}");
                }
                anyhow::bail!("Playback failed");
            }
        }
        if started.elapsed() > Duration::from_secs(60) {
            manager.stop();
            break;
        }
    }

    tracing::info!(clock = ?manager.clock(), "done");
    Ok(())
}
