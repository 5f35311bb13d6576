use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    error::{PlayerError, PlayerResult},
    model::{AdaptationSetId, TrackKind},
};

/// One downloaded segment handed to the demuxer pipeline.
#[derive(Debug, Clone)]
pub struct Block {
    pub track: AdaptationSetId,
    pub kind: TrackKind,
    pub sequence: u64,
    /// Presentation timestamp of the first sample.
    pub pts: Duration,
    pub duration: Duration,
    pub data: Bytes,
    /// Timestamp continuity with the previous block of this track is broken.
    pub discontinuity: bool,
}

impl Block {
    pub fn end(&self) -> Duration {
        self.pts + self.duration
    }
}

/// Downstream consumer of blocks.
///
/// Blocks of one track arrive in sequence order. Returning an error marks the
/// track as failed.
pub trait DemuxSink: Send {
    fn push(&mut self, block: Block) -> PlayerResult<()>;
}

impl DemuxSink for mpsc::UnboundedSender<Block> {
    fn push(&mut self, block: Block) -> PlayerResult<()> {
        self.send(block)
            .map_err(|e| PlayerError::DemuxRejected(format!("pipeline closed at {}", e.0.sequence)))
    }
}
