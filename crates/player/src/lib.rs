pub mod adaptation;
pub mod config;
pub mod connection;
pub mod demux;
pub mod error;
pub mod manager;
pub mod model;
pub mod parser;
pub mod stream;
pub mod stream_set;

pub use config::PlayerOptions;
pub use error::{PlayerError, PlayerResult};
pub use manager::{
    ControlQuery, ControlResult, DemuxStatus, PlaylistManager, PlaylistManagerBuilder, Tick,
};

/// ┌──────────────────────┐  refresh   ┌─────────────────────────┐
/// │                      ◄────────────┤                         │
/// │   Manifest snapshot  │            │     PlaylistManager     │
/// │     (Arc, merged)    ├────────────►   demux(tick) per tick  │
/// │                      │   period   │                         │
/// └──────────────────────┘            └────────────┬────────────┘
///                                                  │ epoch
///                                     ┌────────────▼────────────┐
///                                     │        StreamSet        │
///                                     └──┬──────────┬────────┬──┘
///                                        │          │        │
///                                   ┌────▼───┐ ┌────▼───┐ ┌──▼─────┐
///                        select ◄───┤ Stream │ │ Stream │ │ Stream │
///                    (Adaptation)   │ video  │ │ audio  │ │  subs  │
///                                   └─┬────▲─┘ └────────┘ └────────┘
///                              submit │    │ poll
///                                   ┌─▼────┴──────────────┐   Block   ┌───────────┐
///                                   │  ConnectionManager  ├───────────► DemuxSink │
///                                   └─────────────────────┘           └───────────┘
pub trait Player {
    fn demux(&mut self, tick: Tick, force_one_step: bool) -> DemuxStatus;

    fn control(&mut self, query: ControlQuery) -> PlayerResult<ControlResult>;
}

impl Player for PlaylistManager {
    fn demux(&mut self, tick: Tick, force_one_step: bool) -> DemuxStatus {
        PlaylistManager::demux(self, tick, force_one_step)
    }

    fn control(&mut self, query: ControlQuery) -> PlayerResult<ControlResult> {
        PlaylistManager::control(self, query)
    }
}
