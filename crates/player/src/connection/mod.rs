//! Transport boundary of the playback core.
//!
//! Requests are submitted without blocking and their results are collected
//! later with [`ConnectionManager::poll`], once per orchestrator tick.

mod http;

pub use http::HttpConnectionManager;

use std::{fmt, time::Duration};

use bytes::Bytes;
use url::Url;

use crate::{
    error::PlayerResult,
    model::{AdaptationSetId, ByteRange},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a request was issued for, echoed back with its completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPurpose {
    Manifest,
    Segment {
        track: AdaptationSetId,
        sequence: u64,
        /// Activation generation of the stream set that issued the request.
        epoch: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub purpose: RequestPurpose,
}

impl ChunkRequest {
    pub fn manifest(url: Url) -> Self {
        Self {
            url,
            byte_range: None,
            purpose: RequestPurpose::Manifest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    /// Wall time spent downloading `data`.
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct Completion {
    pub handle: RequestHandle,
    pub purpose: RequestPurpose,
    pub result: PlayerResult<Chunk>,
}

pub trait ConnectionManager: Send {
    /// Schedules a download and returns immediately.
    fn submit(&mut self, request: ChunkRequest) -> RequestHandle;

    /// Abandons a request. Its completion, if any, is never returned by `poll`.
    fn cancel(&mut self, handle: RequestHandle);

    /// Returns a finished request without waiting.
    fn poll(&mut self) -> Option<Completion>;
}
