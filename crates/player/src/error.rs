use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Manifest fetch error: {0}")]
    ManifestFetch(String),

    #[error("Invalid manifest: {0}")]
    ManifestParse(String),

    #[error("Failed to fetch segment {url}: {reason}")]
    SegmentFetch { url: String, reason: String },

    #[error("Representation unavailable: {0}")]
    RepresentationUnavailable(String),

    #[error("Demuxer rejected block: {0}")]
    DemuxRejected(String),

    #[error("Unresolvable discontinuity: {0}")]
    DiscontinuityUnresolvable(String),

    #[error("No period found in manifest")]
    NoPeriodFound,

    #[error("Player has not been started")]
    NotStarted,

    #[error("Request task ended without a result: {0}")]
    TaskFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl PlayerError {
    /// Whether a fetch may succeed when issued again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SegmentFetch { .. }
            | Self::ManifestFetch(_)
            | Self::RequestError(_)
            | Self::TaskFailed(_) => true,
            Self::HttpError(status) => status.is_server_error() || status.as_u16() == 429,
            _ => false,
        }
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;
