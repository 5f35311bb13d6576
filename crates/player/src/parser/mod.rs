//! Adapters from manifest documents to the [`Manifest`] model.

mod dash;
mod hls;
mod template;

pub use dash::DashParser;
pub use hls::HlsMediaParser;

use url::Url;

use crate::{
    error::{PlayerError, PlayerResult},
    model::{ByteRange, Manifest},
};

/// Turns a downloaded document into a manifest snapshot.
///
/// Successive parses of one live source must keep segment sequence numbers
/// stable.
pub trait ManifestParser: Send {
    fn parse(&self, document: &[u8]) -> PlayerResult<Manifest>;
}

fn is_absolute_url(s: &str) -> bool {
    ["http://", "https://", "file://", "ftp://"]
        .iter()
        .any(|scheme| s.starts_with(scheme))
}

/// Resolves `reference` against `base`, carrying the query of `base` over
/// when `reference` has none.
fn resolve_url(base: &Url, reference: &str) -> PlayerResult<Url> {
    if is_absolute_url(reference) {
        return Ok(Url::parse(reference)?);
    }

    let mut resolved = base.join(reference)?;
    if resolved.query().is_none() {
        resolved.set_query(base.query());
    }
    Ok(resolved)
}

/// Parses an RFC 7233 `first-last` byte range, `last` being optional.
fn parse_byte_range(s: &str) -> PlayerResult<ByteRange> {
    let invalid = || PlayerError::ManifestParse(format!("invalid byte range {s:?}"));

    let (first, last) = s.split_once('-').ok_or_else(invalid)?;
    let first: u64 = first.trim().parse().map_err(|_| invalid())?;
    let length = match last.trim() {
        "" => None,
        last => {
            let last: u64 = last.parse().map_err(|_| invalid())?;
            let span = last.checked_sub(first).and_then(|span| span.checked_add(1));
            Some(span.ok_or_else(invalid)?)
        }
    };
    Ok(ByteRange::new(first, length))
}

fn utf8(document: &[u8]) -> PlayerResult<&str> {
    std::str::from_utf8(document)
        .map_err(|e| PlayerError::ManifestParse(format!("document is not UTF-8: {e}")))
}
