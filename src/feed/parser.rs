use feed_rs::model::{Feed, FeedType};
use thiserror::Error;

use super::adapter::{AtomFeed, RssChannel};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Errors from turning fetched bytes into a feed document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The bytes are not a readable RSS or Atom document
    #[error("Feed could not be parsed: {0}")]
    Malformed(String),
    /// A recognized feed format this engine does not read
    #[error("{0} feeds are not supported, try a different feed URL (RSS or Atom)")]
    UnsupportedFormat(&'static str),
}

/// A successfully parsed feed, tagged by source format.
#[derive(Debug, Clone)]
pub enum ParsedFeed {
    Rss(RssChannel),
    Atom(AtomFeed),
}

/// True when the first meaningful byte opens a JSON object.
fn looks_like_json(bytes: &[u8]) -> bool {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{')
}

/// Parse an RSS (0.9x, 1.0, 2.0) or Atom document.
///
/// JSON Feed documents are rejected with
/// [`ParseError::UnsupportedFormat`] rather than read as an empty feed.
pub fn parse(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    if looks_like_json(bytes) {
        return Err(ParseError::UnsupportedFormat("JSON"));
    }

    let feed: Feed =
        feed_rs::parser::parse(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;

    match feed.feed_type {
        FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2 => Ok(ParsedFeed::Rss(RssChannel(feed))),
        FeedType::Atom => Ok(ParsedFeed::Atom(AtomFeed(feed))),
        FeedType::JSON => Err(ParseError::UnsupportedFormat("JSON")),
    }
}
