//! Feed retrieval and decoding: RSS/Atom bytes in, [`FeedDocument`] out.
//!
//! - `fetcher` - one GET through the injected [`Network`](crate::net::Network)
//! - `parser` - format detection and parsing with the `feed-rs` crate
//! - `adapter` - per-format [`FeedView`] readers producing the canonical document
//!
//! # Example
//!
//! ```ignore
//! use newsroll::feed::{fetch, parse};
//!
//! let bytes = fetch(&network, &url).await?;
//! let document = parse(&bytes)?.document(url.as_str());
//! ```

mod adapter;
mod fetcher;
mod parser;

pub use adapter::{ArticleView, AtomFeed, FeedDocument, FeedView, RssChannel};
pub use fetcher::{fetch, FetchError};
pub use parser::{parse, ParseError, ParsedFeed};
