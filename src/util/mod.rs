//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL handling**: scheme normalization of feed addresses and relative
//!   link resolution
//! - **Text processing**: Unicode-aware string width calculation, truncation
//!   and control-character stripping
//! - **HTML scanning**: first image, icon links, plain-text rendering
//!
//! # Examples
//!
//! ```
//! use newsroll::util::{display_width, normalize_feed_url, truncate_to_width};
//!
//! let url = normalize_feed_url("example.com/feed.xml").unwrap();
//! assert_eq!(url.scheme(), "https");
//!
//! // Calculate display width for proper terminal rendering
//! assert_eq!(display_width("Hello 世界"), 10);
//!
//! // Truncate to fit terminal width
//! let truncated = truncate_to_width("Long article title", 15);
//! assert_eq!(display_width(&truncated), 15);
//! ```

mod html;
mod text;
mod url;

pub use html::{first_image_src, html_to_text, icon_links};
pub use text::{display_width, strip_control_chars, truncate_to_width};
pub use self::url::{normalize_feed_url, resolve_url, UrlError};
