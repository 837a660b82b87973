//! Format-specific readers that turn a parsed feed into one canonical shape.
//!
//! RSS and Atom disagree on where a feed keeps its icon, which link is the
//! website and which date belongs to an entry. Each format gets its own
//! [`FeedView`] implementation; everything downstream only sees
//! [`FeedDocument`] and [`ArticleView`].

use chrono::{DateTime, SubsecRound, Utc};
use feed_rs::model::{Entry, Feed, Link, Text};

use super::parser::ParsedFeed;
use crate::storage::UNTITLED_FEED;
use crate::util::{resolve_url, strip_control_chars};

/// One article as declared by the feed, before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArticleView {
    pub title: Option<String>,
    /// HTML
    pub description: Option<String>,
    /// Whole seconds, matching what storage keeps
    pub publication_date: Option<DateTime<Utc>>,
    /// Absolute http(s) link, `None` when missing or unresolvable
    pub url: Option<String>,
}

/// The normalized form of a fetched feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub website_url: Option<String>,
    pub articles: Vec<ArticleView>,
}

/// Read access to the parts of a feed the engine cares about.
///
/// URLs are returned resolved against `base` (the feed's own URL).
pub trait FeedView {
    fn title(&self) -> Option<String>;
    fn description(&self) -> Option<String>;
    fn icon_url(&self, base: &str) -> Option<String>;
    fn website_url(&self, base: &str) -> Option<String>;
    fn articles(&self, base: &str) -> Vec<ArticleView>;
}

/// An RSS 0.9x/1.0/2.0 channel.
#[derive(Debug, Clone)]
pub struct RssChannel(pub(crate) Feed);

/// An Atom feed.
#[derive(Debug, Clone)]
pub struct AtomFeed(pub(crate) Feed);

fn clean_text(text: Option<&Text>) -> Option<String> {
    let text = text?;
    let cleaned = strip_control_chars(text.content.trim());
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.into_owned())
    }
}

fn clean_html(html: Option<&str>) -> Option<String> {
    let html = html?.trim();
    if html.is_empty() {
        None
    } else {
        Some(strip_control_chars(html).into_owned())
    }
}

/// Summary first, then the full content body.
fn entry_description(entry: &Entry) -> Option<String> {
    clean_html(entry.summary.as_ref().map(|s| s.content.as_str()))
        .or_else(|| clean_html(entry.content.as_ref().and_then(|c| c.body.as_deref())))
}

/// Atom treats a link without `rel` as `alternate`.
fn is_alternate(link: &Link) -> bool {
    link.rel.as_deref().map_or(true, |rel| rel.eq_ignore_ascii_case("alternate"))
}

fn is_html(link: &Link) -> bool {
    link.media_type
        .as_deref()
        .map_or(true, |t| t.eq_ignore_ascii_case("text/html"))
}

fn article(entry: &Entry, link: Option<&Link>, date: Option<DateTime<Utc>>, base: &str) -> ArticleView {
    ArticleView {
        title: clean_text(entry.title.as_ref()),
        description: entry_description(entry),
        publication_date: date.map(|d| d.trunc_subsecs(0)),
        url: link.and_then(|l| resolve_url(&l.href, base)),
    }
}

impl FeedView for RssChannel {
    fn title(&self) -> Option<String> {
        clean_text(self.0.title.as_ref())
    }

    fn description(&self) -> Option<String> {
        clean_text(self.0.description.as_ref())
    }

    /// The channel `<image>`.
    fn icon_url(&self, base: &str) -> Option<String> {
        self.0
            .logo
            .as_ref()
            .or(self.0.icon.as_ref())
            .and_then(|image| resolve_url(&image.uri, base))
    }

    fn website_url(&self, base: &str) -> Option<String> {
        self.0
            .links
            .iter()
            .find_map(|link| resolve_url(&link.href, base))
    }

    fn articles(&self, base: &str) -> Vec<ArticleView> {
        self.0
            .entries
            .iter()
            .map(|entry| {
                article(
                    entry,
                    entry.links.first(),
                    entry.published.or(entry.updated),
                    base,
                )
            })
            .collect()
    }
}

impl FeedView for AtomFeed {
    fn title(&self) -> Option<String> {
        clean_text(self.0.title.as_ref())
    }

    /// Atom's `<subtitle>`.
    fn description(&self) -> Option<String> {
        clean_text(self.0.description.as_ref())
    }

    fn icon_url(&self, base: &str) -> Option<String> {
        self.0
            .icon
            .as_ref()
            .or(self.0.logo.as_ref())
            .and_then(|image| resolve_url(&image.uri, base))
    }

    fn website_url(&self, base: &str) -> Option<String> {
        self.0
            .links
            .iter()
            .filter(|link| is_alternate(link) && is_html(link))
            .find_map(|link| resolve_url(&link.href, base))
    }

    fn articles(&self, base: &str) -> Vec<ArticleView> {
        self.0
            .entries
            .iter()
            .map(|entry| {
                let link = entry
                    .links
                    .iter()
                    .find(|l| is_alternate(l))
                    .or(entry.links.first());
                article(entry, link, entry.updated.or(entry.published), base)
            })
            .collect()
    }
}

impl ParsedFeed {
    fn view(&self) -> &dyn FeedView {
        match self {
            ParsedFeed::Rss(channel) => channel,
            ParsedFeed::Atom(feed) => feed,
        }
    }

    /// Normalize into a [`FeedDocument`], resolving links against `feed_url`.
    pub fn document(&self, feed_url: &str) -> FeedDocument {
        let view = self.view();
        FeedDocument {
            title: view.title().unwrap_or_else(|| UNTITLED_FEED.to_owned()),
            description: view.description(),
            icon_url: view.icon_url(feed_url),
            website_url: view.website_url(feed_url),
            articles: view.articles(feed_url),
        }
    }
}
