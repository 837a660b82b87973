//! Reconciliation of freshly fetched articles against the stored item set.
//!
//! Two passes run on every refresh:
//!
//! 1. A novelty filter drops fetched articles whose URL is already stored.
//! 2. A dedup pass over stored plus new items keeps one canonical item per
//!    (url, date, normalized title) key. The canonical item is the oldest
//!    stored one, or the first new one when nothing is stored yet. If any
//!    member of a group was read, the canonical item ends up read.
//!
//! The dedup pass runs even when nothing new arrived, so duplicates left
//! behind by older versions of the store heal on the next refresh.
//!
//! Nothing here touches storage; the result is staged into a
//! [`Changeset`] by the caller.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::feed::ArticleView;
use crate::storage::{normalized_title, Changeset, Item, NewItem};

/// Item identity within a feed.
type DedupKey<'a> = (&'a str, Option<DateTime<Utc>>, &'a str);

/// What a reconciliation pass wants written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub to_insert: Vec<NewItem>,
    /// Stored duplicates to remove
    pub to_delete: Vec<i64>,
    /// Stored canonical items that inherit a read flag from a duplicate
    pub mark_read: Vec<i64>,
    /// Fetched articles dropped because they had no usable link
    pub skipped_missing_url: usize,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty() && self.mark_read.is_empty()
    }

    /// Stage the inserts, deletes and read propagation into `changes`.
    pub fn stage(self, changes: &mut Changeset) {
        changes
            .insert(self.to_insert)
            .delete(self.to_delete)
            .mark_read(self.mark_read);
    }
}

fn new_item(article: &ArticleView, url: &str) -> NewItem {
    NewItem {
        title: article.title.clone(),
        description: article.description.clone(),
        url: url.to_owned(),
        published: article.publication_date,
    }
}

enum Canonical {
    Stored { id: i64, read: bool },
    New,
}

struct Group {
    canonical: Canonical,
    any_read: bool,
}

/// Compute the writes that bring `existing` up to date with `fetched`.
///
/// `existing` may be in any order; stored items are ranked by id.
pub fn reconcile(existing: &[Item], fetched: &[ArticleView], feed_id: i64) -> Reconciliation {
    let known_urls: HashSet<&str> = existing.iter().map(|item| item.url.as_str()).collect();

    let mut skipped_missing_url = 0;
    let mut candidates = Vec::new();
    for article in fetched {
        match article.url.as_deref() {
            None => skipped_missing_url += 1,
            Some(url) if known_urls.contains(url) => {}
            Some(url) => candidates.push(new_item(article, url)),
        }
    }

    if skipped_missing_url > 0 {
        tracing::warn!(
            feed_id = feed_id,
            skipped = skipped_missing_url,
            "Articles without a link skipped"
        );
    }

    let mut stored: Vec<&Item> = existing.iter().collect();
    stored.sort_by_key(|item| item.id);

    // Insertion-ordered so the output is deterministic
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<DedupKey<'_>, usize> = HashMap::new();
    let mut to_delete = Vec::new();

    for item in stored {
        let key = (item.url.as_str(), item.published, item.normalized_title());
        match index.get(&key) {
            Some(&g) => {
                groups[g].any_read |= item.read;
                to_delete.push(item.id);
            }
            None => {
                index.insert(key, groups.len());
                groups.push(Group {
                    canonical: Canonical::Stored {
                        id: item.id,
                        read: item.read,
                    },
                    any_read: item.read,
                });
            }
        }
    }

    let mut keep = vec![false; candidates.len()];
    for (i, candidate) in candidates.iter().enumerate() {
        let key = (
            candidate.url.as_str(),
            candidate.published,
            normalized_title(candidate.title.as_deref()),
        );
        if !index.contains_key(&key) {
            index.insert(key, groups.len());
            groups.push(Group {
                canonical: Canonical::New,
                any_read: false,
            });
            keep[i] = true;
        }
    }
    drop(index);

    let mark_read = groups
        .iter()
        .filter_map(|group| match group.canonical {
            Canonical::Stored { id, read: false } if group.any_read => Some(id),
            _ => None,
        })
        .collect();

    let to_insert = candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect();

    Reconciliation {
        to_insert,
        to_delete,
        mark_read,
        skipped_missing_url,
    }
}
