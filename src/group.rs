//! Adaptive time bucketing of a feed's items for display.
//!
//! The bucket size follows the feed's cadence: the average gap between
//! publication dates picks day, month, year or a single all-time bucket so
//! that a busy feed is split by day and a quiet one is not scattered over
//! dozens of one-item sections.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::storage::Item;

const DAY_SECS: i64 = 24 * 60 * 60;
const MONTH_SECS: i64 = 30 * DAY_SECS;
const YEAR_SECS: i64 = 365 * DAY_SECS;

/// Granularity switches when fewer than three items per unit arrive on average.
const ITEMS_PER_UNIT: i64 = 3;

pub const ALL_ARTICLES: &str = "All articles";
pub const UNDATED: &str = "Undated";

/// How items are bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Month,
    Year,
    All,
}

impl Granularity {
    /// Pick the bucket size for an average gap between items.
    pub fn for_average_gap(avg_gap_secs: i64) -> Self {
        if avg_gap_secs <= DAY_SECS / ITEMS_PER_UNIT {
            Granularity::Day
        } else if avg_gap_secs <= MONTH_SECS / ITEMS_PER_UNIT {
            Granularity::Month
        } else if avg_gap_secs <= YEAR_SECS / ITEMS_PER_UNIT {
            Granularity::Year
        } else {
            Granularity::All
        }
    }
}

/// A titled section of items, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemGroup {
    pub title: String,
    /// Start of the bucket (or the newest item for the all-time bucket);
    /// `None` for the trailing undated group
    pub reference_date: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub items: Vec<Item>,
}

/// Average seconds between items: the dated span divided by the item count.
fn average_gap(dated: &[(DateTime<Utc>, Item)]) -> i64 {
    let (Some(earliest), Some(latest)) = (
        dated.iter().map(|(d, _)| *d).min(),
        dated.iter().map(|(d, _)| *d).max(),
    ) else {
        return 0;
    };
    (latest - earliest).num_seconds() / dated.len() as i64
}

/// Midnight of `date` in `tz`, falling back to UTC when the local midnight
/// does not exist (DST gaps).
fn start_of<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

fn bucket_start(granularity: Granularity, local: NaiveDate) -> NaiveDate {
    let (year, month, day) = match granularity {
        Granularity::Day => (local.year(), local.month(), local.day()),
        Granularity::Month => (local.year(), local.month(), 1),
        Granularity::Year | Granularity::All => (local.year(), 1, 1),
    };
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(local)
}

fn day_title(start: NaiveDate, today: NaiveDate) -> String {
    if start == today {
        "Today".to_owned()
    } else if today.pred_opt() == Some(start) {
        "Yesterday".to_owned()
    } else {
        start.format("%B %-d, %Y").to_string()
    }
}

fn sort_newest_first(items: &mut [Item]) {
    // Undated items sort last; ties fall back to newest row first
    items.sort_by(|a, b| b.published.cmp(&a.published).then(b.id.cmp(&a.id)));
}

/// Group `items` for display relative to `now`.
///
/// Bucket boundaries and the "Today"/"Yesterday" labels use `now`'s time
/// zone. Groups come back newest first, each sorted newest first, with
/// undated items collected into a final "Undated" group.
pub fn group_items<Tz: TimeZone>(items: Vec<Item>, now: &DateTime<Tz>) -> Vec<ItemGroup> {
    let tz = now.timezone();
    let today = now.date_naive();

    let (dated, undated): (Vec<_>, Vec<_>) = items.into_iter().partition(|i| i.published.is_some());
    let dated: Vec<(DateTime<Utc>, Item)> = dated
        .into_iter()
        .filter_map(|item| item.published.map(|d| (d, item)))
        .collect();

    let mut groups = Vec::new();

    if !dated.is_empty() {
        let granularity = Granularity::for_average_gap(average_gap(&dated));
        tracing::debug!(items = dated.len(), ?granularity, "Grouping items");

        if granularity == Granularity::All {
            let mut items: Vec<Item> = dated.into_iter().map(|(_, item)| item).collect();
            sort_newest_first(&mut items);
            let reference_date = items.first().and_then(|i| i.published);
            groups.push(ItemGroup {
                title: ALL_ARTICLES.to_owned(),
                reference_date,
                items,
            });
        } else {
            let mut buckets: BTreeMap<NaiveDate, Vec<Item>> = BTreeMap::new();
            for (date, item) in dated {
                let local = date.with_timezone(&tz).date_naive();
                buckets
                    .entry(bucket_start(granularity, local))
                    .or_default()
                    .push(item);
            }

            // BTreeMap iterates oldest first
            for (start, mut items) in buckets.into_iter().rev() {
                sort_newest_first(&mut items);
                let title = match granularity {
                    Granularity::Day => day_title(start, today),
                    Granularity::Month => start.format("%B %Y").to_string(),
                    _ => start.format("%Y").to_string(),
                };
                groups.push(ItemGroup {
                    title,
                    reference_date: Some(start_of(&tz, start)),
                    items,
                });
            }
        }
    }

    if !undated.is_empty() {
        let mut items = undated;
        sort_newest_first(&mut items);
        groups.push(ItemGroup {
            title: UNDATED.to_owned(),
            reference_date: None,
            items,
        });
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};
    use pretty_assertions::assert_eq;

    fn item(id: i64, title: &str, published: Option<DateTime<Utc>>) -> Item {
        Item {
            id,
            feed_id: 1,
            title: Some(title.to_owned()),
            description: None,
            url: format!("https://example.com/{id}"),
            published,
            read: false,
            fetched_at: Utc::now(),
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn titles(groups: &[ItemGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.title.as_str()).collect()
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(Granularity::for_average_gap(0), Granularity::Day);
        assert_eq!(Granularity::for_average_gap(DAY_SECS / 3), Granularity::Day);
        assert_eq!(Granularity::for_average_gap(DAY_SECS / 3 + 1), Granularity::Month);
        assert_eq!(Granularity::for_average_gap(MONTH_SECS / 3 + 1), Granularity::Year);
        assert_eq!(Granularity::for_average_gap(YEAR_SECS / 3 + 1), Granularity::All);
    }

    #[test]
    fn test_empty() {
        assert!(group_items(Vec::new(), &Utc::now()).is_empty());
    }

    #[test]
    fn test_hourly_items_bucket_by_day() {
        let start = at(2024, 3, 1, 0);
        let items: Vec<Item> = (0..72)
            .map(|h| item(h, "Post", Some(start + Duration::hours(h))))
            .collect();
        let now = at(2024, 3, 3, 23);

        let groups = group_items(items, &now);
        assert_eq!(titles(&groups), vec!["Today", "Yesterday", "March 1, 2024"]);
        assert!(groups.iter().all(|g| g.items.len() == 24));
        assert_eq!(groups[0].reference_date, Some(at(2024, 3, 3, 0)));
    }

    #[test]
    fn test_example_two_day_groups() {
        let items = vec![
            item(1, "A", Some(at(2024, 1, 1, 0))),
            item(2, "B", Some(at(2024, 1, 1, 0))),
            item(3, "C", Some(at(2024, 1, 2, 0))),
        ];
        let groups = group_items(items, &at(2024, 6, 1, 0));

        assert_eq!(titles(&groups), vec!["January 2, 2024", "January 1, 2024"]);
        assert_eq!(groups[0].items.len(), 1);
        assert_eq!(groups[0].items[0].normalized_title(), "C");
        let mut first_day: Vec<_> = groups[1].items.iter().map(|i| i.normalized_title()).collect();
        first_day.sort();
        assert_eq!(first_day, vec!["A", "B"]);
    }

    #[test]
    fn test_weekly_items_bucket_by_month() {
        let start = at(2024, 1, 1, 9);
        let items: Vec<Item> = (0..10)
            .map(|w| item(w, "Weekly", Some(start + Duration::weeks(w))))
            .collect();
        let groups = group_items(items, &at(2024, 6, 1, 0));
        assert_eq!(titles(&groups), vec!["March 2024", "February 2024", "January 2024"]);
    }

    #[test]
    fn test_sparse_items_bucket_by_year_or_all() {
        let start = at(2020, 1, 1, 0);
        let two: Vec<Item> = (0..2)
            .map(|i| item(i, "Rare", Some(start + Duration::days(200 * i))))
            .collect();
        let groups = group_items(two, &at(2024, 1, 1, 0));
        assert_eq!(titles(&groups), vec!["2020"]);

        let three: Vec<Item> = (0..3)
            .map(|i| item(i, "Rare", Some(start + Duration::days(200 * i))))
            .collect();
        let groups = group_items(three, &at(2024, 1, 1, 0));
        assert_eq!(titles(&groups), vec![ALL_ARTICLES]);
        assert_eq!(groups[0].reference_date, Some(start + Duration::days(400)));
    }

    #[test]
    fn test_groups_and_items_newest_first() {
        let items = vec![
            item(1, "old", Some(at(2024, 1, 1, 8))),
            item(2, "new", Some(at(2024, 1, 2, 20))),
            item(3, "mid", Some(at(2024, 1, 2, 10))),
            item(4, "earlier", Some(at(2024, 1, 1, 7))),
        ];
        let groups = group_items(items, &at(2024, 1, 2, 23));

        let refs: Vec<_> = groups.iter().map(|g| g.reference_date).collect();
        let mut sorted = refs.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(refs, sorted);

        for group in &groups {
            let dates: Vec<_> = group.items.iter().map(|i| i.published).collect();
            let mut sorted = dates.clone();
            sorted.sort_by(|a, b| b.cmp(a));
            assert_eq!(dates, sorted);
        }
        assert_eq!(groups[0].items[0].normalized_title(), "new");
    }

    #[test]
    fn test_undated_items_trail() {
        let items = vec![
            item(1, "dated", Some(at(2024, 1, 1, 0))),
            item(2, "undated", None),
        ];
        let groups = group_items(items, &at(2024, 1, 1, 12));
        assert_eq!(titles(&groups), vec!["Today", UNDATED]);
        assert_eq!(groups[1].reference_date, None);
        assert_eq!(groups[1].items[0].id, 2);
    }

    #[test]
    fn test_day_boundaries_follow_time_zone() {
        // 23:30 UTC on Jan 1 is already Jan 2 at UTC+2
        let items = vec![item(1, "late", Some(at(2024, 1, 1, 23) + Duration::minutes(30)))];
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = at(2024, 1, 2, 12).with_timezone(&tz);

        let groups = group_items(items, &now);
        assert_eq!(titles(&groups), vec!["Today"]);
        assert_eq!(groups[0].reference_date, Some(at(2024, 1, 1, 22)));
    }
}
