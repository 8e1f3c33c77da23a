//! Merging fanned-out session results
//!
//! Sessions working the same target overlap heavily. Merging keeps the
//! first copy of each item id, orders newest first and applies the limit.

use chrono::{DateTime, FixedOffset};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{Item, SessionResult};

/// Timestamp format of `created_at`, e.g. `Wed Oct 10 20:19:24 +0000 2018`
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

fn created_at(item: &Item) -> Option<DateTime<FixedOffset>> {
    let raw = item.get("created_at")?.as_str()?;
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

fn raw_created_at(item: &Item) -> &str {
    item.get("created_at")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

/// Newest first; parseable timestamps before unparseable ones
fn newest_first(a: &Item, b: &Item) -> Ordering {
    match (created_at(a), created_at(b)) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => raw_created_at(b).cmp(raw_created_at(a)),
    }
}

/// Dedupe by `id`, sort newest first, keep at most `limit`
///
/// Items without an `id` are kept as they are.
pub fn merge_items<I>(items: I, limit: usize) -> Vec<Item>
where
    I: IntoIterator<Item = Item>,
{
    let mut seen = HashSet::new();
    let mut merged: Vec<Item> = items
        .into_iter()
        .filter(|item| match item.get("id") {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect();

    // Stable: equal timestamps keep session order
    merged.sort_by(newest_first);
    merged.truncate(limit);
    merged
}

/// Merge the items of every result
pub fn merge_results<'a, I>(results: I, limit: usize) -> Vec<Item>
where
    I: IntoIterator<Item = &'a SessionResult>,
{
    merge_items(
        results.into_iter().flat_map(|r| r.items.iter().cloned()),
        limit,
    )
}

/// The profile with the most followers across results
pub fn best_profile<'a, I>(results: I) -> Option<Item>
where
    I: IntoIterator<Item = &'a SessionResult>,
{
    results
        .into_iter()
        .filter_map(|r| r.profile.as_ref())
        .max_by_key(|p| p.get("followers").and_then(|v| v.as_u64()).unwrap_or(0))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tweet(id: &str, created_at: &str) -> Item {
        json!({"id": id, "created_at": created_at})
    }

    #[test]
    fn test_dedupes_and_sorts_newest_first() {
        let items = vec![
            tweet("1", "Wed Oct 10 20:19:24 +0000 2018"),
            tweet("2", "Thu Oct 11 08:00:00 +0000 2018"),
            tweet("1", "Wed Oct 10 20:19:24 +0000 2018"),
            tweet("3", "Tue Oct 09 23:59:59 +0000 2018"),
        ];

        let merged = merge_items(items, 10);
        let ids: Vec<&str> = merged.iter().map(|t| t["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["2", "1", "3"]);
    }

    #[test]
    fn test_sorts_by_time_not_by_string() {
        // "Wed" > "Mon" as strings, but Monday the 15th is later
        let merged = merge_items(
            vec![
                tweet("old", "Wed Oct 10 20:19:24 +0000 2018"),
                tweet("new", "Mon Oct 15 10:00:00 +0000 2018"),
            ],
            10,
        );
        assert_eq!(merged[0]["id"], "new");
    }

    #[test]
    fn test_truncates_to_limit() {
        let items = (0..10).map(|i| tweet(&i.to_string(), "")).collect::<Vec<_>>();
        assert_eq!(merge_items(items, 4).len(), 4);
    }

    #[test]
    fn test_unparseable_dates_sort_last() {
        let merged = merge_items(
            vec![tweet("a", "yesterday"), tweet("b", "Wed Oct 10 20:19:24 +0000 2018")],
            10,
        );
        assert_eq!(merged[0]["id"], "b");
    }
}
