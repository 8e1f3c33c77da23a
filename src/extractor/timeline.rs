//! Timeline extractor for the remote's GraphQL JSON
//!
//! A tweet is any object with a numeric `rest_id` and a non-empty
//! `legacy.full_text`. Everything else (user stubs, URL cards, cursors) is
//! walked through but never emitted.

use serde_json::{json, Value};
use std::collections::HashSet;

use super::{at_path, Extraction, ExtractionFailure, Extractor, StrategyChain};
use crate::models::Item;
use crate::session::driver::RawResponse;

const DEEP_SEARCH_MAX_DEPTH: usize = 6;

/// Response URL fragments that carry a user profile
const PROFILE_PATTERNS: &[&str] = &["UserByScreenName", "UserByRestId"];

/// Extracts tweets, and the user profile when present
pub struct TimelineExtractor {
    base_url: String,
    author: StrategyChain<Value>,
}

impl TimelineExtractor {
    /// `base_url` is used for canonical tweet URLs (e.g. `https://x.com`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            author: author_chain(),
        }
    }

    /// Extract from an already-parsed JSON document
    pub fn extract_value(&self, data: &Value) -> Extraction {
        let mut out = Extraction::default();
        let mut seen = HashSet::new();
        self.walk(data, &mut seen, &mut out);
        out
    }

    fn walk(&self, node: &Value, seen: &mut HashSet<String>, out: &mut Extraction) {
        match node {
            Value::Object(map) => {
                if let (Some(rest_id), Some(legacy)) = (
                    map.get("rest_id").and_then(Value::as_str),
                    map.get("legacy"),
                ) {
                    let text = tweet_text(legacy);
                    if is_tweet_id(rest_id) && !text.is_empty() && seen.insert(rest_id.to_string())
                    {
                        let (tweet, failure) = self.build_tweet(node, rest_id, legacy, &text);
                        if let Some(failure) = failure {
                            tracing::debug!(id = rest_id, error = %failure, "Tweet extracted without author");
                            out.failures.push(failure);
                        }
                        out.items.push(tweet);
                    }
                }
                for value in map.values() {
                    self.walk(value, seen, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(item, seen, out);
                }
            }
            _ => {}
        }
    }

    fn build_tweet(
        &self,
        node: &Value,
        rest_id: &str,
        legacy: &Value,
        text: &str,
    ) -> (Item, Option<ExtractionFailure>) {
        let (user, failure) = match self.author.resolve(node) {
            Ok(user) => (user, None),
            Err(e) => (json!({}), Some(e)),
        };

        let str_of = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        let num_of = |v: &Value, key: &str| v.get(key).cloned().unwrap_or(json!(0));

        let screen_name = str_of(&user, "screen_name");
        let entities = legacy.get("entities").cloned().unwrap_or(json!({}));
        let list = |key: &str| -> Vec<Value> {
            entities
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };

        let hashtags: Vec<String> = list("hashtags").iter().map(|h| str_of(h, "text")).collect();
        let mentions: Vec<String> = list("user_mentions")
            .iter()
            .map(|m| str_of(m, "screen_name"))
            .collect();
        let urls: Vec<String> = list("urls")
            .iter()
            .map(|u| str_of(u, "expanded_url"))
            .filter(|u| !u.starts_with("https://twitter.com/i/web"))
            .collect();
        let media: Vec<Value> = list("media")
            .iter()
            .map(|m| json!({"type": str_of(m, "type"), "url": str_of(m, "media_url_https")}))
            .collect();

        let url = if screen_name.is_empty() {
            format!("{}/i/status/{rest_id}", self.base_url)
        } else {
            format!("{}/{screen_name}/status/{rest_id}", self.base_url)
        };

        let verified = user.get("verified").and_then(Value::as_bool).unwrap_or(false)
            || user
                .get("is_blue_verified")
                .and_then(Value::as_bool)
                .unwrap_or(false);

        let tweet = json!({
            "id": rest_id,
            "text": html_escape::decode_html_entities(text),
            "created_at": str_of(legacy, "created_at"),
            "author": screen_name,
            "author_name": str_of(&user, "name"),
            "author_id": str_of(&user, "id_str"),
            "author_followers": num_of(&user, "followers_count"),
            "author_following": num_of(&user, "friends_count"),
            "author_verified": verified,
            "likes": num_of(legacy, "favorite_count"),
            "retweets": num_of(legacy, "retweet_count"),
            "replies": num_of(legacy, "reply_count"),
            "quotes": num_of(legacy, "quote_count"),
            "bookmarks": num_of(legacy, "bookmark_count"),
            "views": at_path(node, &["views", "count"]).cloned().unwrap_or(json!(0)),
            "tweet_type": tweet_type(node, legacy),
            "lang": str_of(legacy, "lang"),
            "reply_to_id": str_of(legacy, "in_reply_to_status_id_str"),
            "reply_to_user": str_of(legacy, "in_reply_to_screen_name"),
            "hashtags": hashtags,
            "mentions": mentions,
            "urls": urls,
            "media": media,
            "url": url,
            "scraped_at": chrono::Utc::now().to_rfc3339(),
        });

        (tweet, failure)
    }
}

impl Extractor for TimelineExtractor {
    fn extract(&self, response: &RawResponse) -> Extraction {
        let data: Value = match serde_json::from_str(&response.body) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(url = %response.url, error = %e, "Skipping non-JSON response");
                return Extraction {
                    failures: vec![ExtractionFailure::NotJson(e.to_string())],
                    ..Default::default()
                };
            }
        };

        let mut out = self.extract_value(&data);
        if is_profile_response(&response.url, &data) {
            out.profile = extract_user_profile(&data);
        }
        out
    }
}

/// Only pure numeric ids; rejects t.co URLs and empty strings
pub fn is_tweet_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn tweet_text(legacy: &Value) -> String {
    legacy
        .get("full_text")
        .or_else(|| legacy.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

/// retweet, quote, reply or original, in that precedence
fn tweet_type(node: &Value, legacy: &Value) -> &'static str {
    let present = |v: &Value, key: &str| v.get(key).is_some_and(|x| !x.is_null());

    if present(legacy, "retweeted_status_result") {
        "retweet"
    } else if present(node, "quoted_status_result") {
        "quote"
    } else if legacy
        .get("in_reply_to_status_id_str")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
    {
        "reply"
    } else {
        "original"
    }
}

fn with_screen_name(candidate: Option<&Value>) -> Option<Value> {
    candidate
        .filter(|user| {
            user.get("screen_name")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty())
        })
        .cloned()
}

/// Known nestings of a tweet's author, then a bounded deep search
fn author_chain() -> StrategyChain<Value> {
    StrategyChain::new("author")
        .then("core.user_results", |v| {
            with_screen_name(at_path(v, &["core", "user_results", "result", "legacy"]))
        })
        .then("tweet.core.user_results", |v| {
            with_screen_name(at_path(
                v,
                &["tweet", "core", "user_results", "result", "legacy"],
            ))
        })
        .then("user_results", |v| {
            with_screen_name(at_path(v, &["user_results", "result", "legacy"]))
        })
        .then("core.user_results.core", |v| {
            with_screen_name(at_path(
                v,
                &["core", "user_results", "result", "core", "legacy"],
            ))
        })
        .then("user.legacy", |v| with_screen_name(at_path(v, &["user", "legacy"])))
        .then("deep search", |v| deep_find_user(v, 0).cloned())
}

fn is_truthy_str(node: &Value, key: &str) -> bool {
    node.get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

/// First object that looks like a user record: `screen_name` and `name`
/// but no `full_text`
fn deep_find_user(node: &Value, depth: usize) -> Option<&Value> {
    if depth > DEEP_SEARCH_MAX_DEPTH {
        return None;
    }
    match node {
        Value::Object(map) => {
            if is_truthy_str(node, "screen_name")
                && is_truthy_str(node, "name")
                && !is_truthy_str(node, "full_text")
            {
                return Some(node);
            }
            map.values().find_map(|v| deep_find_user(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| deep_find_user(v, depth + 1)),
        _ => None,
    }
}

fn is_profile_response(url: &str, data: &Value) -> bool {
    PROFILE_PATTERNS.iter().any(|p| url.contains(p))
        || at_path(data, &["data", "user", "result"]).is_some()
}

/// First user record in a profile response
pub fn extract_user_profile(data: &Value) -> Option<Item> {
    match data {
        Value::Object(map) => {
            if let Some(legacy) = data.get("legacy") {
                if is_truthy_str(legacy, "screen_name") && !is_truthy_str(legacy, "full_text") {
                    return Some(build_profile(data, legacy));
                }
            }
            map.values().find_map(extract_user_profile)
        }
        Value::Array(items) => items.iter().find_map(extract_user_profile),
        _ => None,
    }
}

fn build_profile(node: &Value, legacy: &Value) -> Item {
    let s = |key: &str| legacy.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    let n = |key: &str| legacy.get(key).cloned().unwrap_or(json!(0));

    let verified = legacy.get("verified").and_then(Value::as_bool).unwrap_or(false)
        || node
            .get("is_blue_verified")
            .and_then(Value::as_bool)
            .unwrap_or(false);
    let pinned = legacy
        .get("pinned_tweet_ids_str")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .and_then(Value::as_str)
        .unwrap_or("");

    json!({
        "username": s("screen_name"),
        "name": s("name"),
        "id": node.get("rest_id").and_then(Value::as_str).unwrap_or(""),
        "bio": s("description"),
        "location": s("location"),
        "url": s("url"),
        "followers": n("followers_count"),
        "following": n("friends_count"),
        "tweet_count": n("statuses_count"),
        "listed_count": n("listed_count"),
        "verified": verified,
        "created_at": s("created_at"),
        "profile_image": s("profile_image_url_https"),
        "profile_banner": s("profile_banner_url"),
        "pinned_tweet_id": pinned,
        "scraped_at": chrono::Utc::now().to_rfc3339(),
    })
}

/// Bottom pagination cursor, if the response has one
///
/// Cursors appear as `{"cursorType": "Bottom", "value": "..."}`, possibly
/// wrapped in an entry whose `entryId` starts with `cursor-bottom`.
pub fn find_bottom_cursor(data: &Value) -> Option<String> {
    match data {
        Value::Object(map) => {
            if map.get("cursorType").and_then(Value::as_str) == Some("Bottom") {
                if let Some(value) = map.get("value").and_then(Value::as_str) {
                    return Some(value.to_string());
                }
            }
            map.values().find_map(find_bottom_cursor)
        }
        Value::Array(items) => items.iter().find_map(find_bottom_cursor),
        _ => None,
    }
}
