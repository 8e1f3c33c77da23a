use anyhow::{Context, Result};
use clap::ValueEnum;

use stickyscrape::config::Config;
use stickyscrape::error::Error;
use stickyscrape::models::{JobTarget, SearchSort, SessionJob};
use stickyscrape::scheduler::{best_profile, merge_results, Scheduler};

/// What `scrape` collects
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TargetKind {
    /// Search results for a query
    Search,
    /// Search results for a hashtag
    Hashtag,
    /// A user's tweets
    User,
    /// A user's tweets and replies
    Replies,
    /// Tweets a user liked
    Likes,
    /// A conversation, by tweet id or URL
    Thread,
}

impl TargetKind {
    pub fn into_target(self, value: String, top: bool) -> JobTarget {
        let sort = if top { SearchSort::Top } else { SearchSort::Latest };
        match self {
            Self::Search => JobTarget::Search { query: value, sort },
            Self::Hashtag => JobTarget::Hashtag { tag: value, sort },
            Self::User => JobTarget::User {
                username: value,
                include_replies: false,
            },
            Self::Replies => JobTarget::User {
                username: value,
                include_replies: true,
            },
            Self::Likes => JobTarget::Likes { username: value },
            Self::Thread => JobTarget::Thread { tweet: value },
        }
    }
}

/// Fan one target out over `sessions` sticky sessions and merge what they find
pub async fn scrape(
    config: Config,
    target: JobTarget,
    sessions: Option<usize>,
    limit: usize,
    anonymous: bool,
) -> Result<()> {
    let ctx = super::build_context(&config, anonymous)?;
    let sessions = sessions
        .unwrap_or_else(|| ctx.pool.total_loaded())
        .max(1);

    println!("Scraping {} ({})", target.label(), target.kind());
    println!("========================");
    println!("  Sessions: {sessions}");
    println!("  Limit:    {limit}");
    println!(
        "  Expected: up to {} items",
        (sessions * config.session.items_per_session).min(limit)
    );

    let jobs = SessionJob::fan_out(&target, sessions);
    let scheduler = Scheduler::new(ctx.clone()).with_policy(config.pool.on_exhausted);
    let report = scheduler
        .run_until_ctrl_c(jobs, config.scheduler.concurrency_limit)
        .await
        .map_err(Error::from)?;

    let merged = merge_results(&report.results, limit);
    if let Some(writer) = &ctx.writer {
        if !merged.is_empty() {
            let path = writer
                .persist_merged(target.kind(), &target.label(), &merged)
                .map_err(Error::from)
                .context("Failed to save merged results")?;
            println!("Saved {} items to {}", merged.len(), path.display());
        }
        if let Some(profile) = best_profile(&report.results) {
            let username = profile
                .get("username")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            let path = writer
                .persist_profile(username, &profile)
                .map_err(Error::from)
                .context("Failed to save profile")?;
            println!("Saved profile to {}", path.display());
        }
    }

    println!("{report}");
    if merged.is_empty() {
        println!("No items collected.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kinds() {
        let target = TargetKind::Replies.into_target("alice".into(), false);
        assert_eq!(target.kind(), "replies");

        let target = TargetKind::Hashtag.into_target("rust".into(), true);
        assert!(matches!(target, JobTarget::Hashtag { sort: SearchSort::Top, .. }));
    }
}
