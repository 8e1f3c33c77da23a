pub mod batch;
pub mod proxies;
pub mod scrape;

pub use batch::batch;
pub use proxies::{harvest, validate};
pub use scrape::scrape;

use anyhow::{Context, Result};
use std::sync::Arc;

use stickyscrape::breaker::RateLimitBreaker;
use stickyscrape::config::Config;
use stickyscrape::error::Error;
use stickyscrape::extractor::TimelineExtractor;
use stickyscrape::proxy::ProxyPool;
use stickyscrape::session::{HttpDriver, SessionContext};
use stickyscrape::storage::{CredentialStore, ResultWriter, SharedFileGuard};

/// Wire up everything a run shares
///
/// # Errors
///
/// - `ProxyList` if the proxy list is missing or malformed
/// - `Config` if the cookie file is missing and the run is not anonymous
pub fn build_context(config: &Config, anonymous: bool) -> stickyscrape::Result<Arc<SessionContext>> {
    let pool = ProxyPool::from_config(&config.pool)?;
    tracing::info!(
        proxies = pool.total_loaded(),
        file = %config.pool.proxies_file.display(),
        "Proxy pool loaded"
    );

    let guard = Arc::new(SharedFileGuard::new());
    let credentials = if anonymous {
        None
    } else {
        if !config.paths.cookies_file.exists() {
            return Err(Error::config(format!(
                "Cookie file '{}' not found. Export cookies from a logged-in browser, or pass --anonymous",
                config.paths.cookies_file.display()
            )));
        }
        Some(CredentialStore::new(
            &config.paths.cookies_file,
            Arc::clone(&guard),
        ))
    };

    Ok(Arc::new(SessionContext {
        pool: Arc::new(pool),
        breaker: Arc::new(RateLimitBreaker::new()),
        driver: Arc::new(HttpDriver::new(config.http.clone())),
        extractor: Arc::new(TimelineExtractor::new(config.http.base_url.clone())),
        credentials,
        writer: Some(ResultWriter::new(
            &config.paths.output_dir,
            &config.paths.session_log,
            guard,
        )),
        config: config.session.clone(),
    }))
}

/// Print the effective configuration as TOML
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    println!("{rendered}");
    Ok(())
}

/// Print Prometheus metrics gathered during the run
pub fn print_metrics() {
    match stickyscrape::metrics::encode_metrics() {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }
}
