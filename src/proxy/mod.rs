//! Proxy endpoints: the sticky pool, the list file, and the harvest and
//! validation passes that produce it.

pub mod harvest;
pub mod pool;
pub mod store;
pub mod validate;

pub use pool::{ExhaustionPolicy, PoolSnapshot, ProxyPool, ProxyUsage};

use crate::config::PoolConfig;
use crate::utils::error::ProxyListError;

impl ProxyPool {
    /// Load the configured list file into a pool
    ///
    /// An empty list yields an empty pool; what that means for a run is the
    /// scheduler's call (see [`ExhaustionPolicy`]).
    pub fn from_config(config: &PoolConfig) -> Result<Self, ProxyListError> {
        let endpoints = store::load_endpoints(&config.proxies_file)?;
        Ok(match config.shuffle_seed {
            Some(seed) => Self::with_seed(endpoints, seed),
            None => Self::new(endpoints),
        })
    }
}
