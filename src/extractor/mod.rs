//! Content extraction: raw responses to items
//!
//! An [`Extractor`] never fails a response as a whole. Anything it cannot
//! make sense of is counted as an [`ExtractionFailure`] and logged at debug;
//! the session carries on with whatever items did come out.

pub mod timeline;

pub use timeline::TimelineExtractor;

use serde_json::Value;
use thiserror::Error;

use crate::models::Item;
use crate::session::driver::RawResponse;

/// Why one item (or one response) yielded nothing usable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// Body is not JSON
    #[error("Response body is not JSON: {0}")]
    NotJson(String),

    /// Every strategy for a field came up empty
    #[error("No strategy resolved field '{0}'")]
    Unresolved(&'static str),
}

/// What one response produced
#[derive(Debug, Default)]
pub struct Extraction {
    pub items: Vec<Item>,
    /// Swallowed per-item failures
    pub failures: Vec<ExtractionFailure>,
    /// User profile, when the response carried one
    pub profile: Option<Item>,
}

impl Extraction {
    pub fn failure_count(&self) -> u32 {
        self.failures.len() as u32
    }
}

/// Turns raw responses into items
pub trait Extractor: Send + Sync {
    fn extract(&self, response: &RawResponse) -> Extraction;
}

type Strategy<T> = Box<dyn Fn(&Value) -> Option<T> + Send + Sync>;

/// Ordered lookup strategies for one field; the first hit wins
pub struct StrategyChain<T> {
    field: &'static str,
    strategies: Vec<(&'static str, Strategy<T>)>,
}

impl<T> StrategyChain<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    /// Append a named strategy
    pub fn then<F>(mut self, name: &'static str, strategy: F) -> Self
    where
        F: Fn(&Value) -> Option<T> + Send + Sync + 'static,
    {
        self.strategies.push((name, Box::new(strategy)));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run strategies in order
    pub fn resolve(&self, node: &Value) -> Result<T, ExtractionFailure> {
        for (name, strategy) in &self.strategies {
            if let Some(found) = strategy(node) {
                tracing::trace!(field = self.field, strategy = name, "Field resolved");
                return Ok(found);
            }
        }
        Err(ExtractionFailure::Unresolved(self.field))
    }
}

/// Follow a path of object keys
pub fn at_path<'a>(node: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(node, |current, key| current.get(*key))
}
