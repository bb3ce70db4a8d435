//! Filter-expression parsing and compilation.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

pub mod ast;
pub mod compiler;
pub mod errors;
pub mod parser;

use ast::FilterExpr;
use errors::FilterParseError;

const PARSE_CACHE_CAPACITY: usize = 256;

/// Caches parsed filter expressions by source text. The same rule filters
/// are compiled for every hierarchy-level request, so parsing them once per
/// builder pays off quickly.
pub struct FilterExpressionCache {
    cache: Mutex<LruCache<String, Arc<FilterExpr>>>,
}

impl FilterExpressionCache {
    pub fn new() -> Self {
        FilterExpressionCache {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PARSE_CACHE_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    pub fn parse(&self, expression: &str) -> Result<Arc<FilterExpr>, FilterParseError> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(parsed) = cache.get(expression) {
                return Ok(parsed.clone());
            }
        }
        let parsed = Arc::new(parser::parse_filter(expression)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(expression.to_string(), parsed.clone());
        }
        Ok(parsed)
    }
}

impl Default for FilterExpressionCache {
    fn default() -> Self {
        FilterExpressionCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_returns_shared_parse_results() {
        let cache = FilterExpressionCache::new();
        let first = cache.parse("this.A = 1").unwrap();
        let second = cache.parse("this.A = 1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn parse_errors_are_not_cached() {
        let cache = FilterExpressionCache::new();
        assert!(cache.parse("this.A = = 1").is_err());
        assert!(cache.parse("this.A = 1").is_ok());
    }
}
