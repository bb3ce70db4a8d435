//! The read-only resolution context threaded through every component.
//!
//! No component holds an ambient handle to shared state: the schema catalog,
//! node cache, cancellation token, used-classes listener and local-state
//! lookups all travel through this struct, and alias numbering lives in an
//! allocator owned by each top-level request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::hierarchy::NodeCache;
use crate::rules::{GroupingRule, RuleSet};
use crate::schema_catalog::SchemaCatalog;

use super::errors::QueryBuilderError;

/// Side channel notified about every class and relationship class actually
/// referenced while building a query, including classes referenced only
/// inside filter expressions. Consumed by external cache-invalidation
/// logic; the query tree itself never reads it.
pub trait UsedClassesListener {
    fn on_class_used(&self, class: &str, polymorphic: bool);
}

/// Local-state lookup used only to pick which grouping specification is
/// active when a rule offers more than one mutually exclusive choice.
/// Returning None falls back to the rule's first specification.
pub trait ActiveGroupChooser {
    fn active_group(&self, rule: &GroupingRule) -> Option<usize>;
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct ResolutionContext<'a> {
    pub catalog: &'a SchemaCatalog,
    pub node_cache: &'a dyn NodeCache,
    pub ruleset: &'a RuleSet,
    /// Schema the request targets; always allowed by supported-schema
    /// lists, even when a deny list names it.
    pub target_schema: &'a str,
    pub cancellation: CancellationToken,
    pub used_classes: Option<&'a dyn UsedClassesListener>,
    pub active_groups: Option<&'a dyn ActiveGroupChooser>,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(
        catalog: &'a SchemaCatalog,
        node_cache: &'a dyn NodeCache,
        ruleset: &'a RuleSet,
        target_schema: &'a str,
    ) -> Self {
        ResolutionContext {
            catalog,
            node_cache,
            ruleset,
            target_schema,
            cancellation: CancellationToken::new(),
            used_classes: None,
            active_groups: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_used_classes_listener(mut self, listener: &'a dyn UsedClassesListener) -> Self {
        self.used_classes = Some(listener);
        self
    }

    pub fn with_active_group_chooser(mut self, chooser: &'a dyn ActiveGroupChooser) -> Self {
        self.active_groups = Some(chooser);
        self
    }

    pub fn check_cancelled(&self) -> Result<(), QueryBuilderError> {
        if self.cancellation.is_cancelled() {
            Err(QueryBuilderError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn notify_class_used(&self, class: &str, polymorphic: bool) {
        if let Some(listener) = self.used_classes {
            listener.on_class_used(class, polymorphic);
        }
    }
}

/// Join-alias allocator threaded by value through one request's resolution,
/// so concurrent requests never share numbering state.
#[derive(Debug, Default)]
pub struct AliasAllocator {
    next: u32,
}

impl AliasAllocator {
    pub fn new() -> Self {
        AliasAllocator::default()
    }

    pub fn next(&mut self, prefix: &str) -> String {
        let alias = format!("{prefix}{}", self.next);
        self.next += 1;
        alias
    }
}
