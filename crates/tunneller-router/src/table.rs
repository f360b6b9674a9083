//! Sorted route table with first-match lookup
//!
//! The table is rebuilt whenever the rule list changes and then shared
//! immutably with in-flight requests, so lookups never observe a
//! partially-sorted state.

use crate::rule::RoutingRule;
use tracing::debug;

/// An ordered sequence of routing rules.
///
/// Sort key: priority ascending, then specificity descending. The sort is
/// stable, so rules that tie on both keys keep their insertion order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RoutingRule>,
}

impl RouteTable {
    /// Build a sorted table from a rule list
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.specificity().cmp(&a.specificity()))
        });

        debug!("Route table sorted ({} rules)", rules.len());
        for rule in &rules {
            debug!("  - {rule}");
        }

        Self { rules }
    }

    /// Return the first rule matching `path`, in table order
    pub fn lookup(&self, path: &str) -> Option<&RoutingRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Rules in sorted order
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
