//! Rule Store Boundary
//!
//! The engine only requires read access to the rule set: one consistent
//! snapshot per call decision. Durable storage and administrator edits live
//! behind this trait in an external collaborator.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::EngineResult;
use crate::model::Rule;

/// Read access to the rule set.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All enabled rules for a method, reflecting every administrator edit
    /// made before this call. Ordering is not significant; the matcher's
    /// recency tie-break is what makes selection deterministic.
    ///
    /// Returns `StoreUnavailable` when no consistent snapshot can be taken;
    /// the engine then passes the call through.
    async fn list_enabled_rules(&self, method_name: &str) -> EngineResult<Vec<Rule>>;
}

#[async_trait]
impl<T: RuleStore + ?Sized> RuleStore for std::sync::Arc<T> {
    async fn list_enabled_rules(&self, method_name: &str) -> EngineResult<Vec<Rule>> {
        self.as_ref().list_enabled_rules(method_name).await
    }
}

/// In-process rule store keyed by rule id.
///
/// Used by tests and by embedders that manage rules directly; concurrent
/// readers each get an independent snapshot.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: DashMap<i64, Rule>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a rule, returning the previous definition if any.
    pub fn upsert(&self, rule: Rule) -> Option<Rule> {
        self.rules.insert(rule.id, rule)
    }

    pub fn remove(&self, id: i64) -> Option<Rule> {
        self.rules.remove(&id).map(|(_, rule)| rule)
    }

    /// Toggle a rule's enablement. Returns false when the rule is unknown.
    pub fn set_enabled(&self, id: i64, enabled: bool) -> bool {
        match self.rules.get_mut(&id) {
            Some(mut entry) => {
                entry.is_enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_enabled_rules(&self, method_name: &str) -> EngineResult<Vec<Rule>> {
        Ok(self
            .rules
            .iter()
            .filter(|entry| entry.is_enabled && entry.matches_method(method_name))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
