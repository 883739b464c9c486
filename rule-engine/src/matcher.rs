//! Rule Matcher
//!
//! Selects the single applicable rule for an incoming call from a consistent
//! snapshot of the rule set.

use chrono::{DateTime, Utc};

use crate::model::{Rule, RuleScope};

/// A consistent, read-only view of the rule set taken once per call.
///
/// The engine never re-reads the store mid-decision; concurrent rule edits
/// are only observed by later calls.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    rules: Vec<Rule>,
    taken_at: DateTime<Utc>,
}

impl RuleSnapshot {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            taken_at: Utc::now(),
        }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Select the applicable rule for a call, if any. See [`select`].
    pub fn select(&self, method_name: &str, caller_email: Option<&str>) -> Option<&Rule> {
        select(method_name, caller_email, &self.rules)
    }
}

/// Select zero or one applicable rule for a call.
///
/// Precedence:
/// 1. Only enabled rules whose `method_name` matches exactly are considered.
/// 2. A user-scoped rule containing the caller beats any global rule. With no
///    caller identity, only global rules are eligible.
/// 3. Within a scope class, the most-recently-updated rule wins. The admin
///    surface does not prevent duplicate method+scope rules, so this
///    tie-break is what makes selection deterministic; equal update times
///    resolve to the highest id.
pub fn select<'a>(
    method_name: &str,
    caller_email: Option<&str>,
    rules: &'a [Rule],
) -> Option<&'a Rule> {
    let mut best_user: Option<&Rule> = None;
    let mut best_global: Option<&Rule> = None;

    for rule in rules {
        if !rule.is_enabled || !rule.matches_method(method_name) {
            continue;
        }
        match &rule.scope {
            RuleScope::Users(_) => {
                if rule.scope.applies_to(caller_email) {
                    keep_newest(&mut best_user, rule);
                }
            }
            RuleScope::Global => keep_newest(&mut best_global, rule),
        }
    }

    best_user.or(best_global)
}

fn keep_newest<'a>(best: &mut Option<&'a Rule>, candidate: &'a Rule) {
    let newer = match best {
        Some(current) => {
            (candidate.updated_at, candidate.id) > (current.updated_at, current.id)
        }
        None => true,
    };
    if newer {
        *best = Some(candidate);
    }
}
