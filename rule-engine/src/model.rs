//! Rule Data Model
//!
//! This module defines the interception rule structures shared between the
//! engine and the admin surface that manages them. Rules are created and
//! edited only through the admin API; the engine treats them as read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Default target package when a randomize config names none.
pub const DEFAULT_TARGET_PACKAGE: &str = "com.kingsoft";

/// Action kind identifiers as exposed to collaborators.
///
/// The serialized tokens (`passthrough`, `modify`, `replace`,
/// `randomize_app_duration`) are the storage/wire contract shared with the
/// admin UI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Passthrough,
    Modify,
    Replace,
    RandomizeAppDuration,
}

impl ActionKind {
    /// The literal token used in storage and in call records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Passthrough => "passthrough",
            ActionKind::Modify => "modify",
            ActionKind::Replace => "replace",
            ActionKind::RandomizeAppDuration => "randomize_app_duration",
        }
    }

    /// Parse an action token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "passthrough" => Some(ActionKind::Passthrough),
            "modify" => Some(ActionKind::Modify),
            "replace" => Some(ActionKind::Replace),
            "randomize_app_duration" => Some(ActionKind::RandomizeAppDuration),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the randomize-app-duration action.
///
/// Serialized with exactly these field names; absent fields are materialized
/// with defaults at rule-load time so downstream logic never observes
/// missing values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomizeConfig {
    /// Packages whose usage-log entries are targeted.
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    /// Upper bound for a randomized duration, in whole minutes.
    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: u64,
    /// Number of target entries (by original order) left untouched.
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
}

fn default_packages() -> Vec<String> {
    vec![DEFAULT_TARGET_PACKAGE.to_string()]
}

fn default_max_duration_minutes() -> u64 {
    30
}

fn default_keep_count() -> usize {
    2
}

impl Default for RandomizeConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            max_duration_minutes: default_max_duration_minutes(),
            keep_count: default_keep_count(),
        }
    }
}

impl RandomizeConfig {
    /// Parse a stored config payload, falling back to full defaults when the
    /// payload is absent or not valid JSON (the proxy must keep working on a
    /// misconfigured rule rather than reject live traffic).
    pub fn from_payload(payload: Option<&str>) -> Self {
        let mut config = match payload {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw).unwrap_or_default()
            }
            _ => Self::default(),
        };
        config.normalize();
        config
    }

    /// Materialize defaults: an empty package list means the default target
    /// package, and the duration bound is floored at one minute.
    pub fn normalize(&mut self) {
        if self.packages.is_empty() {
            self.packages = default_packages();
        }
        if self.max_duration_minutes < 1 {
            self.max_duration_minutes = 1;
        }
    }
}

/// Whether a rule applies globally or to a specific set of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleScope {
    /// Applies to every caller, identified or not.
    Global,
    /// Applies only to callers whose email is in the (non-empty) set.
    Users(BTreeSet<String>),
}

impl RuleScope {
    /// Build a user scope from an email list, normalizing an empty set to
    /// `Global` so the scope invariant always holds.
    pub fn users<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = emails
            .into_iter()
            .map(|e| e.into().trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if set.is_empty() {
            RuleScope::Global
        } else {
            RuleScope::Users(set)
        }
    }

    /// Parse the stored comma-delimited email column.
    pub fn from_email_field(email: Option<&str>) -> Self {
        match email {
            Some(raw) => RuleScope::users(raw.split(',')),
            None => RuleScope::Global,
        }
    }

    /// Render the scope back into the stored email column shape.
    pub fn to_email_field(&self) -> Option<String> {
        match self {
            RuleScope::Global => None,
            RuleScope::Users(set) => {
                Some(set.iter().cloned().collect::<Vec<_>>().join(","))
            }
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, RuleScope::Global)
    }

    /// Whether a caller (possibly anonymous) falls inside this scope.
    pub fn applies_to(&self, caller_email: Option<&str>) -> bool {
        match self {
            RuleScope::Global => true,
            RuleScope::Users(set) => {
                caller_email.map_or(false, |email| set.contains(email))
            }
        }
    }
}

/// The transformation a rule performs, with its typed configuration.
///
/// Modify/Replace templates stay opaque strings here: they are parsed per
/// application so a template corrupted after rule creation degrades that one
/// call to passthrough and is flagged on the audit path, instead of silently
/// vanishing from the rule set. The randomize config is structured data and
/// is parsed once at rule-load time.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    Passthrough,
    /// Merge the template's top-level fields into the request.
    Modify { template: String },
    /// Replace the entire response with the template.
    Replace { template: String },
    /// Rewrite usage-log durations in the response.
    RandomizeAppDuration(RandomizeConfig),
}

impl RuleAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            RuleAction::Passthrough => ActionKind::Passthrough,
            RuleAction::Modify { .. } => ActionKind::Modify,
            RuleAction::Replace { .. } => ActionKind::Replace,
            RuleAction::RandomizeAppDuration(_) => ActionKind::RandomizeAppDuration,
        }
    }

    /// Materialize a typed action from the stored token + payload pair.
    pub fn from_stored(kind: ActionKind, payload: Option<&str>) -> Self {
        match kind {
            ActionKind::Passthrough => RuleAction::Passthrough,
            ActionKind::Modify => RuleAction::Modify {
                template: payload.unwrap_or_default().to_string(),
            },
            ActionKind::Replace => RuleAction::Replace {
                template: payload.unwrap_or_default().to_string(),
            },
            ActionKind::RandomizeAppDuration => {
                RuleAction::RandomizeAppDuration(RandomizeConfig::from_payload(payload))
            }
        }
    }

    /// Render the action payload back into the stored opaque column.
    pub fn payload_field(&self) -> Option<String> {
        match self {
            RuleAction::Passthrough => None,
            RuleAction::Modify { template } | RuleAction::Replace { template } => {
                Some(template.clone())
            }
            RuleAction::RandomizeAppDuration(config) => {
                serde_json::to_string(config).ok()
            }
        }
    }
}

/// An administrator-defined interception rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Unique identifier, assigned on creation, immutable.
    pub id: i64,
    /// RPC method this rule matches, exact match only.
    pub method_name: String,
    pub scope: RuleScope,
    pub action: RuleAction,
    /// Disabled rules are never selected.
    pub is_enabled: bool,
    /// Free-text annotation, no semantic effect.
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Create an enabled rule with fresh timestamps.
    pub fn new(
        id: i64,
        method_name: impl Into<String>,
        scope: RuleScope,
        action: RuleAction,
    ) -> EngineResult<Self> {
        let method_name = method_name.into();
        if method_name.trim().is_empty() {
            return Err(EngineError::invalid_rule("method_name must not be empty"));
        }
        let now = Utc::now();
        Ok(Self {
            id,
            method_name,
            scope,
            action,
            is_enabled: true,
            remark: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn matches_method(&self, method_name: &str) -> bool {
        self.method_name == method_name
    }
}

/// Storage/wire representation of a rule, matching the admin schema:
/// action token plus opaque payload column, nullable comma-delimited email
/// list, and an explicit global flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRule {
    pub id: i64,
    pub method_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub action: ActionKind,
    #[serde(default)]
    pub custom_response: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_global: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<StoredRule> for Rule {
    type Error = EngineError;

    fn try_from(stored: StoredRule) -> EngineResult<Self> {
        if stored.method_name.trim().is_empty() {
            return Err(EngineError::invalid_rule("method_name must not be empty"));
        }
        let scope = if stored.is_global {
            RuleScope::Global
        } else {
            RuleScope::from_email_field(stored.email.as_deref())
        };
        Ok(Rule {
            id: stored.id,
            method_name: stored.method_name,
            scope,
            action: RuleAction::from_stored(stored.action, stored.custom_response.as_deref()),
            is_enabled: stored.is_enabled,
            remark: stored.remark,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }
}

impl From<&Rule> for StoredRule {
    fn from(rule: &Rule) -> Self {
        StoredRule {
            id: rule.id,
            method_name: rule.method_name.clone(),
            email: rule.scope.to_email_field(),
            action: rule.action.kind(),
            custom_response: rule.action.payload_field(),
            remark: rule.remark.clone(),
            is_enabled: rule.is_enabled,
            is_global: rule.scope.is_global(),
            created_at: rule.created_at,
            updated_at: rule.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tokens_round_trip() {
        for kind in [
            ActionKind::Passthrough,
            ActionKind::Modify,
            ActionKind::Replace,
            ActionKind::RandomizeAppDuration,
        ] {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(ActionKind::parse("block"), None);
    }

    #[test]
    fn test_randomize_config_defaults() {
        let config = RandomizeConfig::from_payload(None);
        assert_eq!(config.packages, vec![DEFAULT_TARGET_PACKAGE.to_string()]);
        assert_eq!(config.max_duration_minutes, 30);
        assert_eq!(config.keep_count, 2);

        // Partial payload fills in the rest
        let config = RandomizeConfig::from_payload(Some(r#"{"keep_count": 0}"#));
        assert_eq!(config.keep_count, 0);
        assert_eq!(config.max_duration_minutes, 30);

        // Malformed payload falls back to full defaults
        let config = RandomizeConfig::from_payload(Some("not json"));
        assert_eq!(config, RandomizeConfig::default());
    }

    #[test]
    fn test_randomize_config_normalization() {
        let config =
            RandomizeConfig::from_payload(Some(r#"{"packages": [], "max_duration_minutes": 0}"#));
        assert_eq!(config.packages, vec![DEFAULT_TARGET_PACKAGE.to_string()]);
        assert_eq!(config.max_duration_minutes, 1);
    }

    #[test]
    fn test_scope_normalization_and_matching() {
        // Empty user set collapses to Global
        assert!(RuleScope::users(Vec::<String>::new()).is_global());
        assert!(RuleScope::users(vec![" ", ""]).is_global());

        let scope = RuleScope::from_email_field(Some("a@x.com, b@x.com"));
        assert!(scope.applies_to(Some("a@x.com")));
        assert!(scope.applies_to(Some("b@x.com")));
        assert!(!scope.applies_to(Some("c@x.com")));
        assert!(!scope.applies_to(None));

        assert!(RuleScope::Global.applies_to(None));
        assert!(RuleScope::Global.applies_to(Some("anyone@x.com")));
    }

    #[test]
    fn test_stored_rule_round_trip() {
        let rule = Rule::new(
            7,
            "device.get_tactics",
            RuleScope::users(vec!["kid@example.com"]),
            RuleAction::RandomizeAppDuration(RandomizeConfig::default()),
        )
        .unwrap();

        let stored = StoredRule::from(&rule);
        assert_eq!(stored.action, ActionKind::RandomizeAppDuration);
        assert_eq!(stored.email.as_deref(), Some("kid@example.com"));
        assert!(!stored.is_global);
        let config: RandomizeConfig =
            serde_json::from_str(stored.custom_response.as_deref().unwrap()).unwrap();
        assert_eq!(config, RandomizeConfig::default());

        let back = Rule::try_from(stored).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_stored_rule_rejects_empty_method() {
        let mut stored = StoredRule::from(
            &Rule::new(1, "x", RuleScope::Global, RuleAction::Passthrough).unwrap(),
        );
        stored.method_name = "  ".to_string();
        assert!(Rule::try_from(stored).is_err());
    }
}
