//! Interception Engine
//!
//! Per-call pipeline: take one rule snapshot, select the applicable rule,
//! apply its action, emit one audit record. Decisions are pure functions of
//! (method, caller, snapshot, payload); calls for different connections are
//! evaluated concurrently with no shared mutable state beyond the random
//! source.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::audit::{AuditSink, CallRecord};
use crate::executor::{self, ExecutionOutcome};
use crate::matcher::RuleSnapshot;
use crate::model::{ActionKind, Rule};
use crate::randomize::{DurationSampler, ThreadRngSampler};
use crate::store::RuleStore;

/// Request params fields scanned for a caller identity, in order.
const EMAIL_FIELDS: [&str; 7] = [
    "email",
    "userEmail",
    "user_email",
    "username",
    "userId",
    "user_id",
    "user",
];

/// Outcome of one intercepted call, handed back to the proxy.
#[derive(Debug, Clone)]
pub struct CallDecision {
    /// Request body to forward upstream.
    pub request: Value,
    /// Response body to return to the client.
    pub response: Value,
    /// Action that took effect. Degraded and no-match calls both report
    /// `Passthrough`; they are indistinguishable at the transform boundary.
    pub action: ActionKind,
    /// True when an outgoing payload differs from its original.
    pub changed: bool,
    /// The selected rule, if any.
    pub rule_id: Option<i64>,
}

impl CallDecision {
    fn passthrough(request: &Value, response: &Value) -> Self {
        Self {
            request: request.clone(),
            response: response.clone(),
            action: ActionKind::Passthrough,
            changed: false,
            rule_id: None,
        }
    }
}

/// The interception rule engine.
///
/// Holds no rule state of its own: every decision reads one snapshot from
/// the store and never re-reads it mid-decision.
pub struct InterceptionEngine<S, A> {
    store: S,
    audit: A,
    sampler: Arc<dyn DurationSampler>,
}

impl<S: RuleStore, A: AuditSink> InterceptionEngine<S, A> {
    pub fn new(store: S, audit: A) -> Self {
        Self::with_sampler(store, audit, Arc::new(ThreadRngSampler))
    }

    /// Build an engine with an explicit duration sampler (deterministic in
    /// tests).
    pub fn with_sampler(store: S, audit: A, sampler: Arc<dyn DurationSampler>) -> Self {
        Self {
            store,
            audit,
            sampler,
        }
    }

    /// Decide one intercepted JSON-RPC call, deriving the method and caller
    /// identity from the request body.
    pub async fn intercept_rpc(&self, request: &Value, response: &Value) -> CallDecision {
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let email = caller_email(request);
        self.intercept(&method, email.as_deref(), request, response)
            .await
    }

    /// Decide one intercepted call.
    ///
    /// Never fails: a store outage or a misconfigured rule degrades this
    /// call to passthrough, flagged on the audit record.
    pub async fn intercept(
        &self,
        method: &str,
        caller_email: Option<&str>,
        request: &Value,
        response: &Value,
    ) -> CallDecision {
        let snapshot = match self.store.list_enabled_rules(method).await {
            Ok(rules) => RuleSnapshot::new(rules),
            Err(err) => {
                error!(method, error = %err, "rule store unavailable, passing call through");
                let mut record = CallRecord::passthrough(
                    method,
                    caller_email.map(String::from),
                    request.to_string(),
                    response.to_string(),
                );
                record.failure = Some(err.to_string());
                self.emit(record).await;
                return CallDecision::passthrough(request, response);
            }
        };

        let Some(rule) = snapshot.select(method, caller_email) else {
            self.emit(CallRecord::passthrough(
                method,
                caller_email.map(String::from),
                request.to_string(),
                response.to_string(),
            ))
            .await;
            return CallDecision::passthrough(request, response);
        };

        info!(
            method,
            rule_id = rule.id,
            action = %rule.action.kind(),
            "applying interception rule"
        );
        let outcome = executor::apply(&rule.action, request, response, self.sampler.as_ref());
        let record = build_record(method, caller_email, request, response, rule, &outcome);
        let decision = CallDecision {
            action: if outcome.failure.is_some() {
                ActionKind::Passthrough
            } else {
                outcome.action
            },
            changed: outcome.changed,
            rule_id: Some(rule.id),
            request: outcome.request,
            response: outcome.response,
        };
        self.emit(record).await;
        decision
    }

    async fn emit(&self, record: CallRecord) {
        if let Err(err) = self.audit.record(record).await {
            warn!(error = %err, "failed to record call audit entry");
        }
    }
}

fn build_record(
    method: &str,
    caller_email: Option<&str>,
    original_request: &Value,
    original_response: &Value,
    rule: &Rule,
    outcome: &ExecutionOutcome,
) -> CallRecord {
    let mut record = CallRecord::passthrough(
        method,
        caller_email.map(String::from),
        original_request.to_string(),
        original_response.to_string(),
    );
    record.rule_id = Some(rule.id);

    if let Some(failure) = &outcome.failure {
        record.failure = Some(failure.to_string());
        return record;
    }

    if outcome.request != *original_request {
        record.intercepted_request = Some(outcome.request.to_string());
        record.request_action = Some(outcome.action);
    }
    if outcome.response != *original_response {
        record.intercepted_response = Some(outcome.response.to_string());
        record.response_action = Some(outcome.action);
    }
    record
}

/// Extract the caller identity from a JSON-RPC request body.
///
/// Scans the request params for the known identity fields; tolerates params
/// delivered as a JSON-encoded string, which is how the intercepted client
/// ships them after decryption.
pub fn caller_email(request: &Value) -> Option<String> {
    let params = request.get("params")?;
    match params {
        Value::Object(map) => first_email(map),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => first_email(&map),
            _ => None,
        },
        _ => None,
    }
}

fn first_email(params: &serde_json::Map<String, Value>) -> Option<String> {
    EMAIL_FIELDS.iter().find_map(|field| {
        params
            .get(*field)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(String::from)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_caller_email_from_params_object() {
        let request = json!({"method": "x", "params": {"email": "kid@example.com"}});
        assert_eq!(caller_email(&request).as_deref(), Some("kid@example.com"));

        let request = json!({"method": "x", "params": {"userId": "u-123"}});
        assert_eq!(caller_email(&request).as_deref(), Some("u-123"));
    }

    #[test]
    fn test_caller_email_from_string_params() {
        let request = json!({
            "method": "x",
            "params": "{\"user_email\": \"kid@example.com\"}"
        });
        assert_eq!(caller_email(&request).as_deref(), Some("kid@example.com"));
    }

    #[test]
    fn test_caller_email_absent() {
        assert_eq!(caller_email(&json!({"method": "x"})), None);
        assert_eq!(caller_email(&json!({"method": "x", "params": {}})), None);
        assert_eq!(caller_email(&json!({"method": "x", "params": "oops"})), None);
        assert_eq!(
            caller_email(&json!({"method": "x", "params": {"email": ""}})),
            None
        );
    }
}
