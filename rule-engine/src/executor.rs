//! Action Executor
//!
//! Applies a selected rule's action to the original request/response pair.
//! One pass per call, terminal, no retries: a failure degrades the call to
//! passthrough and is carried in the outcome for the audit path.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::model::{ActionKind, RuleAction};
use crate::randomize::{randomize_app_durations, DurationSampler};

/// Result of applying an action to a call.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Outgoing request body.
    pub request: Value,
    /// Outgoing response body.
    pub response: Value,
    /// True when an output differs from the input it replaced.
    pub changed: bool,
    /// The action that was attempted.
    pub action: ActionKind,
    /// Set when the action failed and the call degraded to passthrough.
    pub failure: Option<EngineError>,
}

/// Apply an action to the original request/response pair.
///
/// Never fails the call: a `MalformedTemplate` or `MalformedPayload` error
/// yields a passthrough outcome with the failure recorded, so the proxy
/// never drops or corrupts live traffic over a rule-configuration error.
pub fn apply(
    action: &RuleAction,
    original_request: &Value,
    original_response: &Value,
    sampler: &dyn DurationSampler,
) -> ExecutionOutcome {
    match try_apply(action, original_request, original_response, sampler) {
        Ok((request, response)) => {
            let changed = request != *original_request || response != *original_response;
            ExecutionOutcome {
                request,
                response,
                changed,
                action: action.kind(),
                failure: None,
            }
        }
        Err(err) => {
            warn!(action = %action.kind(), error = %err, "action failed, passing call through");
            ExecutionOutcome {
                request: original_request.clone(),
                response: original_response.clone(),
                changed: false,
                action: action.kind(),
                failure: Some(err),
            }
        }
    }
}

fn try_apply(
    action: &RuleAction,
    request: &Value,
    response: &Value,
    sampler: &dyn DurationSampler,
) -> EngineResult<(Value, Value)> {
    match action {
        RuleAction::Passthrough => Ok((request.clone(), response.clone())),
        RuleAction::Modify { template } => {
            let patch = parse_template_object(template)?;
            Ok((merge_fields(request, &patch), response.clone()))
        }
        RuleAction::Replace { template } => {
            let replacement: Value = serde_json::from_str(template)
                .map_err(|e| EngineError::malformed_template(e.to_string()))?;
            Ok((request.clone(), replacement))
        }
        RuleAction::RandomizeAppDuration(config) => {
            let response = randomize_app_durations(response, config, sampler)?;
            Ok((request.clone(), response))
        }
    }
}

fn parse_template_object(template: &str) -> EngineResult<Map<String, Value>> {
    let parsed: Value = serde_json::from_str(template)
        .map_err(|e| EngineError::malformed_template(e.to_string()))?;
    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::malformed_template(format!(
            "modify template must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Field-level overwrite: keys present in the patch override, keys absent
/// are preserved. A non-object request is replaced by the patch wholesale.
fn merge_fields(base: &Value, patch: &Map<String, Value>) -> Value {
    match base {
        Value::Object(fields) => {
            let mut merged = fields.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => Value::Object(patch.clone()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
