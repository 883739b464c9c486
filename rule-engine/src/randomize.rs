//! Randomization Transform
//!
//! Rewrites the duration and package attribution of a bounded subset of
//! usage-log entries inside an intercepted response, leaving entries for
//! non-target packages untouched. Used exclusively by the
//! randomize-app-duration action.

use rand::Rng;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::model::RandomizeConfig;

/// Usage-log entry field names as they appear on the wire.
pub const PACKAGE_FIELD: &str = "mPackageName";
pub const BEGIN_FIELD: &str = "mBeginTimeStamp";
pub const END_FIELD: &str = "mEndTimeStamp";
pub const DURATION_FIELD: &str = "mDuration";

const MS_PER_MINUTE: i64 = 60_000;

/// Source of randomized durations.
///
/// Implementations must be safe for concurrent use across simultaneous
/// calls; tests supply a deterministic sampler to pin down boundary
/// behavior.
pub trait DurationSampler: Send + Sync {
    /// Draw a whole-minute duration uniformly from `[1, max_minutes]`.
    fn sample_minutes(&self, max_minutes: u64) -> u64;
}

/// Default sampler backed by the thread-local RNG, independent draws with no
/// shared seed state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSampler;

impl DurationSampler for ThreadRngSampler {
    fn sample_minutes(&self, max_minutes: u64) -> u64 {
        rand::thread_rng().gen_range(1..=max_minutes.max(1))
    }
}

/// Sampler that always returns the same duration, clamped to the bound.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub u64);

impl DurationSampler for FixedSampler {
    fn sample_minutes(&self, max_minutes: u64) -> u64 {
        self.0.clamp(1, max_minutes.max(1))
    }
}

/// Apply the randomize-app-duration transform to a response payload.
///
/// The payload must carry a usage-log array: either the payload itself, a
/// top-level `logs` field, or a `logs` field under `params` or `data`.
/// Entries keep their original positions; no entry is created or dropped.
/// The first `keep_count` target entries (by original order) pass through
/// unchanged; every later target entry keeps its begin timestamp, gets an
/// end timestamp `begin + d` for a sampled `d` of at most
/// `max_duration_minutes` minutes, and is re-attributed to the first target
/// package.
///
/// A payload without the expected shape is a `MalformedPayload` error; the
/// caller passes the original response through rather than emit a
/// half-transformed document.
pub fn randomize_app_durations(
    response: &Value,
    config: &RandomizeConfig,
    sampler: &dyn DurationSampler,
) -> EngineResult<Value> {
    let mut doc = response.clone();
    let entries = logs_slot(&mut doc)
        .ok_or_else(|| EngineError::malformed_payload("no usage-log array in payload"))?;

    for (idx, entry) in entries.iter().enumerate() {
        validate_entry(entry, idx)?;
    }

    let first_target = config
        .packages
        .first()
        .cloned()
        .unwrap_or_else(|| crate::model::DEFAULT_TARGET_PACKAGE.to_string());
    let max_minutes = config.max_duration_minutes.max(1);

    let mut kept = 0usize;
    for entry in entries.iter_mut() {
        let is_target = entry
            .get(PACKAGE_FIELD)
            .and_then(Value::as_str)
            .map_or(false, |pkg| config.packages.iter().any(|p| p == pkg));
        if !is_target {
            continue;
        }
        if kept < config.keep_count {
            kept += 1;
            continue;
        }

        let Some(begin) = entry.get(BEGIN_FIELD).and_then(Value::as_i64) else {
            continue; // unreachable: validated above
        };
        let minutes = sampler.sample_minutes(max_minutes).clamp(1, max_minutes) as i64;
        let duration_ms = minutes * MS_PER_MINUTE;
        if let Some(obj) = entry.as_object_mut() {
            obj.insert(END_FIELD.to_string(), Value::from(begin + duration_ms));
            obj.insert(DURATION_FIELD.to_string(), Value::from(duration_ms));
            obj.insert(PACKAGE_FIELD.to_string(), Value::from(first_target.clone()));
        }
    }

    Ok(doc)
}

fn validate_entry(entry: &Value, idx: usize) -> EngineResult<()> {
    let obj = entry.as_object().ok_or_else(|| {
        EngineError::malformed_payload(format!("usage-log entry {idx} is not an object"))
    })?;
    if !obj.get(PACKAGE_FIELD).map_or(false, Value::is_string) {
        return Err(EngineError::malformed_payload(format!(
            "usage-log entry {idx} is missing {PACKAGE_FIELD}"
        )));
    }
    for field in [BEGIN_FIELD, END_FIELD] {
        if obj.get(field).and_then(Value::as_i64).is_none() {
            return Err(EngineError::malformed_payload(format!(
                "usage-log entry {idx} is missing {field}"
            )));
        }
    }
    Ok(())
}

/// Locate the usage-log array inside a response payload.
fn logs_slot(doc: &mut Value) -> Option<&mut Vec<Value>> {
    if doc.is_array() {
        return doc.as_array_mut();
    }

    const PATHS: [&[&str]; 3] = [&["logs"], &["params", "logs"], &["data", "logs"]];
    let mut found: Option<&[&str]> = None;
    for path in PATHS {
        let mut cursor = &*doc;
        let mut matched = true;
        for key in path {
            match cursor.get(key) {
                Some(next) => cursor = next,
                None => {
                    matched = false;
                    break;
                }
            }
        }
        if matched && cursor.is_array() {
            found = Some(path);
            break;
        }
    }

    let mut cursor = doc;
    for key in found? {
        cursor = cursor.get_mut(key)?;
    }
    cursor.as_array_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn entry(pkg: &str, begin: i64, end: i64) -> Value {
        json!({
            PACKAGE_FIELD: pkg,
            BEGIN_FIELD: begin,
            END_FIELD: end,
            DURATION_FIELD: end - begin,
        })
    }

    fn config(packages: &[&str], max_minutes: u64, keep_count: usize) -> RandomizeConfig {
        let mut config = RandomizeConfig {
            packages: packages.iter().map(|p| p.to_string()).collect(),
            max_duration_minutes: max_minutes,
            keep_count,
        };
        config.normalize();
        config
    }

    #[test]
    fn test_keep_count_keeps_first_entries_by_original_order() {
        let response = json!({
            "logs": [
                entry("com.kingsoft", 1_000, 10_000_000),
                entry("com.other", 1_000, 2_000),
                entry("com.kingsoft", 2_000, 20_000_000),
                entry("com.kingsoft", 3_000, 30_000_000),
            ]
        });
        let config = config(&["com.kingsoft"], 30, 2);
        let out =
            randomize_app_durations(&response, &config, &FixedSampler(10)).unwrap();

        let logs = out["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 4);
        // First two targets and the non-target entry are untouched
        assert_eq!(logs[0], response["logs"][0]);
        assert_eq!(logs[1], response["logs"][1]);
        assert_eq!(logs[2], response["logs"][2]);
        // Exactly the third target entry is randomized
        assert_eq!(logs[3][BEGIN_FIELD], json!(3_000));
        assert_eq!(logs[3][END_FIELD], json!(3_000 + 10 * 60_000));
        assert_eq!(logs[3][DURATION_FIELD], json!(10 * 60_000));
    }

    #[test]
    fn test_randomized_entry_rewritten_to_first_target_package() {
        let response = json!({
            "logs": [
                entry("com.kingsoft.child", 0, 1),
            ]
        });
        let config = config(&["com.kingsoft", "com.kingsoft.child"], 30, 0);
        let out = randomize_app_durations(&response, &config, &FixedSampler(1)).unwrap();
        assert_eq!(out["logs"][0][PACKAGE_FIELD], json!("com.kingsoft"));
    }

    #[test]
    fn test_no_target_entries_is_identity() {
        let response = json!({ "logs": [entry("com.other", 0, 99)] });
        let config = config(&["com.kingsoft"], 30, 0);
        let out = randomize_app_durations(&response, &config, &FixedSampler(5)).unwrap();
        assert_eq!(out, response);
    }

    #[test]
    fn test_keep_count_at_least_target_count_is_identity() {
        let response = json!({
            "logs": [entry("com.kingsoft", 0, 1), entry("com.kingsoft", 2, 3)]
        });
        let config = config(&["com.kingsoft"], 30, 2);
        let out = randomize_app_durations(&response, &config, &FixedSampler(5)).unwrap();
        assert_eq!(out, response);
    }

    #[test]
    fn test_zero_max_duration_floors_to_one_minute() {
        let response = json!({ "logs": [entry("com.kingsoft", 1_000, 9_999_999)] });
        let config = config(&["com.kingsoft"], 0, 0);
        assert_eq!(config.max_duration_minutes, 1);
        let out = randomize_app_durations(&response, &config, &FixedSampler(99)).unwrap();
        assert_eq!(out["logs"][0][END_FIELD], json!(1_000 + 60_000));
    }

    #[test]
    fn test_logs_array_located_under_params_and_data() {
        let config = config(&["com.kingsoft"], 30, 0);
        for response in [
            json!([entry("com.kingsoft", 0, 1)]),
            json!({ "logs": [entry("com.kingsoft", 0, 1)] }),
            json!({ "params": { "logs": [entry("com.kingsoft", 0, 1)] } }),
            json!({ "data": { "logs": [entry("com.kingsoft", 0, 1)] } }),
        ] {
            let out = randomize_app_durations(&response, &config, &FixedSampler(2)).unwrap();
            assert_ne!(out, response);
        }
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let config = config(&["com.kingsoft"], 30, 0);

        // No usage-log array at all
        let err = randomize_app_durations(&json!({"code": 0}), &config, &FixedSampler(1))
            .unwrap_err();
        assert_eq!(err.kind(), "MalformedPayload");

        // Entry without the expected fields
        let err = randomize_app_durations(
            &json!({"logs": [{"mPackageName": "com.kingsoft"}]}),
            &config,
            &FixedSampler(1),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "MalformedPayload");

        // Non-object entry
        let err = randomize_app_durations(&json!({"logs": [42]}), &config, &FixedSampler(1))
            .unwrap_err();
        assert_eq!(err.kind(), "MalformedPayload");
    }

    proptest! {
        #[test]
        fn prop_randomize_preserves_count_and_bounds(
            begins in prop::collection::vec(0i64..1_000_000_000, 0..20),
            targets in prop::collection::vec(any::<bool>(), 0..20),
            max_minutes in 1u64..120,
            keep_count in 0usize..5,
            sample in 1u64..200,
        ) {
            let logs: Vec<Value> = begins
                .iter()
                .zip(targets.iter().chain(std::iter::repeat(&false)))
                .map(|(&begin, &is_target)| {
                    let pkg = if is_target { "com.kingsoft" } else { "com.other" };
                    entry(pkg, begin, begin + 123_456)
                })
                .collect();
            let response = json!({ "logs": logs });
            let config = config(&["com.kingsoft"], max_minutes, keep_count);

            let out = randomize_app_durations(&response, &config, &FixedSampler(sample)).unwrap();
            let out_logs = out["logs"].as_array().unwrap();
            let in_logs = response["logs"].as_array().unwrap();

            // No entries created or dropped
            prop_assert_eq!(out_logs.len(), in_logs.len());

            let mut unchanged_targets = 0usize;
            for (orig, new) in in_logs.iter().zip(out_logs) {
                let pkg = orig[PACKAGE_FIELD].as_str().unwrap();
                if pkg != "com.kingsoft" {
                    // Non-target entries are byte-identical
                    prop_assert_eq!(orig, new);
                    continue;
                }
                if orig == new {
                    unchanged_targets += 1;
                    continue;
                }
                let begin = new[BEGIN_FIELD].as_i64().unwrap();
                let end = new[END_FIELD].as_i64().unwrap();
                prop_assert_eq!(begin, orig[BEGIN_FIELD].as_i64().unwrap());
                prop_assert!(end >= begin);
                prop_assert!(end - begin <= (max_minutes as i64) * 60_000);
            }
            // Original durations are never a whole number of minutes, so a
            // randomized entry can never equal its input.
            prop_assert!(unchanged_targets <= keep_count);
        }
    }
}
