//! Rule Engine - Interception decision core for the JSON-RPC MITM proxy
//!
//! This crate decides, for each intercepted RPC call, which administrator
//! rule applies and what transformation it performs on the request or
//! response. Admin HTTP API, authentication, log storage, and the
//! transport-level interception hook live elsewhere and appear here only as
//! the narrow [`store::RuleStore`] and [`audit::AuditSink`] boundaries.

pub mod audit;
pub mod engine;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod model;
pub mod randomize;
pub mod store;

pub use audit::{AuditSink, CallRecord, MemoryAuditSink};
pub use engine::{caller_email, CallDecision, InterceptionEngine};
pub use error::{EngineError, EngineResult};
pub use executor::{apply, ExecutionOutcome};
pub use matcher::{select, RuleSnapshot};
pub use model::{
    ActionKind, RandomizeConfig, Rule, RuleAction, RuleScope, StoredRule,
    DEFAULT_TARGET_PACKAGE,
};
pub use randomize::{
    randomize_app_durations, DurationSampler, FixedSampler, ThreadRngSampler,
};
pub use store::{MemoryRuleStore, RuleStore};
