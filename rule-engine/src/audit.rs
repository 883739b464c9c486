//! Audit/Log Emitter Boundary
//!
//! Every decided call produces one [`CallRecord`] for the admin log view.
//! Recording is fire-and-forget: a failed write is logged and never blocks
//! or fails the call pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::model::ActionKind;

/// Record of one intercepted RPC invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub method: String,
    /// Caller email, absent for calls with no identifiable user.
    pub email: Option<String>,
    pub request_body: String,
    pub response_body: String,
    /// Set only when the outgoing request differs from the original.
    pub intercepted_request: Option<String>,
    /// Set only when the outgoing response differs from the original.
    pub intercepted_response: Option<String>,
    /// Action applied to the request side, if any.
    pub request_action: Option<ActionKind>,
    /// Action applied to the response side, if any.
    pub response_action: Option<ActionKind>,
    /// The rule that was selected for this call, if any.
    pub rule_id: Option<i64>,
    /// Why the call degraded to passthrough, when it did.
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    /// Record for a call that went through unmodified.
    pub fn passthrough(
        method: impl Into<String>,
        email: Option<String>,
        request_body: String,
        response_body: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            email,
            request_body,
            response_body,
            intercepted_request: None,
            intercepted_response: None,
            request_action: None,
            response_action: None,
            rule_id: None,
            failure: None,
            created_at: Utc::now(),
        }
    }
}

/// Receiver of call records, external to the engine.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: CallRecord) -> EngineResult<()>;
}

#[async_trait]
impl<T: AuditSink + ?Sized> AuditSink for std::sync::Arc<T> {
    async fn record(&self, record: CallRecord) -> EngineResult<()> {
        self.as_ref().record(record).await
    }
}

/// In-process audit sink collecting records for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<CallRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<CallRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: CallRecord) -> EngineResult<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
