//! Append-only audit trail for state-changing operations.
//!
//! Audit writes are best effort: a failing sink is logged and never aborts the
//! operation being audited.
use crate::store::AuditSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Error,
}

/// Who is acting and from where.
///
/// Supplied by the caller's authentication layer; the engine does not
/// authenticate on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub actor_id: Option<u64>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn new(actor_id: Option<u64>, origin: impl Into<String>) -> Self {
        Self {
            actor_id,
            origin: Some(origin.into()),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Context for work the engine does on its own behalf.
    pub fn system() -> Self {
        Self {
            actor_id: None,
            origin: Some("system".into()),
            user_agent: None,
        }
    }
}

/// A single audit record.
///
/// # Examples
/// ```rust
/// use factura_core::audit::{AuditAction, AuditContext, AuditEntry, AuditOutcome};
///
/// let entry = AuditEntry::new(AuditAction::Delete, "customer", &AuditContext::system())
///     .entity_id("12")
///     .failed("customer has invoices");
/// assert_eq!(entry.outcome(), AuditOutcome::Error);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    recorded_at: DateTime<Utc>,
    actor_id: Option<u64>,
    action: AuditAction,
    entity_kind: String,
    entity_id: Option<String>,
    before: Option<Value>,
    after: Option<Value>,
    origin: Option<String>,
    user_agent: Option<String>,
    outcome: AuditOutcome,
    error_detail: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_kind: impl Into<String>, context: &AuditContext) -> Self {
        Self {
            recorded_at: Utc::now(),
            actor_id: context.actor_id,
            action,
            entity_kind: entity_kind.into(),
            entity_id: None,
            before: None,
            after: None,
            origin: context.origin.clone(),
            user_agent: context.user_agent.clone(),
            outcome: AuditOutcome::Success,
            error_detail: None,
        }
    }

    pub fn actor(mut self, actor_id: u64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn before(mut self, snapshot: Value) -> Self {
        self.before = Some(snapshot);
        self
    }

    pub fn after(mut self, snapshot: Value) -> Self {
        self.after = Some(snapshot);
        self
    }

    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.outcome = AuditOutcome::Error;
        self.error_detail = Some(detail.into());
        self
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn actor_id(&self) -> Option<u64> {
        self.actor_id
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn entity_kind(&self) -> &str {
        &self.entity_kind
    }

    pub fn entity(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn before_snapshot(&self) -> Option<&Value> {
        self.before.as_ref()
    }

    pub fn after_snapshot(&self) -> Option<&Value> {
        self.after.as_ref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn outcome(&self) -> AuditOutcome {
        self.outcome
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }
}

pub struct AuditLogger<'a, S: AuditSink> {
    sink: &'a S,
}

impl<'a, S: AuditSink> AuditLogger<'a, S> {
    pub fn new(sink: &'a S) -> Self {
        Self { sink }
    }

    /// Append `entry` to the sink. Never fails.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.sink.append(&entry) {
            warn!(
                action = entry.action().as_str(),
                entity = entry.entity_kind(),
                entity_id = entry.entity().unwrap_or("-"),
                error = %e,
                "audit write failed"
            );
        }
    }
}
