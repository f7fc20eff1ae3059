use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tracing::{info, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditAction {
    Import,
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// One audited operation on one entity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEvent {
    pub fn success(
        actor: &str,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        entity_name: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            entity_name: entity_name.to_string(),
            status: AuditStatus::Success,
            error_message: None,
        }
    }

    pub fn failure(
        actor: &str,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        entity_name: &str,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: AuditStatus::Failure,
            error_message: Some(error.into()),
            ..Self::success(actor, action, entity_type, entity_id, entity_name)
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn log(&self, event: &AuditEvent) -> Result<(), CoreError>;
}

/// Writes audit events to the `dirport::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log(&self, event: &AuditEvent) -> Result<(), CoreError> {
        match event.status {
            AuditStatus::Success => info!(
                target: "dirport::audit",
                actor = %event.actor,
                action = %event.action,
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                entity_name = %event.entity_name,
                "success"
            ),
            AuditStatus::Failure => warn!(
                target: "dirport::audit",
                actor = %event.actor,
                action = %event.action,
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                entity_name = %event.entity_name,
                error = event.error_message.as_deref().unwrap_or(""),
                "failure"
            ),
        }
        Ok(())
    }
}

/// Hand an event to the sink. Sink failures are logged and dropped.
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.log(&event) {
        warn!(
            "audit sink rejected {} event for {}: {}",
            event.action, event.entity_id, e
        );
    }
}
