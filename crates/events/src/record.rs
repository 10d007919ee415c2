use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use ledgerflow_core::TenantId;

use crate::Event;

/// Serialized audit record of a domain event.
///
/// Records are written in the same atomic batch as the document change they
/// describe, so the audit trail never runs ahead of (or behind) the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    /// Document the event belongs to (stringified id).
    pub subject: String,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

#[derive(Debug, Error)]
pub enum EventRecordError {
    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

impl EventRecord {
    pub fn from_event<E>(event: &E) -> Result<Self, EventRecordError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventRecordError::Serialize(e.to_string()))?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            tenant_id: event.tenant_id(),
            subject: event.subject(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
