use serde::{Deserialize, Serialize};
use uuid::Uuid;

use payflow_core::OrderId;

use crate::event::Event;

/// Envelope for an event, carrying the metadata consumers need to dedupe and order.
///
/// Notes:
/// - `event_id` is unique per publication; consumers dedupe on it.
/// - `aggregate_version` is the persisted version of the order after the
///   unit of work that produced the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    aggregate_id: OrderId,
    aggregate_type: String,
    aggregate_version: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: OrderId,
        aggregate_type: impl Into<String>,
        aggregate_version: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            aggregate_version,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> OrderId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_version(&self) -> u64 {
        self.aggregate_version
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wraps `payload` with a fresh time-ordered event id.
    pub fn wrap(
        aggregate_id: OrderId,
        aggregate_type: impl Into<String>,
        aggregate_version: u64,
        payload: E,
    ) -> Self {
        Self::new(
            Uuid::now_v7(),
            aggregate_id,
            aggregate_type,
            aggregate_version,
            payload,
        )
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}
