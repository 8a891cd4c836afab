//! Outbox event envelope and typed payloads
//!
//! Payloads are a closed sum over (topic, schema version) pairs, so an
//! unknown combination cannot be emitted. The envelope keeps the payload
//! as opaque bytes: a corrupted or unreadable payload must still claim,
//! retry, and poison out to the dead-letter store like any other failure.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ActorId, ItemId, SourceRef, StockAction, Unit, VenueId};

/// Current schema version for all topics
pub const SCHEMA_V1: u16 = 1;

/// Event topic (dotted, closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A ledger entry was committed
    StockMovement,
    /// An append left the balance negative (policy ALLOW or WARN)
    StockNegativeWarning,
    /// The on-hand projection observed a negative balance
    StockNegativeDetected,
    /// A kitchen display ticket line was closed
    KdsTicketClosed,
    /// An audit entry was committed
    AuditRecorded,
}

impl Topic {
    /// Dotted topic name
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::StockMovement => "stock.movement",
            Topic::StockNegativeWarning => "stock.negative-warning",
            Topic::StockNegativeDetected => "stock.negative-detected",
            Topic::KdsTicketClosed => "kds.ticket.closed",
            Topic::AuditRecorded => "audit.recorded",
        }
    }

    /// Parse a dotted topic name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stock.movement" => Some(Topic::StockMovement),
            "stock.negative-warning" => Some(Topic::StockNegativeWarning),
            "stock.negative-detected" => Some(Topic::StockNegativeDetected),
            "kds.ticket.closed" => Some(Topic::KdsTicketClosed),
            "audit.recorded" => Some(Topic::AuditRecorded),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed event payload, one variant per (topic, schema version)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// `stock.movement` v1
    StockMovementV1 {
        /// Venue of the movement
        venue: VenueId,
        /// Ledger sequence of the entry
        sequence: u64,
        /// Item moved
        item: ItemId,
        /// Movement direction
        action: StockAction,
        /// Signed quantity applied to the balance
        quantity: Decimal,
        /// Measurement unit
        unit: Unit,
        /// Lot id, if tracked
        lot: Option<String>,
        /// Lot expiry, if known
        expiry: Option<NaiveDate>,
        /// Reason code
        reason: String,
        /// Originating domain object
        source: SourceRef,
        /// Acting staff member or system
        actor: ActorId,
        /// Real-world time of the movement
        occurred_at: DateTime<Utc>,
        /// Set under the WARN policy when the post-apply balance is negative
        risk_tag: Option<String>,
    },

    /// `stock.negative-warning` v1, emitted in the append batch
    NegativeStockWarningV1 {
        /// Venue of the movement
        venue: VenueId,
        /// Item whose balance went negative
        item: ItemId,
        /// Post-apply balance
        balance: Decimal,
        /// Ledger sequence of the entry that crossed zero
        sequence: u64,
    },

    /// `stock.negative-detected` v1, emitted by the on-hand projection
    NegativeStockDetectedV1 {
        /// Venue of the projection
        venue: VenueId,
        /// Item whose projected balance is negative
        item: ItemId,
        /// Projected balance at detection time
        balance: Decimal,
        /// Ledger sequences of the most recent movements for the item
        recent_sequences: Vec<u64>,
        /// Causal hypothesis derived from the recent window
        hypothesis: String,
        /// When the projection observed the negative balance
        detected_at: DateTime<Utc>,
    },

    /// `kds.ticket.closed` v1
    KdsTicketClosedV1 {
        /// Venue of the kitchen
        venue: VenueId,
        /// Ticket identifier
        ticket_id: String,
        /// Station that worked the line ("grill", "fryer", ...)
        station: String,
        /// Item prepared
        item: ItemId,
        /// Preparation time in milliseconds
        elapsed_ms: u64,
        /// When the line was closed
        closed_at: DateTime<Utc>,
    },

    /// `audit.recorded` v1
    AuditRecordedV1 {
        /// Venue of the audit stream
        venue: VenueId,
        /// Audit sequence of the entry
        sequence: u64,
        /// Dotted action key
        action: String,
        /// Kind of the affected resource
        resource_kind: String,
        /// Id of the affected resource
        resource_id: String,
        /// Acting staff member or system
        actor: ActorId,
    },
}

impl EventPayload {
    /// Topic this payload belongs to
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::StockMovementV1 { .. } => Topic::StockMovement,
            EventPayload::NegativeStockWarningV1 { .. } => Topic::StockNegativeWarning,
            EventPayload::NegativeStockDetectedV1 { .. } => Topic::StockNegativeDetected,
            EventPayload::KdsTicketClosedV1 { .. } => Topic::KdsTicketClosed,
            EventPayload::AuditRecordedV1 { .. } => Topic::AuditRecorded,
        }
    }

    /// Schema version of this payload
    pub fn schema_version(&self) -> u16 {
        SCHEMA_V1
    }

    /// Venue the payload belongs to
    pub fn venue(&self) -> &VenueId {
        match self {
            EventPayload::StockMovementV1 { venue, .. }
            | EventPayload::NegativeStockWarningV1 { venue, .. }
            | EventPayload::NegativeStockDetectedV1 { venue, .. }
            | EventPayload::KdsTicketClosedV1 { venue, .. }
            | EventPayload::AuditRecordedV1 { venue, .. } => venue,
        }
    }

    /// Default partition key.
    ///
    /// Stock topics order per (venue, item), kitchen stats per
    /// (venue, station), audit per venue.
    pub fn partition_key(&self) -> String {
        match self {
            EventPayload::StockMovementV1 { venue, item, .. }
            | EventPayload::NegativeStockWarningV1 { venue, item, .. }
            | EventPayload::NegativeStockDetectedV1 { venue, item, .. } => {
                format!("{}/{}", venue, item)
            }
            EventPayload::KdsTicketClosedV1 { venue, station, .. } => {
                format!("{}/{}", venue, station)
            }
            EventPayload::AuditRecordedV1 { venue, .. } => venue.to_string(),
        }
    }

    /// Serialize to envelope bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Durable event awaiting dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Globally unique id (UUIDv7, so key order is creation order)
    pub event_id: Uuid,

    /// Venue owning the event
    pub venue: VenueId,

    /// Topic handlers subscribe to
    pub topic: Topic,

    /// Partition key; delivery order is strict within one key
    pub partition_key: String,

    /// Schema version of the payload bytes
    pub schema_version: u16,

    /// Opaque payload bytes (bincode of [`EventPayload`])
    pub payload: Vec<u8>,

    /// Creation time, set in the producing transaction
    pub created_at: DateTime<Utc>,

    /// Set exactly once, on successful dispatch or on the DLQ move
    pub consumed_at: Option<DateTime<Utc>>,

    /// Number of claims so far
    pub attempts: u32,

    /// Error reported by the most recent failed dispatch
    pub last_error: Option<String>,

    /// Not claimable before this time; `None` means visible now
    pub next_visible_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Build a pending event from a typed payload with the default
    /// partition key
    pub fn new(payload: &EventPayload) -> Result<Self> {
        Self::with_partition_key(payload, payload.partition_key())
    }

    /// Build a pending event with an explicit partition key
    pub fn with_partition_key(payload: &EventPayload, partition_key: String) -> Result<Self> {
        if partition_key.is_empty() {
            return Err(Error::Validation(
                "partition key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            event_id: Uuid::now_v7(),
            venue: payload.venue().clone(),
            topic: payload.topic(),
            partition_key,
            schema_version: payload.schema_version(),
            payload: payload.encode()?,
            created_at: Utc::now(),
            consumed_at: None,
            attempts: 0,
            last_error: None,
            next_visible_at: None,
        })
    }

    /// Whether the consumer may claim this event at `now`
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.next_visible_at.map_or(true, |at| at <= now)
    }

    /// Whether the event still awaits a terminal outcome
    pub fn is_pending(&self) -> bool {
        self.consumed_at.is_none()
    }

    /// Decode the typed payload, checking schema version and topic.
    ///
    /// Failures here are ordinary dispatch failures: the event keeps
    /// retrying and eventually poisons out by attempt count.
    pub fn decode_payload(&self) -> Result<EventPayload> {
        if self.schema_version != SCHEMA_V1 {
            return Err(Error::Validation(format!(
                "unsupported schema version {} for topic {}",
                self.schema_version, self.topic
            )));
        }
        let payload: EventPayload = bincode::deserialize(&self.payload)?;
        if payload.topic() != self.topic {
            return Err(Error::Validation(format!(
                "payload topic {} does not match envelope topic {}",
                payload.topic(),
                self.topic
            )));
        }
        Ok(payload)
    }
}

/// An event whose dispatch exhausted its retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The original event, frozen at move time
    pub event: OutboxEvent,
    /// When the move happened
    pub moved_at: DateTime<Utc>,
    /// The failure that exhausted the budget
    pub final_error: String,
    /// Job key of the consumer that gave up
    pub consumer: String,
    /// Number of manual replays so far
    pub replay_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement_payload() -> EventPayload {
        EventPayload::StockMovementV1 {
            venue: VenueId::new("V1"),
            sequence: 1,
            item: ItemId::new("flour"),
            action: StockAction::In,
            quantity: Decimal::from(10),
            unit: Unit::Kilogram,
            lot: None,
            expiry: None,
            reason: "delivery".to_string(),
            source: SourceRef::new("grn", "G1"),
            actor: ActorId::new("alice"),
            occurred_at: Utc::now(),
            risk_tag: None,
        }
    }

    #[test]
    fn test_topic_names_round_trip() {
        for topic in [
            Topic::StockMovement,
            Topic::StockNegativeWarning,
            Topic::StockNegativeDetected,
            Topic::KdsTicketClosed,
            Topic::AuditRecorded,
        ] {
            assert_eq!(Topic::parse(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::parse("stock.unknown"), None);
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = movement_payload();
        let event = OutboxEvent::new(&payload).unwrap();

        assert_eq!(event.topic, Topic::StockMovement);
        assert_eq!(event.partition_key, "V1/flour");
        assert_eq!(event.schema_version, SCHEMA_V1);
        assert_eq!(event.decode_payload().unwrap(), payload);
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let mut event = OutboxEvent::new(&movement_payload()).unwrap();
        event.schema_version = 2;

        let err = event.decode_payload().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_topic_mismatch_rejected() {
        let mut event = OutboxEvent::new(&movement_payload()).unwrap();
        event.topic = Topic::KdsTicketClosed;

        assert!(event.decode_payload().is_err());
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut event = OutboxEvent::new(&movement_payload()).unwrap();
        event.payload = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

        assert!(event.decode_payload().is_err());
    }

    #[test]
    fn test_visibility() {
        let now = Utc::now();
        let mut event = OutboxEvent::new(&movement_payload()).unwrap();
        assert!(event.is_visible(now));

        event.next_visible_at = Some(now + chrono::Duration::seconds(30));
        assert!(!event.is_visible(now));
        assert!(event.is_visible(now + chrono::Duration::seconds(31)));

        event.consumed_at = Some(now);
        assert!(!event.is_visible(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn test_event_ids_are_time_ordered() {
        let a = OutboxEvent::new(&movement_payload()).unwrap();
        let b = OutboxEvent::new(&movement_payload()).unwrap();
        assert!(a.event_id < b.event_id);
    }
}
