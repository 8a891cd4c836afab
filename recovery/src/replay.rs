//! Manual dead-letter replay
//!
//! Poisoned events never return to the pending set on their own. An
//! operator replays them after fixing the underlying handler or data:
//! the original event is requeued with a reset attempt count, or, if it
//! was compacted away, the payload preserved in the DLQ record is
//! reinserted as a fresh event.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use outbox::metrics::REPLAYED_TOTAL;
use stock_core::types::VenueId;
use stock_core::{DeadLetter, Storage, Topic};

use crate::error::Result;

/// Which dead letters a replay run targets; empty filter matches all
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    /// Only letters whose event carries this topic
    pub topic: Option<Topic>,
    /// Only the letter for this event id
    pub event_id: Option<Uuid>,
}

impl DlqFilter {
    /// Match every dead letter of the venue
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one topic
    pub fn topic(topic: Topic) -> Self {
        Self {
            topic: Some(topic),
            event_id: None,
        }
    }

    /// Restrict to one event
    pub fn event(event_id: Uuid) -> Self {
        Self {
            topic: None,
            event_id: Some(event_id),
        }
    }

    fn matches(&self, dead: &DeadLetter) -> bool {
        if let Some(topic) = self.topic {
            if dead.event.topic != topic {
                return false;
            }
        }
        if let Some(event_id) = self.event_id {
            if dead.event.event_id != event_id {
                return false;
            }
        }
        true
    }
}

/// Counters reported by one replay run
#[derive(Debug, Clone, Serialize)]
pub struct ReplayStats {
    /// Venue replayed
    pub venue: VenueId,
    /// Dead letters matched by the filter
    pub matched: u64,
    /// Original events returned to the pending set
    pub requeued: u64,
    /// Events reinserted from the preserved DLQ payload
    pub reinserted: u64,
}

/// Replay matching dead letters for one venue.
///
/// Each replayed letter stays in the DLQ with its replay count bumped,
/// so repeated poisoning is visible to the operator.
pub fn replay_dlq(
    storage: &Arc<Storage>,
    venue: &VenueId,
    filter: &DlqFilter,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats {
        venue: venue.clone(),
        matched: 0,
        requeued: 0,
        reinserted: 0,
    };

    for mut dead in storage.dead_letters()? {
        if dead.event.venue != *venue || !filter.matches(&dead) {
            continue;
        }
        stats.matched += 1;

        match storage.requeue_event(dead.event.event_id)? {
            Some(event) => {
                stats.requeued += 1;
                info!(
                    event_id = %event.event_id,
                    topic = %event.topic,
                    replay_count = dead.replay_count + 1,
                    "dead letter requeued"
                );
            }
            None => {
                // Original compacted away: reinsert under a new identity
                let mut fresh = dead.event.clone();
                fresh.event_id = Uuid::now_v7();
                fresh.created_at = Utc::now();
                fresh.consumed_at = None;
                fresh.attempts = 0;
                fresh.last_error = None;
                fresh.next_visible_at = None;
                storage.insert_events(std::slice::from_ref(&fresh))?;
                stats.reinserted += 1;
                info!(
                    event_id = %fresh.event_id,
                    original = %dead.event.event_id,
                    topic = %fresh.topic,
                    "dead letter reinserted as a fresh event"
                );
            }
        }

        dead.replay_count += 1;
        storage.update_dead_letter(&dead)?;
        REPLAYED_TOTAL.inc();
    }

    Ok(stats)
}
