//! Polling consumer with per-key ordering
//!
//! One logical consumer drains the outbox. Each tick scans the pending
//! index in creation order and claims at most one event per partition
//! key: any earlier pending event for a key, visible or not, blocks the
//! events behind it. Claims are compare-and-set on the attempt count,
//! so an event claimed by a crashed process reappears after its
//! visibility timeout without double-claiming.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use stock_core::config::OutboxConfig;
use stock_core::types::{HeartbeatStatus, JobHeartbeat};
use stock_core::{DeadLetter, EventPayload, OutboxEvent, Storage, SCHEMA_V1};

use crate::backoff::retry_delay;
use crate::metrics::{
    CLAIM_BATCH_SIZE, DISPATCH_DURATION, DISPATCH_TOTAL, DLQ_TOTAL, PENDING_EVENTS,
};
use crate::registry::{EventHandler, HandlerRegistry};
use crate::{Error, Result};

/// Job key the consumer writes heartbeats under
pub const CONSUMER_JOB_KEY: &str = "outbox-consumer";

/// Polling consumer that drains the outbox
pub struct OutboxConsumer {
    storage: Arc<Storage>,
    registry: Arc<HandlerRegistry>,
    config: OutboxConfig,
}

impl OutboxConsumer {
    /// Create a consumer over the shared store and handler registry
    pub fn new(storage: Arc<Storage>, registry: Arc<HandlerRegistry>, config: &OutboxConfig) -> Self {
        Self {
            storage,
            registry,
            config: config.clone(),
        }
    }

    /// Run until the shutdown signal flips to true or its sender drops
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "outbox consumer started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(dispatched) => {
                            if dispatched > 0 {
                                debug!(dispatched, "tick complete");
                            }
                            self.beat(HeartbeatStatus::Ok, None);
                        }
                        Err(e) => {
                            warn!("consumer tick failed: {}", e);
                            self.beat(HeartbeatStatus::Warn, Some(e.to_string()));
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.beat(HeartbeatStatus::Stopped, None);
        info!("outbox consumer stopped");
    }

    /// One poll cycle; returns the number of events dispatched.
    ///
    /// Public so recovery drills and tests can drive the consumer
    /// without the ticker.
    pub async fn tick(&self) -> Result<usize> {
        let now = Utc::now();
        let pending = self.storage.pending_events()?;
        PENDING_EVENTS.set(pending.len() as i64);

        // One claim per partition key per tick. The first pending event
        // for a key blocks the rest, so a backing-off head is never
        // overtaken by its successors.
        let mut seen_keys = HashSet::new();
        let mut claims = Vec::new();
        for event in pending {
            if !seen_keys.insert(event.partition_key.clone()) {
                continue;
            }
            if !event.is_visible(now) {
                continue;
            }
            if let Some(claimed) = self.storage.claim_event(
                event.event_id,
                event.attempts,
                now + self.config.visibility_timeout(),
            )? {
                claims.push(claimed);
            }
            if claims.len() >= self.config.batch_size {
                break;
            }
        }

        if claims.is_empty() {
            return Ok(0);
        }
        CLAIM_BATCH_SIZE.observe(claims.len() as f64);

        // Every claim holds a distinct partition key, so the whole
        // batch can dispatch concurrently.
        let results = join_all(claims.into_iter().map(|event| self.dispatch(event))).await;
        let dispatched = results.len();
        for result in results {
            result?;
        }
        Ok(dispatched)
    }

    /// Dispatch one claimed event to every handler for its topic
    async fn dispatch(&self, event: OutboxEvent) -> Result<()> {
        let topic = event.topic;
        let handlers = self.registry.handlers_for(topic);

        // Nothing subscribes: consume immediately so the queue drains
        if handlers.is_empty() {
            self.storage.mark_consumed(&event, Utc::now())?;
            DISPATCH_TOTAL
                .with_label_values(&[topic.as_str(), "skipped"])
                .inc();
            return Ok(());
        }

        let started = Instant::now();
        let outcome = self.run_handlers(&event, handlers).await;
        DISPATCH_DURATION
            .with_label_values(&[topic.as_str()])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                self.storage.mark_consumed(&event, Utc::now())?;
                DISPATCH_TOTAL
                    .with_label_values(&[topic.as_str(), "ok"])
                    .inc();
                debug!(event_id = %event.event_id, topic = %topic, "event consumed");
                Ok(())
            }
            Err(failure) => self.record_failure(event, failure),
        }
    }

    /// Decode the payload and run the topic's handlers in series, each
    /// bounded by the handler deadline. A decode failure is a dispatch
    /// failure and poisons out by attempt count like any other.
    async fn run_handlers(
        &self,
        event: &OutboxEvent,
        handlers: &[Arc<dyn EventHandler>],
    ) -> Result<()> {
        if event.schema_version != SCHEMA_V1 {
            return Err(Error::UnknownSchema {
                topic: event.topic.to_string(),
                version: event.schema_version,
            });
        }
        let payload: EventPayload = event.decode_payload()?;

        for handler in handlers {
            match tokio::time::timeout(self.config.handler_timeout(), handler.handle(event, &payload))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(Error::Handler {
                        handler: handler.name().to_string(),
                        message: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(Error::Timeout {
                        handler: handler.name().to_string(),
                        after: self.config.handler_timeout(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Record a failed dispatch: back the event off, or move it to the
    /// dead-letter store once its retry budget is spent
    fn record_failure(&self, mut event: OutboxEvent, failure: Error) -> Result<()> {
        let topic = event.topic;
        DISPATCH_TOTAL
            .with_label_values(&[topic.as_str(), "error"])
            .inc();
        event.last_error = Some(failure.to_string());

        if event.attempts >= self.config.max_attempts {
            let poison = Error::Poison {
                event_id: event.event_id,
                attempts: event.attempts,
            };
            error!(topic = %topic, "{}: {}", poison, failure);

            let letter = DeadLetter {
                event,
                moved_at: Utc::now(),
                final_error: failure.to_string(),
                consumer: CONSUMER_JOB_KEY.to_string(),
                replay_count: 0,
            };
            self.storage.move_to_dlq(&letter)?;
            DLQ_TOTAL.inc();
            return Ok(());
        }

        let delay = retry_delay(&self.config, event.attempts);
        event.next_visible_at = Some(Utc::now() + delay);
        warn!(
            event_id = %event.event_id,
            topic = %topic,
            attempts = event.attempts,
            retry_in_ms = delay.num_milliseconds(),
            "dispatch failed: {}",
            failure
        );
        self.storage.update_event(&event)?;
        Ok(())
    }

    /// Write the liveness record for this tick
    fn beat(&self, status: HeartbeatStatus, last_error: Option<String>) {
        let now = Utc::now();
        let previous_success = self
            .storage
            .heartbeat(CONSUMER_JOB_KEY)
            .ok()
            .flatten()
            .and_then(|beat| beat.last_success_at);

        let beat = JobHeartbeat {
            job_key: CONSUMER_JOB_KEY.to_string(),
            last_heartbeat_at: now,
            last_success_at: if status == HeartbeatStatus::Ok {
                Some(now)
            } else {
                previous_success
            },
            status,
            last_error,
        };
        if let Err(e) = self.storage.put_heartbeat(&beat) {
            warn!("failed to write consumer heartbeat: {}", e);
        }
    }
}
