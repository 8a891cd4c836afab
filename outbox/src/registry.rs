//! Handler registration by topic

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use stock_core::{EventPayload, OutboxEvent, Topic};

use crate::Result;

/// Topic handler invoked by the consumer.
///
/// Handlers must be idempotent per event id: the consumer delivers
/// at-least-once, and rebuilds re-deliver the whole stream.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name, used in logs and failure records
    fn name(&self) -> &str;

    /// Apply one event
    async fn handle(&self, event: &OutboxEvent, payload: &EventPayload) -> Result<()>;
}

/// Handlers grouped by topic, invoked in registration order
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Topic, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a topic
    pub fn register(&mut self, topic: Topic, handler: Arc<dyn EventHandler>) {
        info!(topic = %topic, handler = handler.name(), "handler registered");
        self.handlers.entry(topic).or_default().push(handler);
    }

    /// Handlers for a topic, in registration order
    pub fn handlers_for(&self, topic: Topic) -> &[Arc<dyn EventHandler>] {
        self.handlers
            .get(&topic)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any handler subscribes to the topic
    pub fn has_handlers(&self, topic: Topic) -> bool {
        !self.handlers_for(topic).is_empty()
    }

    /// Topics with at least one handler
    pub fn topics(&self) -> Vec<Topic> {
        self.handlers.keys().copied().collect()
    }
}
