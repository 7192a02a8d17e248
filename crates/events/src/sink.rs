//! Event sinks: fire-and-forget destinations for published envelopes.
//!
//! A sink must never fail the caller. Implementations swallow (and log) their
//! own errors so a broken observer cannot block a job transition.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::{Event, EventEnvelope};

/// Destination for published events.
pub trait EventSink<E>: Send + Sync {
    fn publish(&self, envelope: EventEnvelope<E>);
}

impl<E, S> EventSink<E> for Arc<S>
where
    S: EventSink<E> + ?Sized,
{
    fn publish(&self, envelope: EventEnvelope<E>) {
        (**self).publish(envelope)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl<E> EventSink<E> for NullEventSink {
    fn publish(&self, _envelope: EventEnvelope<E>) {}
}

/// Emits one structured `tracing` record per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl<E> EventSink<E> for TracingEventSink
where
    E: Event + Serialize,
{
    fn publish(&self, envelope: EventEnvelope<E>) {
        let payload = match serde_json::to_string(envelope.payload()) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, event_type = envelope.payload().event_type(), "failed to serialize event");
                return;
            }
        };

        info!(
            event_type = envelope.payload().event_type(),
            event_version = envelope.payload().version(),
            stream_type = envelope.stream_type(),
            stream_id = %envelope.stream_id(),
            sequence = envelope.sequence_number(),
            correlation_id = envelope.correlation_id().unwrap_or("-"),
            occurred_at = %envelope.payload().occurred_at(),
            payload = %payload,
            "event published"
        );
    }
}

/// Records every envelope in memory (tests/dev).
#[derive(Debug)]
pub struct InMemoryEventSink<E> {
    events: Mutex<Vec<EventEnvelope<E>>>,
}

impl<E> InMemoryEventSink<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl<E: Clone> InMemoryEventSink<E> {
    /// Snapshot of everything published so far, in publish order.
    pub fn events(&self) -> Vec<EventEnvelope<E>> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Payloads only, in publish order.
    pub fn payloads(&self) -> Vec<E> {
        self.events().into_iter().map(EventEnvelope::into_payload).collect()
    }
}

impl<E> Default for InMemoryEventSink<E> {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Send> EventSink<E> for InMemoryEventSink<E> {
    fn publish(&self, envelope: EventEnvelope<E>) {
        match self.events.lock() {
            Ok(mut events) => events.push(envelope),
            Err(poisoned) => poisoned.into_inner().push(envelope),
        }
    }
}

/// Forwards each envelope to every inner sink.
pub struct FanoutSink<E> {
    sinks: Vec<Arc<dyn EventSink<E>>>,
}

impl<E> FanoutSink<E> {
    pub fn new(sinks: Vec<Arc<dyn EventSink<E>>>) -> Self {
        Self { sinks }
    }
}

impl<E: Clone + Send> EventSink<E> for FanoutSink<E> {
    fn publish(&self, envelope: EventEnvelope<E>) {
        for sink in &self.sinks {
            sink.publish(envelope.clone());
        }
    }
}
