//! Transition events and where they go.
//!
//! Domain code returns events as plain values; infrastructure wraps them in an
//! [`EventEnvelope`] and hands them to an [`EventSink`]. Publishing is a side
//! effect for observability, never a precondition of a state change.

pub mod envelope;
pub mod event;
pub mod sink;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use sink::{EventSink, FanoutSink, InMemoryEventSink, NullEventSink, TracingEventSink};
