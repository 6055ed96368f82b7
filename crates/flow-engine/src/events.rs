//! Event types for observing engine progress
//!
//! The engine is the single writer; any number of sinks may subscribe.
//! Sinks are invoked synchronously on the iteration loop, so they must hand
//! slow work off (spawn, enqueue) and return quickly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::state::EngineMeta;
use crate::types::{IterationId, PortBrand, PortId, PortValue, StepId};

/// Trait for receiving engine events
///
/// This abstracts over what consumers do with events (enqueue results,
/// push notifications, collect in tests).
pub trait EventSink: Send + Sync {
    /// Handle an event
    ///
    /// Returns an error if the event could not be handled; the engine logs
    /// it and carries on.
    fn send(&self, event: &EngineEvent) -> Result<(), EventError>;
}

/// Error when handling an event fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn channel_closed() -> Self {
        Self::new("Channel closed")
    }
}

/// Value of one output port when its step finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSnapshot {
    pub port_id: PortId,
    pub port_name: String,
    pub brand: PortBrand,
    pub value: PortValue,
}

/// Events emitted by an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// An iteration is about to execute its first step
    #[serde(rename_all = "camelCase")]
    IterationStarted { iteration_id: IterationId },

    /// A step returned (successfully or not) within an iteration
    #[serde(rename_all = "camelCase")]
    StepFinished {
        iteration_id: IterationId,
        step_id: StepId,
        step_name: String,
        success: bool,
        outputs: Vec<PortSnapshot>,
    },

    /// An iteration completed, was cut short by an abort, or had failures
    #[serde(rename_all = "camelCase")]
    IterationFinished {
        iteration_id: IterationId,
        success: bool,
    },

    /// The engine moved to a new lifecycle state
    #[serde(rename_all = "camelCase")]
    StateChanged { meta: EngineMeta },
}

impl EngineEvent {
    /// Iteration this event belongs to, if any
    pub fn iteration_id(&self) -> Option<IterationId> {
        match self {
            Self::IterationStarted { iteration_id }
            | Self::StepFinished { iteration_id, .. }
            | Self::IterationFinished { iteration_id, .. } => Some(*iteration_id),
            Self::StateChanged { .. } => None,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: &EngineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<EngineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: &EngineEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct BusInner {
    next_id: AtomicU64,
    sinks: RwLock<Vec<(u64, Arc<dyn EventSink>)>>,
}

/// Fan-out of engine events to subscribed sinks
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a sink; it receives events until the handle is dropped
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sinks.write().push((id, sink));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every current subscriber, in subscription order
    pub fn publish(&self, event: &EngineEvent) {
        // Sinks run outside the lock so they may (un)subscribe themselves.
        let sinks: Vec<Arc<dyn EventSink>> = self
            .inner
            .sinks
            .read()
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        for sink in sinks {
            if let Err(e) = sink.send(event) {
                log::warn!("Event sink rejected {:?}: {}", event_name(event), e);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sinks.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn event_name(event: &EngineEvent) -> &'static str {
    match event {
        EngineEvent::IterationStarted { .. } => "IterationStarted",
        EngineEvent::StepFinished { .. } => "StepFinished",
        EngineEvent::IterationFinished { .. } => "IterationFinished",
        EngineEvent::StateChanged { .. } => "StateChanged",
    }
}

/// Handle for a registered sink; unsubscribes on drop
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Unsubscribe now (same as dropping the handle)
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.sinks.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> EngineEvent {
        EngineEvent::IterationStarted {
            iteration_id: uuid::Uuid::new_v4(),
        }
    }

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        let event = started();
        sink.send(&event).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], event);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        // Should not panic
        sink.send(&started()).unwrap();
    }

    #[test]
    fn test_bus_fans_out_to_all_subscribers() {
        let bus = EventBus::new();
        let first = Arc::new(VecEventSink::new());
        let second = Arc::new(VecEventSink::new());
        let _a = bus.subscribe(first.clone());
        let _b = bus.subscribe(second.clone());

        bus.publish(&started());

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let sink = Arc::new(VecEventSink::new());
        let subscription = bus.subscribe(sink.clone());
        assert_eq!(bus.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(&started());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_failing_sink_does_not_stop_delivery() {
        struct Failing;
        impl EventSink for Failing {
            fn send(&self, _event: &EngineEvent) -> Result<(), EventError> {
                Err(EventError::channel_closed())
            }
        }

        let bus = EventBus::new();
        let sink = Arc::new(VecEventSink::new());
        let _failing = bus.subscribe(Arc::new(Failing));
        let _ok = bus.subscribe(sink.clone());

        bus.publish(&started());
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let subscription = bus.subscribe(Arc::new(NullEventSink));
        drop(bus);
        subscription.unsubscribe();
    }

    #[test]
    fn test_event_serde_shape() {
        let id = uuid::Uuid::new_v4();
        let json = serde_json::to_value(EngineEvent::IterationFinished {
            iteration_id: id,
            success: true,
        })
        .unwrap();
        assert_eq!(json["type"], "iterationFinished");
        assert_eq!(json["iterationId"], id.to_string());
    }
}
