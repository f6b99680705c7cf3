/*!
 * Event Hub
 * Local fan-out of rendered notices to whatever the UI layer registered
 */

use parking_lot::RwLock;
use std::sync::Arc;

/// Callback receiving rendered event strings.
pub type EventSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Fan-out point for human-readable notices within one instance.
///
/// The reconciler and the bus listener emit here; the UI layer subscribes.
/// Purely local; nothing crosses a process boundary.
#[derive(Clone, Default)]
pub struct EventHub {
    sinks: Arc<RwLock<Vec<EventSink>>>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: EventSink) {
        self.sinks.write().push(sink);
    }

    pub fn emit(&self, message: &str) {
        for sink in self.sinks.read().iter() {
            sink(message);
        }
    }
}
