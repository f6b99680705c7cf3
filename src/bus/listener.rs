/*!
 * Bus Listener
 * Per-instance consumer of the notification bus: drops own echoes,
 * collapses duplicates, renders the rest for the UI layer
 */

use super::hub::EventHub;
use super::suppress::SuppressionWindow;
use super::types::BusEvent;
use crate::core::limits::LISTEN_WAIT;
use crate::registry::RegistryHandle;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// The listener half of an instance: a loop around bounded bus waits.
///
/// The wait timeout is the cooperative cancellation point; the stop flag is
/// observed between waits, never while the registry lock is held.
pub(crate) struct Listener {
    registry: Arc<RegistryHandle>,
    events: EventHub,
    stop: Arc<AtomicBool>,
    window: SuppressionWindow,
}

impl Listener {
    pub(crate) fn new(
        registry: Arc<RegistryHandle>,
        events: EventHub,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            events,
            stop,
            window: SuppressionWindow::new(),
        }
    }

    pub(crate) fn run(mut self) {
        debug!("Bus listener started (instance {})", self.registry.instance_id());
        while !self.stop.load(Ordering::Acquire) {
            match self.registry.next_event(LISTEN_WAIT) {
                Ok(Some(event)) => self.handle(event),
                Ok(None) => {}
                Err(e) => {
                    warn!("Bus receive failed: {e}");
                    break;
                }
            }
        }
        debug!("Bus listener stopped (instance {})", self.registry.instance_id());
    }

    fn handle(&mut self, event: BusEvent) {
        if event.sender_pid == self.registry.instance_id() {
            // our own copy of a fan-out we published
            return;
        }
        if !self.window.admit(event.target_pid, Instant::now()) {
            debug!("Suppressed duplicate notice for pid {}", event.target_pid);
            return;
        }
        self.events.emit(&event.render());
    }
}
