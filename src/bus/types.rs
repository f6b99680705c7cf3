/*!
 * Bus Types
 * Lifecycle event taxonomy and rendering
 */

use crate::core::types::Pid;
use crate::registry::layout::RawBusMessage;
use serde::{Deserialize, Serialize};

/// What happened to the target process.
///
/// `Created` exists only on the bus; the stored registry status never
/// carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Terminated,
}

impl EventKind {
    #[inline]
    pub(crate) fn as_raw(self) -> u8 {
        match self {
            EventKind::Created => 0,
            EventKind::Terminated => 1,
        }
    }

    #[inline]
    pub(crate) fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(EventKind::Created),
            1 => Some(EventKind::Terminated),
            _ => None,
        }
    }
}

/// One lifecycle event as delivered to an instance's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BusEvent {
    pub kind: EventKind,
    /// Instance that published the event.
    pub sender_pid: Pid,
    /// Process the event concerns.
    pub target_pid: Pid,
}

impl BusEvent {
    pub(crate) fn from_raw(raw: &RawBusMessage) -> Option<Self> {
        Some(Self {
            kind: EventKind::from_raw(raw.kind)?,
            sender_pid: raw.sender_pid,
            target_pid: raw.target_pid,
        })
    }

    /// Human-readable notice handed to UI callbacks.
    #[must_use]
    pub fn render(&self) -> String {
        match self.kind {
            EventKind::Created => {
                format!("Process {} created by instance {}", self.target_pid, self.sender_pid)
            }
            EventKind::Terminated => format!("Process {} terminated", self.target_pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_created() {
        let event = BusEvent {
            kind: EventKind::Created,
            sender_pid: 7,
            target_pid: 1234,
        };
        assert_eq!(event.render(), "Process 1234 created by instance 7");
    }

    #[test]
    fn test_render_terminated() {
        let event = BusEvent {
            kind: EventKind::Terminated,
            sender_pid: 7,
            target_pid: 1234,
        };
        assert_eq!(event.render(), "Process 1234 terminated");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = RawBusMessage::new(9, 1, 2);
        assert!(BusEvent::from_raw(&raw).is_none());
    }
}
