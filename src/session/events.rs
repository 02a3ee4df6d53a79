use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use super::CountSession;
use crate::detect::Template;

/// Notifications for observers (UI overlays, loggers, sync writers).
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started { session_id: String, template: Template },
    Paused,
    Resumed,
    DetectionsUpdated { active: usize },
    ManualAdded { detection_id: String },
    RemovalToggled { detection_id: String, removed: bool },
    Confirmed(Box<CountSession>),
    Stopped { cancelled: bool },
    MarkersCleared,
    ProcessingHalted { reason: String },
    ProcessingResumed,
}

/// Fan-out of events to channel subscribers. Disconnected receivers are
/// pruned on the next publish.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            log::warn!("session event bus lock poisoned; dropping {:?}", event);
            return;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
