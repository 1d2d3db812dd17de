use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Notification handed to the (external) notification service when a booking
/// first reaches PAID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidNotice {
    pub booking_id: Ulid,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl PaidNotice {
    pub fn new(booking_id: Ulid) -> Self {
        Self {
            booking_id,
            message: format!("booking {booking_id} marked as paid"),
            kind: "BOOKING_PAID".into(),
        }
    }
}

/// Fan-out hub. Per-campsite broadcast channels carry booking domain events
/// (the realtime boundary); a separate stream carries paid notices (the
/// notification-service boundary). Sends never block and never fail the
/// committing mutation — no subscribers means the event is dropped.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    paid: broadcast::Sender<PaidNotice>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            paid: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to domain events for one campsite. Creates the channel if needed.
    pub fn subscribe(&self, campsite_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(campsite_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a domain event. No-op if nobody is listening.
    pub fn send(&self, campsite_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&campsite_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Subscribe to paid notices.
    pub fn paid_notices(&self) -> broadcast::Receiver<PaidNotice> {
        self.paid.subscribe()
    }

    /// Emit a paid notice. No-op if nobody is listening.
    pub fn notify_paid(&self, booking_id: Ulid) {
        let _ = self.paid.send(PaidNotice::new(booking_id));
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
