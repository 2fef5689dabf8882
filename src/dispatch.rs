//! In-process fan-out of dispatch events to connected delivery partners.
//!
//! Delivery is best-effort: a subscriber that falls behind by more than the
//! channel capacity skips the missed messages, and nothing is replayed for
//! partners that connect later. The `available` listing is the source of truth.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::events::{
    DELIVERY_ASSIGNED, DELIVERY_REQUESTED, DeliveryAssignedEvent, DeliveryRequestedEvent,
};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DispatchMessage {
    Requested(DeliveryRequestedEvent),
    Assigned(DeliveryAssignedEvent),
}

impl DispatchMessage {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            DispatchMessage::Requested(_) => "delivery_requested",
            DispatchMessage::Assigned(_) => "delivery_assigned",
        }
    }

    /// Decodes an outbox/AMQP payload. Returns `None` for event types that
    /// are not meant for delivery partners.
    pub fn decode(event_type: &str, payload: &[u8]) -> Result<Option<Self>> {
        let message = match event_type {
            DELIVERY_REQUESTED => DispatchMessage::Requested(
                serde_json::from_slice(payload).context("Invalid delivery_requested payload")?,
            ),
            DELIVERY_ASSIGNED => DispatchMessage::Assigned(
                serde_json::from_slice(payload).context("Invalid delivery_assigned payload")?,
            ),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

#[derive(Clone)]
pub struct DispatchHub {
    sender: broadcast::Sender<DispatchMessage>,
}

impl DispatchHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchMessage> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the message.
    pub fn broadcast(&self, message: DispatchMessage) -> usize {
        // An error only means nobody is listening right now.
        self.sender.send(message).unwrap_or(0)
    }

    /// Decodes and broadcasts a raw event. Unknown event types are ignored.
    pub fn forward(&self, event_type: &str, payload: &[u8]) -> Result<usize> {
        match DispatchMessage::decode(event_type, payload)? {
            Some(message) => Ok(self.broadcast(message)),
            None => Ok(0),
        }
    }
}

impl Default for DispatchHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn requested() -> DeliveryRequestedEvent {
        DeliveryRequestedEvent {
            delivery_id: Uuid::new_v4(),
            order_id: 42,
            pharmacy_id: 3,
            pharmacy_name: "Corner Pharmacy".into(),
            pickup_address: "1 Main St".into(),
            delivery_address: "9 Side St".into(),
            requested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn forwards_to_every_subscriber() {
        let hub = DispatchHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        let event = requested();
        let payload = serde_json::to_vec(&event).unwrap();
        assert_eq!(hub.forward(DELIVERY_REQUESTED, &payload).unwrap(), 2);

        let expected = DispatchMessage::Requested(event);
        assert_eq!(first.recv().await.unwrap(), expected);
        assert_eq!(second.recv().await.unwrap(), expected);
    }

    #[test]
    fn broadcasting_without_listeners_is_not_an_error() {
        let hub = DispatchHub::new();
        let payload = serde_json::to_vec(&requested()).unwrap();
        assert_eq!(hub.forward(DELIVERY_REQUESTED, &payload).unwrap(), 0);
    }

    #[test]
    fn ignores_unrelated_events_and_rejects_bad_payloads() {
        assert!(DispatchMessage::decode("orders.order_created", b"{}").unwrap().is_none());
        assert!(DispatchMessage::decode(DELIVERY_ASSIGNED, b"not json").is_err());
    }

    #[test]
    fn event_names() {
        let assigned = DispatchMessage::Assigned(DeliveryAssignedEvent {
            delivery_id: Uuid::new_v4(),
            order_id: 1,
            delivery_partner_id: 2,
        });
        assert_eq!(assigned.name(), "delivery_assigned");
        assert_eq!(DispatchMessage::Requested(requested()).name(), "delivery_requested");
    }
}
