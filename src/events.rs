use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Routing key for a delivery that just became available for pickup.
pub const DELIVERY_REQUESTED: &str = "deliveries.delivery_requested";
/// Routing key for a delivery that a partner has claimed.
pub const DELIVERY_ASSIGNED: &str = "deliveries.delivery_assigned";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct DeliveryRequestedEvent {
    pub delivery_id: Uuid,
    pub order_id: i32,
    pub pharmacy_id: i32,
    pub pharmacy_name: String,
    pub pickup_address: String,
    pub delivery_address: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct DeliveryAssignedEvent {
    pub delivery_id: Uuid,
    pub order_id: i32,
    pub delivery_partner_id: i32,
}
