//! Enumerations persisted as upper-snake-case `TEXT` columns, and the
//! status transition rules each role is allowed to apply.

use std::{fmt, str::FromStr};

use diesel::{
    deserialize::{self, FromSql},
    pg::{Pg, PgValue},
    serialize::{self, Output, ToSql},
    sql_types::Text,
};

#[derive(Debug, thiserror::Error)]
#[error("`{value}` is not a valid {kind}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            serde::Serialize,
            serde::Deserialize,
            utoipa::ToSchema,
            diesel::AsExpression,
            diesel::FromSqlRow,
        )]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                Ok(raw.parse()?)
            }
        }
    };
}

text_enum! {
    pub enum Role {
        Patient => "PATIENT",
        Pharmacy => "PHARMACY",
        Doctor => "DOCTOR",
        Laboratory => "LABORATORY",
        DeliveryPartner => "DELIVERY_PARTNER",
        Admin => "ADMIN",
    }
}

impl Role {
    /// Providers start unapproved and stay hidden from patients until an admin approves them.
    pub fn requires_approval(&self) -> bool {
        matches!(
            self,
            Role::Pharmacy | Role::Doctor | Role::Laboratory | Role::DeliveryPartner
        )
    }
}

text_enum! {
    pub enum OrderStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Processing => "PROCESSING",
        ReadyForDelivery => "READY_FOR_DELIVERY",
        OutForDelivery => "OUT_FOR_DELIVERY",
        Delivered => "DELIVERED",
        Cancelled => "CANCELLED",
        OnHold => "ON_HOLD",
    }
}

impl OrderStatus {
    /// Transitions a pharmacy may apply to its own orders. The delivery
    /// flow owns OUT_FOR_DELIVERY and DELIVERED.
    pub fn pharmacy_can_move_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | OnHold | Cancelled)
                | (Confirmed, Processing | OnHold | Cancelled)
                | (Processing, ReadyForDelivery | OnHold | Cancelled)
                | (OnHold, Confirmed | Processing | Cancelled)
        )
    }

    pub fn patient_can_move_to(&self, next: OrderStatus) -> bool {
        matches!((self, next), (OrderStatus::Pending, OrderStatus::Cancelled))
    }
}

text_enum! {
    pub enum DeliveryStatus {
        Pending => "PENDING",
        Assigned => "ASSIGNED",
        PickedUp => "PICKED_UP",
        InTransit => "IN_TRANSIT",
        Delivered => "DELIVERED",
    }
}

impl DeliveryStatus {
    /// Transitions the assigned partner may apply. PENDING -> ASSIGNED only
    /// happens through the accept endpoint.
    pub fn partner_can_move_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Assigned, PickedUp) | (PickedUp, InTransit) | (InTransit, Delivered)
        )
    }

    /// Order status mirrored when the delivery reaches `self`.
    pub fn cascaded_order_status(&self) -> Option<OrderStatus> {
        match self {
            DeliveryStatus::PickedUp => Some(OrderStatus::OutForDelivery),
            DeliveryStatus::Delivered => Some(OrderStatus::Delivered),
            _ => None,
        }
    }
}

text_enum! {
    pub enum LabBookingStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        SampleCollected => "SAMPLE_COLLECTED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

impl LabBookingStatus {
    pub fn laboratory_can_move_to(&self, next: LabBookingStatus) -> bool {
        use LabBookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled)
                | (Confirmed, SampleCollected | Cancelled)
                | (SampleCollected, Completed)
        )
    }

    pub fn patient_can_move_to(&self, next: LabBookingStatus) -> bool {
        matches!(
            (self, next),
            (LabBookingStatus::Pending, LabBookingStatus::Cancelled)
        )
    }
}

text_enum! {
    pub enum AppointmentStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

impl AppointmentStatus {
    pub fn doctor_can_move_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled) | (Confirmed, Completed | Cancelled)
        )
    }

    pub fn patient_can_move_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!((self, next), (Pending | Confirmed, Cancelled))
    }
}

text_enum! {
    pub enum TransactionStatus {
        Completed => "COMPLETED",
    }
}

text_enum! {
    pub enum PaymentMethod {
        Card => "CARD",
        Upi => "UPI",
        CashOnDelivery => "CASH_ON_DELIVERY",
        Wallet => "WALLET",
    }
}

text_enum! {
    pub enum NotificationKind {
        Order => "ORDER",
        Delivery => "DELIVERY",
        LabBooking => "LAB_BOOKING",
        Appointment => "APPOINTMENT",
        Account => "ACCOUNT",
        System => "SYSTEM",
    }
}

text_enum! {
    pub enum OutboxStatus {
        Pending => "PENDING",
        Sent => "SENT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trips_through_from_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        assert!("DRIVER".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_upper_snake_case() {
        let json = serde_json::to_string(&OrderStatus::ReadyForDelivery).unwrap();
        assert_eq!(json, "\"READY_FOR_DELIVERY\"");
        let parsed: DeliveryStatus = serde_json::from_str("\"IN_TRANSIT\"").unwrap();
        assert_eq!(parsed, DeliveryStatus::InTransit);
    }

    #[test]
    fn only_providers_need_approval() {
        assert!(Role::Pharmacy.requires_approval());
        assert!(Role::DeliveryPartner.requires_approval());
        assert!(!Role::Patient.requires_approval());
        assert!(!Role::Admin.requires_approval());
    }

    #[test]
    fn pharmacy_cannot_skip_to_delivery_states() {
        assert!(OrderStatus::Pending.pharmacy_can_move_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Processing.pharmacy_can_move_to(OrderStatus::ReadyForDelivery));
        assert!(!OrderStatus::Pending.pharmacy_can_move_to(OrderStatus::ReadyForDelivery));
        assert!(!OrderStatus::ReadyForDelivery.pharmacy_can_move_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.pharmacy_can_move_to(OrderStatus::Cancelled));
    }

    #[test]
    fn patient_can_only_cancel_pending_orders() {
        assert!(OrderStatus::Pending.patient_can_move_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Confirmed.patient_can_move_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.patient_can_move_to(OrderStatus::Confirmed));
    }

    #[test]
    fn delivery_moves_forward_one_step_at_a_time() {
        use DeliveryStatus::*;
        assert!(Assigned.partner_can_move_to(PickedUp));
        assert!(PickedUp.partner_can_move_to(InTransit));
        assert!(InTransit.partner_can_move_to(Delivered));
        assert!(!Assigned.partner_can_move_to(Delivered));
        assert!(!Pending.partner_can_move_to(Assigned));
        assert!(!Delivered.partner_can_move_to(InTransit));
    }

    #[test]
    fn delivery_cascades_to_order() {
        assert_eq!(
            DeliveryStatus::PickedUp.cascaded_order_status(),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(
            DeliveryStatus::Delivered.cascaded_order_status(),
            Some(OrderStatus::Delivered)
        );
        assert_eq!(DeliveryStatus::InTransit.cascaded_order_status(), None);
    }

    #[test]
    fn lab_and_appointment_rules() {
        assert!(LabBookingStatus::Confirmed.laboratory_can_move_to(LabBookingStatus::SampleCollected));
        assert!(!LabBookingStatus::Pending.laboratory_can_move_to(LabBookingStatus::Completed));
        assert!(!LabBookingStatus::Confirmed.patient_can_move_to(LabBookingStatus::Cancelled));

        assert!(AppointmentStatus::Confirmed.doctor_can_move_to(AppointmentStatus::Completed));
        assert!(!AppointmentStatus::Pending.doctor_can_move_to(AppointmentStatus::Completed));
        assert!(AppointmentStatus::Confirmed.patient_can_move_to(AppointmentStatus::Cancelled));
        assert!(!AppointmentStatus::Completed.patient_can_move_to(AppointmentStatus::Cancelled));
    }
}
