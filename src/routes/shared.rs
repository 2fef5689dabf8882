//! Lookups and bookkeeping shared by the resource handlers.

use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    commission::CommissionSplit,
    domain::{PaymentMethod, TransactionStatus},
    infra::app_error::AppError,
    models::{CreateTransactionEntity, TransactionEntity},
    schema::{doctors, laboratories, patients, pharmacies, transactions},
};

/// `?days=` window for dashboard aggregates.
#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct DaysQuery {
    /// Number of days to include, 1 to 90 (default 7).
    pub days: Option<u32>,
}

/// Body of every `PATCH .../status` endpoint.
#[derive(Deserialize, ToSchema, Debug)]
pub struct UpdateStatusReq {
    pub status: String,
    /// Result notes (lab bookings) or consultation notes (appointments).
    pub notes: Option<String>,
}

/// Parses a status or enum value from a request, rejecting unknown values with 400.
pub fn parse_enum<T>(raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .to_uppercase()
        .parse()
        .map_err(|err: T::Err| AppError::BadRequest(err.to_string()))
}

pub fn ensure_future(scheduled_at: DateTime<Utc>) -> Result<(), AppError> {
    if scheduled_at <= Utc::now() {
        return Err(AppError::bad_request("scheduled_at must be in the future"));
    }
    Ok(())
}

/// Trims a required text field, rejecting blanks with 400.
pub fn required_text(field: &str, value: Option<String>) -> Result<String, AppError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::BadRequest(format!("{} is required", field))),
    }
}

/// Trims an optional text field, treating blanks as absent.
pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.trim().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

pub enum PaymentTarget {
    Order(i32),
    LabBooking(i32),
    Appointment(i32),
}

/// Records the mock payment for a newly created order, booking or appointment.
pub async fn record_payment(
    conn: &mut AsyncPgConnection,
    payer_user_id: i32,
    target: PaymentTarget,
    split: &CommissionSplit,
    payment_method: PaymentMethod,
) -> anyhow::Result<TransactionEntity> {
    let (order_id, lab_booking_id, appointment_id) = match target {
        PaymentTarget::Order(id) => (Some(id), None, None),
        PaymentTarget::LabBooking(id) => (None, Some(id), None),
        PaymentTarget::Appointment(id) => (None, None, Some(id)),
    };

    diesel::insert_into(transactions::table)
        .values(CreateTransactionEntity {
            user_id: payer_user_id,
            order_id,
            lab_booking_id,
            appointment_id,
            amount: split.total,
            commission_amount: split.commission,
            payment_method,
            status: TransactionStatus::Completed,
        })
        .returning(TransactionEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to record transaction")
}

macro_rules! user_id_lookup {
    ($name:ident, $table:ident) => {
        pub async fn $name(
            conn: &mut AsyncPgConnection,
            profile_id: i32,
        ) -> anyhow::Result<i32> {
            $table::table
                .find(profile_id)
                .select($table::user_id)
                .get_result(conn)
                .await
                .context(concat!("Failed to look up user of ", stringify!($table)))
        }
    };
}

user_id_lookup!(patient_user_id, patients);
user_id_lookup!(pharmacy_user_id, pharmacies);
user_id_lookup!(laboratory_user_id, laboratories);
user_id_lookup!(doctor_user_id, doctors);

/// Returns the profile's approval flag, or 404 when the profile does not exist.
pub async fn pharmacy_is_approved(
    conn: &mut AsyncPgConnection,
    pharmacy_id: i32,
) -> Result<bool, AppError> {
    pharmacies::table
        .find(pharmacy_id)
        .select(pharmacies::is_approved)
        .get_result::<bool>(conn)
        .await
        .optional()
        .context("Failed to look up pharmacy")?
        .ok_or(AppError::NotFound)
}

#[cfg(test)]
mod tests {
    use crate::domain::OrderStatus;

    use super::*;

    #[test]
    fn parse_enum_is_case_insensitive_and_rejects_unknown() {
        assert_eq!(
            parse_enum::<OrderStatus>(" confirmed ").unwrap(),
            OrderStatus::Confirmed
        );
        assert!(matches!(
            parse_enum::<OrderStatus>("SHIPPED"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn text_helpers_trim() {
        assert_eq!(required_text("name", Some("  Ann ".into())).unwrap(), "Ann");
        assert!(required_text("name", Some("   ".into())).is_err());
        assert!(required_text("name", None).is_err());
        assert_eq!(optional_text(Some(" ".into())), None);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" para "), "%para%");
        assert_eq!(like_pattern("100%_"), "%100\\%\\_%");
    }

    #[test]
    fn past_times_are_rejected() {
        assert!(ensure_future(Utc::now() - chrono::Duration::minutes(1)).is_err());
        assert!(ensure_future(Utc::now() + chrono::Duration::hours(1)).is_ok());
    }
}
