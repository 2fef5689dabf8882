use anyhow::Context;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    analytics::{self, DailyBucket},
    domain::{AppointmentStatus, LabBookingStatus, OrderStatus, Role},
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
    },
    routes::shared::DaysQuery,
    schema::{appointments, lab_bookings, orders},
};

type EarningRow = (DateTime<Utc>, Decimal, Decimal, Decimal);

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(utoipa_axum::routes!(get_earnings))
}

#[derive(Serialize, ToSchema, Debug, Default, PartialEq, Eq)]
pub struct EarningsTotals {
    pub count: i64,
    pub gross: Decimal,
    pub commission: Decimal,
    pub net: Decimal,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct EarningsRes {
    pub totals: EarningsTotals,
    pub days: u32,
    /// Net earnings per UTC day.
    pub daily: Vec<DailyBucket>,
}

pub fn summarize(rows: &[EarningRow]) -> EarningsTotals {
    rows.iter().fold(
        EarningsTotals::default(),
        |mut totals, (_, gross, commission, net)| {
            totals.count += 1;
            totals.gross += gross;
            totals.commission += commission;
            totals.net += net;
            totals
        },
    )
}

/// Gross, commission and net over the caller's non-cancelled orders,
/// bookings or appointments.
#[utoipa::path(
    get,
    path = "/earnings",
    tags = ["Earnings"],
    security(("bearerAuth" = [])),
    params(DaysQuery),
    responses(
        (status = 200, description = "Provider earnings", body = StdResponse<EarningsRes, String>),
        (status = 401, description = "Not a pharmacy, laboratory or doctor")
    )
)]
async fn get_earnings(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<DaysQuery>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_any(&[Role::Pharmacy, Role::Laboratory, Role::Doctor])?;
    let days = analytics::window_days(params.days);

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let rows: Vec<EarningRow> = match auth.role {
        Role::Pharmacy => orders::table
            .filter(orders::pharmacy_id.eq(auth.profile_id))
            .filter(orders::status.ne(OrderStatus::Cancelled))
            .select((
                orders::created_at,
                orders::total_amount,
                orders::commission_amount,
                orders::net_amount,
            ))
            .get_results(conn)
            .await
            .context("Failed to get order earnings")?,
        Role::Laboratory => lab_bookings::table
            .filter(lab_bookings::laboratory_id.eq(auth.profile_id))
            .filter(lab_bookings::status.ne(LabBookingStatus::Cancelled))
            .select((
                lab_bookings::created_at,
                lab_bookings::total_amount,
                lab_bookings::commission_amount,
                lab_bookings::net_amount,
            ))
            .get_results(conn)
            .await
            .context("Failed to get lab booking earnings")?,
        _ => appointments::table
            .filter(appointments::doctor_id.eq(auth.profile_id))
            .filter(appointments::status.ne(AppointmentStatus::Cancelled))
            .select((
                appointments::created_at,
                appointments::total_amount,
                appointments::commission_amount,
                appointments::net_amount,
            ))
            .get_results(conn)
            .await
            .context("Failed to get appointment earnings")?,
    };

    let totals = summarize(&rows);
    let daily = analytics::bucket_by_day(
        rows.iter().map(|(at, _, _, net)| (*at, *net)),
        Utc::now().date_naive(),
        days,
    );

    Ok(StdResponse {
        data: Some(EarningsRes {
            totals,
            days,
            daily,
        }),
        message: Some("Get earnings successfully"),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::commission;

    #[test]
    fn totals_add_up() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let rows: Vec<EarningRow> = [Decimal::new(10000, 2), Decimal::new(4999, 2)]
            .into_iter()
            .map(|amount| {
                let split = commission::split(amount);
                (at, split.total, split.commission, split.net)
            })
            .collect();

        let totals = summarize(&rows);
        assert_eq!(totals.count, 2);
        assert_eq!(totals.gross, Decimal::new(14999, 2));
        assert_eq!(totals.gross, totals.net + totals.commission);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(summarize(&[]), EarningsTotals::default());
    }
}
