//! Platform administration: provider approval, user listing and the
//! revenue dashboard. Every route requires the ADMIN role.

use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    dsl::count_star,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    analytics::{self, DailyBucket},
    api::email,
    domain::{AppointmentStatus, LabBookingStatus, NotificationKind, OrderStatus, Role},
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{TransactionEntity, UserEntity},
    notifier,
    routes::shared::{DaysQuery, parse_enum},
    schema::{
        appointments, delivery_partners, doctors, lab_bookings, laboratories, orders, pharmacies,
        transactions, users,
    },
};

const DEFAULT_TRANSACTIONS_LIMIT: i64 = 100;
const MAX_TRANSACTIONS_LIMIT: i64 = 500;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/admin",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_users))
            .routes(utoipa_axum::routes!(update_approval))
            .routes(utoipa_axum::routes!(get_stats))
            .routes(utoipa_axum::routes!(get_revenue))
            .routes(utoipa_axum::routes!(get_transactions))
            .route_layer(axum::middleware::from_fn(
                middleware::admins_authorization,
            )),
    )
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct UsersQuery {
    /// Filter by role, e.g. `PHARMACY`.
    pub role: Option<String>,
    /// Only users still waiting for approval.
    pub pending: Option<bool>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct UpdateApprovalReq {
    pub is_approved: bool,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct TransactionsQuery {
    /// Newest first, 1 to 500 (default 100).
    pub limit: Option<i64>,
}

#[derive(Serialize, ToSchema, Debug, PartialEq, Eq)]
pub struct RoleCount {
    pub role: Role,
    pub count: i64,
}

#[derive(Serialize, ToSchema, Debug, Default, PartialEq, Eq)]
pub struct TypeTotals {
    /// Every record, cancelled included.
    pub count: i64,
    /// Gross over non-cancelled records.
    pub gross: Decimal,
    pub commission: Decimal,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct AdminStatsRes {
    pub users_by_role: Vec<RoleCount>,
    pub pending_approvals: i64,
    pub orders: TypeTotals,
    pub lab_bookings: TypeTotals,
    pub appointments: TypeTotals,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct RevenueRes {
    pub days: u32,
    /// Commission per UTC day.
    pub orders: Vec<DailyBucket>,
    pub lab_bookings: Vec<DailyBucket>,
    pub appointments: Vec<DailyBucket>,
}

/// One entry per role, zero when the role has no users.
pub fn fill_role_counts(rows: Vec<(Role, i64)>) -> Vec<RoleCount> {
    let counts: HashMap<Role, i64> = rows.into_iter().collect();
    Role::ALL
        .iter()
        .map(|role| RoleCount {
            role: *role,
            count: counts.get(role).copied().unwrap_or_default(),
        })
        .collect()
}

pub fn transactions_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_TRANSACTIONS_LIMIT)
        .clamp(1, MAX_TRANSACTIONS_LIMIT)
}

#[utoipa::path(
    get,
    path = "/users",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(UsersQuery),
    responses(
        (status = 200, description = "List users", body = StdResponse<Vec<UserEntity>, String>),
        (status = 401, description = "Not an administrator")
    )
)]
async fn get_users(
    State(state): State<AppState>,
    Query(params): Query<UsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let role = params
        .role
        .as_deref()
        .map(parse_enum::<Role>)
        .transpose()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = users::table.into_boxed();
    if let Some(role) = role {
        query = query.filter(users::role.eq(role));
    }
    if params.pending == Some(true) {
        query = query.filter(users::is_approved.eq(false));
    }

    let users = query
        .order_by(users::created_at.desc())
        .select(UserEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get users")?;

    Ok(StdResponse {
        data: Some(users),
        message: Some("Get users successfully"),
    })
}

async fn set_profile_approval(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    role: Role,
    is_approved: bool,
) -> anyhow::Result<()> {
    let updated = match role {
        Role::Pharmacy => {
            diesel::update(pharmacies::table.filter(pharmacies::user_id.eq(user_id)))
                .set(pharmacies::is_approved.eq(is_approved))
                .execute(conn)
                .await
        }
        Role::Laboratory => {
            diesel::update(laboratories::table.filter(laboratories::user_id.eq(user_id)))
                .set(laboratories::is_approved.eq(is_approved))
                .execute(conn)
                .await
        }
        Role::Doctor => {
            diesel::update(doctors::table.filter(doctors::user_id.eq(user_id)))
                .set(doctors::is_approved.eq(is_approved))
                .execute(conn)
                .await
        }
        Role::DeliveryPartner => {
            diesel::update(
                delivery_partners::table.filter(delivery_partners::user_id.eq(user_id)),
            )
            .set(delivery_partners::is_approved.eq(is_approved))
            .execute(conn)
            .await
        }
        Role::Patient | Role::Admin => Ok(0),
    }
    .context("Failed to update profile approval")?;

    if updated == 0 {
        anyhow::bail!("User #{} has no {} profile", user_id, role);
    }
    Ok(())
}

/// Approve or revoke a provider. The user flag and the profile flag change
/// together.
#[utoipa::path(
    patch,
    path = "/users/{id}/approval",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "User ID to approve or revoke")
    ),
    request_body = UpdateApprovalReq,
    responses(
        (status = 200, description = "Updated approval successfully", body = StdResponse<UserEntity, String>),
        (status = 400, description = "Role does not use approval"),
        (status = 404, description = "User not found")
    )
)]
async fn update_approval(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<UpdateApprovalReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user = users::table
        .find(id)
        .select(UserEntity::as_select())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to get user")?
        .ok_or(AppError::NotFound)?;

    if !user.role.requires_approval() {
        return Err(AppError::BadRequest(format!(
            "{} accounts are approved on creation",
            user.role
        )));
    }

    let is_approved = body.is_approved;
    let user = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let user = diesel::update(users::table.find(id))
                    .set(users::is_approved.eq(is_approved))
                    .returning(UserEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update user approval")?;

                set_profile_approval(conn, user.id, user.role, is_approved).await?;

                let (title, message) = if is_approved {
                    ("Account approved", "Your account has been approved by an administrator.")
                } else {
                    ("Account approval revoked", "An administrator revoked your account approval.")
                };
                notifier::notify(conn, user.id, NotificationKind::Account, title, message).await?;

                Ok::<UserEntity, AppError>(user)
            })
        })
        .await?;

    tracing::info!(
        "User #{} ({}) approval set to {}",
        user.id,
        user.role,
        user.is_approved
    );

    email::send_email_detached(
        state.http_client.clone(),
        state.config.email.clone(),
        email::approval_changed(&user.email, user.is_approved),
    );

    Ok(StdResponse {
        data: Some(user),
        message: Some("Updated approval successfully"),
    })
}

macro_rules! type_totals {
    ($conn:expr, $table:ident, $cancelled:expr) => {{
        let count: i64 = $table::table
            .select(count_star())
            .get_result($conn)
            .await
            .context(concat!("Failed to count ", stringify!($table)))?;
        let (gross, commission): (Option<Decimal>, Option<Decimal>) = $table::table
            .filter($table::status.ne($cancelled))
            .select((
                diesel::dsl::sum($table::total_amount),
                diesel::dsl::sum($table::commission_amount),
            ))
            .get_result($conn)
            .await
            .context(concat!("Failed to sum ", stringify!($table)))?;
        TypeTotals {
            count,
            gross: gross.unwrap_or_default(),
            commission: commission.unwrap_or_default(),
        }
    }};
}

#[utoipa::path(
    get,
    path = "/stats",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Platform statistics", body = StdResponse<AdminStatsRes, String>),
        (status = 401, description = "Not an administrator")
    )
)]
async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let role_rows: Vec<(Role, i64)> = users::table
        .group_by(users::role)
        .select((users::role, count_star()))
        .get_results(conn)
        .await
        .context("Failed to count users")?;
    let pending_approvals: i64 = users::table
        .filter(users::is_approved.eq(false))
        .select(count_star())
        .get_result(conn)
        .await
        .context("Failed to count pending approvals")?;

    let stats = AdminStatsRes {
        users_by_role: fill_role_counts(role_rows),
        pending_approvals,
        orders: type_totals!(conn, orders, OrderStatus::Cancelled),
        lab_bookings: type_totals!(conn, lab_bookings, LabBookingStatus::Cancelled),
        appointments: type_totals!(conn, appointments, AppointmentStatus::Cancelled),
    };

    Ok(StdResponse {
        data: Some(stats),
        message: Some("Get stats successfully"),
    })
}

macro_rules! commission_rows {
    ($conn:expr, $table:ident, $cancelled:expr, $since:expr) => {{
        let rows: Vec<(DateTime<Utc>, Decimal)> = $table::table
            .filter($table::status.ne($cancelled))
            .filter($table::created_at.ge($since))
            .select(($table::created_at, $table::commission_amount))
            .get_results($conn)
            .await
            .context(concat!("Failed to get ", stringify!($table), " revenue"))?;
        rows
    }};
}

/// Platform commission per day, per order type.
#[utoipa::path(
    get,
    path = "/revenue",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(DaysQuery),
    responses(
        (status = 200, description = "Daily commission revenue", body = StdResponse<RevenueRes, String>),
        (status = 401, description = "Not an administrator")
    )
)]
async fn get_revenue(
    State(state): State<AppState>,
    Query(params): Query<DaysQuery>,
) -> Result<impl IntoResponse, AppError> {
    let days = analytics::window_days(params.days);
    let today = Utc::now().date_naive();
    let since = analytics::window_start(today, days);

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order_rows = commission_rows!(conn, orders, OrderStatus::Cancelled, since);
    let booking_rows = commission_rows!(conn, lab_bookings, LabBookingStatus::Cancelled, since);
    let appointment_rows =
        commission_rows!(conn, appointments, AppointmentStatus::Cancelled, since);

    Ok(StdResponse {
        data: Some(RevenueRes {
            days,
            orders: analytics::bucket_by_day(order_rows, today, days),
            lab_bookings: analytics::bucket_by_day(booking_rows, today, days),
            appointments: analytics::bucket_by_day(appointment_rows, today, days),
        }),
        message: Some("Get revenue successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/transactions",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(TransactionsQuery),
    responses(
        (status = 200, description = "Latest transactions", body = StdResponse<Vec<TransactionEntity>, String>),
        (status = 401, description = "Not an administrator")
    )
)]
async fn get_transactions(
    State(state): State<AppState>,
    Query(params): Query<TransactionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let transactions = transactions::table
        .order_by(transactions::created_at.desc())
        .limit(transactions_limit(params.limit))
        .select(TransactionEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get transactions")?;

    Ok(StdResponse {
        data: Some(transactions),
        message: Some("Get transactions successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_is_reported() {
        let counts = fill_role_counts(vec![(Role::Patient, 4), (Role::Doctor, 1)]);
        assert_eq!(counts.len(), Role::ALL.len());
        assert!(counts.contains(&RoleCount {
            role: Role::Patient,
            count: 4
        }));
        assert!(counts.contains(&RoleCount {
            role: Role::Admin,
            count: 0
        }));
    }

    #[test]
    fn transaction_limit_is_clamped() {
        assert_eq!(transactions_limit(None), DEFAULT_TRANSACTIONS_LIMIT);
        assert_eq!(transactions_limit(Some(0)), 1);
        assert_eq!(transactions_limit(Some(10_000)), MAX_TRANSACTIONS_LIMIT);
    }
}
