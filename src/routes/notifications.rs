use anyhow::Context;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
    },
    models::NotificationEntity,
    schema::notifications,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/notifications",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_notifications))
            .routes(utoipa_axum::routes!(mark_all_read))
            .routes(utoipa_axum::routes!(mark_read)),
    )
}

#[derive(Serialize, ToSchema, Debug)]
pub struct GetNotificationsRes {
    pub unread: i64,
    pub notifications: Vec<NotificationEntity>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct MarkAllReadRes {
    pub updated: usize,
}

/// The caller's notifications, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Notifications"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List notifications", body = StdResponse<GetNotificationsRes, String>),
        (status = 401, description = "Not authenticated")
    )
)]
async fn get_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let notifications = notifications::table
        .filter(notifications::user_id.eq(auth.user_id))
        .order_by((notifications::created_at.desc(), notifications::id.desc()))
        .select(NotificationEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get notifications")?;
    let unread = notifications.iter().filter(|n| !n.is_read).count() as i64;

    Ok(StdResponse {
        data: Some(GetNotificationsRes {
            unread,
            notifications,
        }),
        message: Some("Get notifications successfully"),
    })
}

#[utoipa::path(
    patch,
    path = "/{id}/read",
    tags = ["Notifications"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Notification ID to mark as read")
    ),
    responses(
        (status = 200, description = "Marked notification as read", body = StdResponse<NotificationEntity, String>),
        (status = 404, description = "Notification not found")
    )
)]
async fn mark_read(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let notification = diesel::update(notifications::table)
        .filter(notifications::id.eq(id))
        .filter(notifications::user_id.eq(auth.user_id))
        .set(notifications::is_read.eq(true))
        .returning(NotificationEntity::as_returning())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to update notification")?
        .ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(notification),
        message: Some("Marked notification as read"),
    })
}

#[utoipa::path(
    patch,
    path = "/read-all",
    tags = ["Notifications"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Marked all notifications as read", body = StdResponse<MarkAllReadRes, String>),
        (status = 401, description = "Not authenticated")
    )
)]
async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let updated = diesel::update(notifications::table)
        .filter(notifications::user_id.eq(auth.user_id))
        .filter(notifications::is_read.eq(false))
        .set(notifications::is_read.eq(true))
        .execute(conn)
        .await
        .context("Failed to update notifications")?;

    Ok(StdResponse {
        data: Some(MarkAllReadRes { updated }),
        message: Some("Marked all notifications as read"),
    })
}
