use std::{convert::Infallible, time::Duration};

use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use futures::{Stream, stream};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    domain::{DeliveryStatus, NotificationKind, Role},
    events::{self, DeliveryAssignedEvent},
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
        outbox,
    },
    models::{DeliveryEntity, OrderEntity},
    notifier,
    routes::shared::{self, UpdateStatusReq, parse_enum},
    schema::{deliveries, delivery_partners, orders},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/deliveries",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_deliveries))
            .routes(utoipa_axum::routes!(get_available_deliveries))
            .routes(utoipa_axum::routes!(stream_deliveries))
            .routes(utoipa_axum::routes!(get_delivery))
            .routes(utoipa_axum::routes!(accept_delivery))
            .routes(utoipa_axum::routes!(update_delivery_status)),
    )
}

#[derive(Serialize, ToSchema)]
pub struct DeliveryWithOrder {
    pub delivery: DeliveryEntity,
    pub order: OrderEntity,
}

/// List deliveries visible to the caller: a partner's own deliveries, the
/// deliveries of a pharmacy's or patient's orders, or everything for admins.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Deliveries"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List deliveries", body = StdResponse<Vec<DeliveryWithOrder>, String>),
        (status = 401, description = "Not authenticated or wrong role")
    )
)]
async fn get_deliveries(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = deliveries::table
        .inner_join(orders::table)
        .select((DeliveryEntity::as_select(), OrderEntity::as_select()))
        .into_boxed();
    query = match auth.role {
        Role::DeliveryPartner => {
            query.filter(deliveries::delivery_partner_id.eq(auth.profile_id))
        }
        Role::Pharmacy => query.filter(orders::pharmacy_id.eq(auth.profile_id)),
        Role::Patient => query.filter(orders::patient_id.eq(auth.profile_id)),
        Role::Admin => query,
        _ => {
            return Err(AppError::unauthorized(
                "Your role is not allowed to view deliveries",
            ));
        }
    };

    let rows: Vec<(DeliveryEntity, OrderEntity)> = query
        .order_by(deliveries::created_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get deliveries")?;

    Ok(StdResponse {
        data: Some(
            rows.into_iter()
                .map(|(delivery, order)| DeliveryWithOrder { delivery, order })
                .collect::<Vec<_>>(),
        ),
        message: Some("Get deliveries successfully"),
    })
}

/// Unassigned deliveries waiting for a partner, oldest first.
#[utoipa::path(
    get,
    path = "/available",
    tags = ["Deliveries"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List available deliveries", body = StdResponse<Vec<DeliveryEntity>, String>),
        (status = 401, description = "Not a delivery partner")
    )
)]
async fn get_available_deliveries(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Role::DeliveryPartner)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let available: Vec<DeliveryEntity> = deliveries::table
        .filter(deliveries::status.eq(DeliveryStatus::Pending))
        .filter(deliveries::delivery_partner_id.is_null())
        .order_by(deliveries::created_at.asc())
        .select(DeliveryEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get available deliveries")?;

    Ok(StdResponse {
        data: Some(available),
        message: Some("Get available deliveries successfully"),
    })
}

/// Server-sent events announcing new and claimed deliveries. Best effort:
/// events missed while disconnected are not replayed.
#[utoipa::path(
    get,
    path = "/stream",
    tags = ["Deliveries"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Event stream of delivery_requested / delivery_assigned", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Not a delivery partner")
    )
)]
async fn stream_deliveries(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let partner_id = auth.require(Role::DeliveryPartner)?;
    tracing::info!("Delivery partner #{} subscribed to dispatch", partner_id);

    let receiver = state.dispatch.subscribe();
    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let event = Event::default()
                        .event(message.name())
                        .json_data(&message)
                        .unwrap_or_else(|err| {
                            tracing::warn!("Failed to encode dispatch event: {:?}", err);
                            Event::default().comment("encoding error")
                        });
                    return Some((Ok::<Event, Infallible>(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Dispatch subscriber skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// Fetch one delivery visible to the caller.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Deliveries"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Delivery ID to fetch")
    ),
    responses(
        (status = 200, description = "Get delivery successfully", body = StdResponse<DeliveryWithOrder, String>),
        (status = 404, description = "Delivery not found")
    )
)]
async fn get_delivery(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    auth.require_any(&[
        Role::Admin,
        Role::Patient,
        Role::Pharmacy,
        Role::DeliveryPartner,
    ])?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (delivery, order): (DeliveryEntity, OrderEntity) = deliveries::table
        .inner_join(orders::table)
        .filter(deliveries::id.eq(id))
        .select((DeliveryEntity::as_select(), OrderEntity::as_select()))
        .get_result(conn)
        .await?;

    let visible = match auth.role {
        Role::Admin => true,
        Role::Patient => order.patient_id == auth.profile_id,
        Role::Pharmacy => order.pharmacy_id == auth.profile_id,
        // Partners can look at open deliveries before accepting them.
        Role::DeliveryPartner => {
            delivery.delivery_partner_id == Some(auth.profile_id)
                || delivery.delivery_partner_id.is_none()
        }
        Role::Doctor | Role::Laboratory => false,
    };
    if !visible {
        return Err(AppError::NotFound);
    }

    Ok(StdResponse {
        data: Some(DeliveryWithOrder { delivery, order }),
        message: Some("Get delivery successfully"),
    })
}

async fn partner_is_approved(
    conn: &mut AsyncPgConnection,
    partner_id: i32,
) -> Result<bool, AppError> {
    delivery_partners::table
        .find(partner_id)
        .select(delivery_partners::is_approved)
        .get_result::<bool>(conn)
        .await
        .optional()
        .context("Failed to look up delivery partner")?
        .ok_or(AppError::NotFound)
}

/// Claim an open delivery. The first partner to accept wins; everyone else
/// gets 409.
#[utoipa::path(
    post,
    path = "/{id}/accept",
    tags = ["Deliveries"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Delivery ID to accept")
    ),
    responses(
        (status = 200, description = "Accepted delivery successfully", body = StdResponse<DeliveryEntity, String>),
        (status = 401, description = "Not a delivery partner"),
        (status = 403, description = "Delivery partner is not approved"),
        (status = 404, description = "Delivery not found"),
        (status = 409, description = "Delivery already taken")
    )
)]
async fn accept_delivery(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let partner_id = auth.require(Role::DeliveryPartner)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    if !partner_is_approved(conn, partner_id).await? {
        return Err(AppError::ForbiddenResource(
            "Your account must be approved before accepting deliveries".into(),
        ));
    }

    let accepted = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let accepted: Option<DeliveryEntity> = diesel::update(
                    deliveries::table
                        .find(id)
                        .filter(deliveries::status.eq(DeliveryStatus::Pending))
                        .filter(deliveries::delivery_partner_id.is_null()),
                )
                .set((
                    deliveries::delivery_partner_id.eq(partner_id),
                    deliveries::status.eq(DeliveryStatus::Assigned),
                    deliveries::assigned_at.eq(Some(Utc::now())),
                ))
                .returning(DeliveryEntity::as_returning())
                .get_result(conn)
                .await
                .optional()
                .context("Failed to accept delivery")?;

                let Some(accepted) = accepted else {
                    let exists: Option<Uuid> = deliveries::table
                        .find(id)
                        .select(deliveries::id)
                        .get_result(conn)
                        .await
                        .optional()
                        .context("Failed to look up delivery")?;
                    return Err(match exists {
                        Some(_) => AppError::Conflict(
                            "This delivery has already been accepted".into(),
                        ),
                        None => AppError::NotFound,
                    });
                };

                outbox::publish(
                    conn,
                    events::DELIVERY_ASSIGNED.into(),
                    DeliveryAssignedEvent {
                        delivery_id: accepted.id,
                        order_id: accepted.order_id,
                        delivery_partner_id: partner_id,
                    },
                )
                .await?;

                let order: OrderEntity = orders::table
                    .find(accepted.order_id)
                    .select(OrderEntity::as_select())
                    .get_result(conn)
                    .await
                    .context("Failed to get order")?;
                let patient_user_id = shared::patient_user_id(conn, order.patient_id).await?;
                notifier::notify(
                    conn,
                    patient_user_id,
                    NotificationKind::Delivery,
                    "Delivery partner assigned",
                    format!("A delivery partner will pick up order #{} soon.", order.id),
                )
                .await?;
                let pharmacy_user_id = shared::pharmacy_user_id(conn, order.pharmacy_id).await?;
                notifier::notify(
                    conn,
                    pharmacy_user_id,
                    NotificationKind::Delivery,
                    "Delivery partner assigned",
                    format!("Order #{} has been claimed for pickup.", order.id),
                )
                .await?;

                Ok::<DeliveryEntity, AppError>(accepted)
            })
        })
        .await?;

    tracing::info!(
        "Delivery {} accepted by partner #{}",
        accepted.id,
        partner_id
    );

    Ok(StdResponse {
        data: Some(accepted),
        message: Some("Accepted delivery successfully"),
    })
}

/// Advance an assigned delivery. PICKED_UP and DELIVERED are mirrored onto
/// the order.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Deliveries"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Delivery ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Updated delivery successfully", body = StdResponse<DeliveryEntity, String>),
        (status = 400, description = "Transition not allowed"),
        (status = 401, description = "Not a delivery partner"),
        (status = 404, description = "Delivery not found or not assigned to the caller")
    )
)]
async fn update_delivery_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let partner_id = auth.require(Role::DeliveryPartner)?;
    let next: DeliveryStatus = parse_enum(&body.status)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let current: DeliveryEntity = deliveries::table
        .find(id)
        .filter(deliveries::delivery_partner_id.eq(partner_id))
        .select(DeliveryEntity::as_select())
        .get_result(conn)
        .await?;
    if !current.status.partner_can_move_to(next) {
        return Err(AppError::BadRequest(format!(
            "Cannot move delivery from {} to {}",
            current.status, next
        )));
    }

    let updated = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let target = deliveries::table
                    .find(current.id)
                    .filter(deliveries::status.eq(current.status));
                let now = Utc::now();
                let query = match next {
                    DeliveryStatus::PickedUp => diesel::update(target)
                        .set((
                            deliveries::status.eq(next),
                            deliveries::picked_up_at.eq(Some(now)),
                        ))
                        .returning(DeliveryEntity::as_returning())
                        .get_result(conn)
                        .await,
                    DeliveryStatus::Delivered => diesel::update(target)
                        .set((
                            deliveries::status.eq(next),
                            deliveries::delivered_at.eq(Some(now)),
                        ))
                        .returning(DeliveryEntity::as_returning())
                        .get_result(conn)
                        .await,
                    _ => diesel::update(target)
                        .set(deliveries::status.eq(next))
                        .returning(DeliveryEntity::as_returning())
                        .get_result(conn)
                        .await,
                };
                let updated: DeliveryEntity = query
                    .optional()
                    .context("Failed to update delivery")?
                    .ok_or_else(|| {
                        AppError::Conflict("Delivery was changed concurrently".into())
                    })?;

                let order: OrderEntity = match next.cascaded_order_status() {
                    Some(order_status) => diesel::update(orders::table.find(updated.order_id))
                        .set(orders::status.eq(order_status))
                        .returning(OrderEntity::as_returning())
                        .get_result(conn)
                        .await
                        .context("Failed to update order")?,
                    None => orders::table
                        .find(updated.order_id)
                        .select(OrderEntity::as_select())
                        .get_result(conn)
                        .await
                        .context("Failed to get order")?,
                };

                let patient_user_id = shared::patient_user_id(conn, order.patient_id).await?;
                notifier::notify(
                    conn,
                    patient_user_id,
                    NotificationKind::Delivery,
                    "Delivery update",
                    delivery_message(order.id, next),
                )
                .await?;

                Ok::<DeliveryEntity, AppError>(updated)
            })
        })
        .await?;

    tracing::info!(
        "Delivery {} moved from {} to {}",
        updated.id,
        current.status,
        updated.status
    );

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Updated delivery successfully"),
    })
}

fn delivery_message(order_id: i32, status: DeliveryStatus) -> String {
    match status {
        DeliveryStatus::PickedUp => format!("Order #{} has been picked up and is on its way.", order_id),
        DeliveryStatus::InTransit => format!("Order #{} is in transit.", order_id),
        DeliveryStatus::Delivered => format!("Order #{} has been delivered.", order_id),
        other => format!("Delivery for order #{} is now {}.", order_id, other),
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::OrderStatus;

    use super::*;

    #[test]
    fn delivery_messages_name_the_order() {
        assert!(delivery_message(7, DeliveryStatus::Delivered).contains("#7"));
        assert!(delivery_message(7, DeliveryStatus::Assigned).contains("ASSIGNED"));
    }

    #[test]
    fn cascade_matches_order_lifecycle() {
        assert_eq!(
            DeliveryStatus::PickedUp.cascaded_order_status(),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(DeliveryStatus::InTransit.cascaded_order_status(), None);
    }
}
