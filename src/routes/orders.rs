use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    commission,
    domain::{DeliveryStatus, NotificationKind, OrderStatus, PaymentMethod, Role},
    events::{self, DeliveryRequestedEvent},
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
        outbox,
    },
    models::{
        CreateDeliveryEntity, CreateOrderEntity, CreateOrderItemEntity, DeliveryEntity,
        MedicineEntity, OrderEntity, OrderItemEntity, PharmacyEntity,
    },
    notifier,
    routes::shared::{
        self, PaymentTarget, UpdateStatusReq, optional_text, parse_enum,
    },
    schema::{deliveries, medicines, order_items, orders, patients, pharmacies, prescriptions},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_orders))
            .routes(utoipa_axum::routes!(create_order))
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(update_order_status)),
    )
}

#[derive(Serialize, ToSchema)]
pub struct GetOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
    pub delivery: Option<DeliveryEntity>,
}

/// Restricts an order query to what the caller may see.
enum OrderScope {
    Patient(i32),
    Pharmacy(i32),
    All,
}

impl OrderScope {
    fn of(auth: &AuthUser) -> Result<Self, AppError> {
        match auth.role {
            Role::Patient => Ok(OrderScope::Patient(auth.profile_id)),
            Role::Pharmacy => Ok(OrderScope::Pharmacy(auth.profile_id)),
            Role::Admin => Ok(OrderScope::All),
            _ => Err(AppError::unauthorized(
                "Only patients, pharmacies and administrators can view orders",
            )),
        }
    }
}

/// List orders visible to the caller, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List orders", body = StdResponse<Vec<GetOrderRes>, String>),
        (status = 401, description = "Not authenticated or wrong role")
    )
)]
async fn get_orders(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = OrderScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = orders::table.into_boxed();
    query = match scope {
        OrderScope::Patient(id) => query.filter(orders::patient_id.eq(id)),
        OrderScope::Pharmacy(id) => query.filter(orders::pharmacy_id.eq(id)),
        OrderScope::All => query,
    };
    let orders: Vec<OrderEntity> = query
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get orders")?;

    let order_ids: Vec<i32> = orders.iter().map(|order| order.id).collect();
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .select(OrderItemEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get order items")?;
    let order_deliveries: Vec<DeliveryEntity> = deliveries::table
        .filter(deliveries::order_id.eq_any(&order_ids))
        .select(DeliveryEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get deliveries")?;

    let mut items_by_order: HashMap<i32, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        items_by_order.entry(item.order_id).or_default().push(item);
    }
    let mut delivery_by_order: HashMap<i32, DeliveryEntity> = order_deliveries
        .into_iter()
        .map(|delivery| (delivery.order_id, delivery))
        .collect();

    let orders: Vec<GetOrderRes> = orders
        .into_iter()
        .map(|order| GetOrderRes {
            order_items: items_by_order.remove(&order.id).unwrap_or_default(),
            delivery: delivery_by_order.remove(&order.id),
            order,
        })
        .collect();

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get orders successfully"),
    })
}

/// Fetch one order visible to the caller.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<GetOrderRes, String>),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = OrderScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order = find_scoped(conn, id, &scope).await?;
    let order_items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .select(OrderItemEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get order items")?;
    let delivery: Option<DeliveryEntity> = deliveries::table
        .filter(deliveries::order_id.eq(order.id))
        .select(DeliveryEntity::as_select())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to get delivery")?;

    Ok(StdResponse {
        data: Some(GetOrderRes {
            order,
            order_items,
            delivery,
        }),
        message: Some("Get order successfully"),
    })
}

async fn find_scoped(
    conn: &mut AsyncPgConnection,
    id: i32,
    scope: &OrderScope,
) -> Result<OrderEntity, AppError> {
    let mut query = orders::table.find(id).into_boxed();
    query = match scope {
        OrderScope::Patient(patient_id) => query.filter(orders::patient_id.eq(*patient_id)),
        OrderScope::Pharmacy(pharmacy_id) => query.filter(orders::pharmacy_id.eq(*pharmacy_id)),
        OrderScope::All => query,
    };
    Ok(query
        .select(OrderEntity::as_select())
        .get_result(conn)
        .await?)
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct OrderItemReq {
    pub medicine_id: i32,
    pub quantity: i32,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CreateOrderReq {
    pub pharmacy_id: i32,
    pub items: Vec<OrderItemReq>,
    /// Defaults to the patient's saved address.
    pub delivery_address: Option<String>,
    pub prescription_id: Option<i32>,
    pub notes: Option<String>,
    /// CARD (default), UPI, CASH_ON_DELIVERY or WALLET.
    pub payment_method: Option<String>,
}

/// Merges repeated medicines and rejects empty orders or non-positive quantities.
pub fn merge_items(items: &[OrderItemReq]) -> Result<BTreeMap<i32, i32>, AppError> {
    if items.is_empty() {
        return Err(AppError::bad_request("An order needs at least one item"));
    }
    let mut merged = BTreeMap::new();
    for item in items {
        if item.quantity < 1 {
            return Err(AppError::BadRequest(format!(
                "Quantity for medicine #{} must be at least 1",
                item.medicine_id
            )));
        }
        let quantity: &mut i32 = merged.entry(item.medicine_id).or_insert(0);
        *quantity = quantity
            .checked_add(item.quantity)
            .ok_or_else(|| AppError::bad_request("Quantity is too large"))?;
    }
    Ok(merged)
}

/// Sum of `unit_price × quantity`.
pub fn order_total<'a>(lines: impl IntoIterator<Item = (&'a Decimal, i32)>) -> Decimal {
    lines
        .into_iter()
        .map(|(price, quantity)| *price * Decimal::from(quantity))
        .sum()
}

#[derive(Serialize, ToSchema)]
pub struct CreateOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
    pub transaction_id: uuid::Uuid,
}

/// Place an order with one approved pharmacy. Stock is reserved and the mock
/// payment recorded immediately.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    request_body = CreateOrderReq,
    responses(
        (status = 201, description = "Created order successfully", body = StdResponse<CreateOrderRes, String>),
        (status = 400, description = "Invalid items, stock or prescription"),
        (status = 403, description = "Pharmacy is not approved")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let patient_id = auth.require(Role::Patient)?;
    let requested = merge_items(&body.items)?;
    let payment_method: PaymentMethod = match body.payment_method.as_deref() {
        Some(raw) => parse_enum(raw)?,
        None => PaymentMethod::Card,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    if !shared::pharmacy_is_approved(conn, body.pharmacy_id).await? {
        return Err(AppError::ForbiddenResource(
            "This pharmacy is not approved yet".into(),
        ));
    }

    let saved_address: Option<String> = patients::table
        .find(patient_id)
        .select(patients::address)
        .get_result(conn)
        .await
        .context("Failed to get patient address")?;
    let delivery_address = optional_text(body.delivery_address)
        .or_else(|| optional_text(saved_address))
        .ok_or_else(|| AppError::bad_request("delivery_address is required"))?;

    if let Some(prescription_id) = body.prescription_id {
        let owned: Option<i32> = prescriptions::table
            .find(prescription_id)
            .filter(prescriptions::patient_id.eq(patient_id))
            .select(prescriptions::id)
            .get_result(conn)
            .await
            .optional()
            .context("Failed to look up prescription")?;
        if owned.is_none() {
            return Err(AppError::bad_request("Prescription not found"));
        }
    }

    let pharmacy_id = body.pharmacy_id;
    let payer_user_id = auth.user_id;
    let (order, items, transaction_id) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let medicine_ids: Vec<i32> = requested.keys().copied().collect();
                let available: Vec<MedicineEntity> = medicines::table
                    .filter(medicines::id.eq_any(&medicine_ids))
                    .filter(medicines::pharmacy_id.eq(pharmacy_id))
                    .filter(medicines::is_active.eq(true))
                    .select(MedicineEntity::as_select())
                    .for_update()
                    .get_results(conn)
                    .await
                    .context("Failed to lock medicines")?;
                let available: HashMap<i32, MedicineEntity> = available
                    .into_iter()
                    .map(|medicine| (medicine.id, medicine))
                    .collect();

                let mut lines = Vec::with_capacity(requested.len());
                for (medicine_id, quantity) in &requested {
                    let medicine = available.get(medicine_id).ok_or_else(|| {
                        AppError::BadRequest(format!(
                            "Medicine #{} is not available from this pharmacy",
                            medicine_id
                        ))
                    })?;
                    if medicine.stock < *quantity {
                        return Err(AppError::BadRequest(format!(
                            "Only {} of {} left in stock",
                            medicine.stock, medicine.name
                        )));
                    }
                    if medicine.requires_prescription && body.prescription_id.is_none() {
                        return Err(AppError::BadRequest(format!(
                            "{} requires a prescription",
                            medicine.name
                        )));
                    }
                    lines.push((medicine, *quantity));
                }

                let split = commission::split(order_total(
                    lines.iter().map(|(medicine, quantity)| (&medicine.price, *quantity)),
                ));

                let order = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        patient_id,
                        pharmacy_id,
                        prescription_id: body.prescription_id,
                        status: OrderStatus::Pending,
                        delivery_address,
                        notes: optional_text(body.notes),
                        total_amount: split.total,
                        commission_amount: split.commission,
                        net_amount: split.net,
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create order")?;

                let new_items: Vec<CreateOrderItemEntity> = lines
                    .iter()
                    .map(|(medicine, quantity)| CreateOrderItemEntity {
                        order_id: order.id,
                        medicine_id: medicine.id,
                        quantity: *quantity,
                        unit_price: medicine.price,
                    })
                    .collect();
                let items = diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .returning(OrderItemEntity::as_returning())
                    .get_results(conn)
                    .await
                    .context("Failed to create order items")?;

                for (medicine, quantity) in &lines {
                    diesel::update(medicines::table.find(medicine.id))
                        .set(medicines::stock.eq(medicines::stock - *quantity))
                        .execute(conn)
                        .await
                        .context("Failed to reserve stock")?;
                }

                let transaction = shared::record_payment(
                    conn,
                    payer_user_id,
                    PaymentTarget::Order(order.id),
                    &split,
                    payment_method,
                )
                .await?;

                let pharmacy_user_id = shared::pharmacy_user_id(conn, pharmacy_id).await?;
                notifier::notify(
                    conn,
                    pharmacy_user_id,
                    NotificationKind::Order,
                    "New order received",
                    format!("Order #{} for {} is waiting for confirmation.", order.id, split.total),
                )
                .await?;

                Ok::<(OrderEntity, Vec<OrderItemEntity>, uuid::Uuid), AppError>((
                    order,
                    items,
                    transaction.id,
                ))
            })
        })
        .await?;

    tracing::info!(
        "Order #{} created for pharmacy #{} (total {}, commission {})",
        order.id,
        order.pharmacy_id,
        order.total_amount,
        order.commission_amount
    );

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(CreateOrderRes {
                order,
                order_items: items,
                transaction_id,
            }),
            message: Some("Created order successfully"),
        },
    ))
}

/// Move an order through its lifecycle. Pharmacies drive fulfilment up to
/// READY_FOR_DELIVERY; patients may cancel while the order is PENDING.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Updated order successfully", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Transition not allowed"),
        (status = 401, description = "Role may not change orders"),
        (status = 409, description = "Order changed concurrently")
    )
)]
async fn update_order_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let scope = match auth.role {
        Role::Pharmacy => OrderScope::Pharmacy(auth.profile_id),
        Role::Patient => OrderScope::Patient(auth.profile_id),
        _ => {
            return Err(AppError::unauthorized(
                "Only the pharmacy or the patient can change an order",
            ));
        }
    };
    let next: OrderStatus = parse_enum(&body.status)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let current = find_scoped(conn, id, &scope).await?;
    let allowed = match scope {
        OrderScope::Pharmacy(_) => current.status.pharmacy_can_move_to(next),
        _ => current.status.patient_can_move_to(next),
    };
    if !allowed {
        return Err(AppError::BadRequest(format!(
            "Cannot move order from {} to {}",
            current.status, next
        )));
    }

    let by_patient = matches!(scope, OrderScope::Patient(_));
    let updated = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let updated: OrderEntity = diesel::update(
                    orders::table
                        .find(current.id)
                        .filter(orders::status.eq(current.status)),
                )
                .set(orders::status.eq(next))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()
                .context("Failed to update order")?
                .ok_or_else(|| AppError::Conflict("Order was changed by someone else".into()))?;

                match next {
                    OrderStatus::Cancelled => restore_stock(conn, updated.id).await?,
                    OrderStatus::ReadyForDelivery => request_delivery(conn, &updated).await?,
                    _ => {}
                }

                let patient_user_id = shared::patient_user_id(conn, updated.patient_id).await?;
                notifier::notify(
                    conn,
                    patient_user_id,
                    NotificationKind::Order,
                    "Order updated",
                    format!("Order #{} is now {}.", updated.id, updated.status),
                )
                .await?;

                if by_patient {
                    let pharmacy_user_id =
                        shared::pharmacy_user_id(conn, updated.pharmacy_id).await?;
                    notifier::notify(
                        conn,
                        pharmacy_user_id,
                        NotificationKind::Order,
                        "Order cancelled",
                        format!("Order #{} was cancelled by the patient.", updated.id),
                    )
                    .await?;
                }

                Ok::<OrderEntity, AppError>(updated)
            })
        })
        .await?;

    tracing::info!(
        "Order #{} moved from {} to {}",
        updated.id,
        current.status,
        updated.status
    );

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Updated order successfully"),
    })
}

async fn restore_stock(conn: &mut AsyncPgConnection, order_id: i32) -> anyhow::Result<()> {
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .select(OrderItemEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    for item in items {
        diesel::update(medicines::table.find(item.medicine_id))
            .set(medicines::stock.eq(medicines::stock + item.quantity))
            .execute(conn)
            .await
            .context("Failed to restore stock")?;
    }
    Ok(())
}

/// Opens the delivery for a ready order and queues the dispatch broadcast.
async fn request_delivery(conn: &mut AsyncPgConnection, order: &OrderEntity) -> anyhow::Result<()> {
    let pharmacy: PharmacyEntity = pharmacies::table
        .find(order.pharmacy_id)
        .select(PharmacyEntity::as_select())
        .get_result(conn)
        .await
        .context("Failed to get pharmacy")?;

    let delivery = diesel::insert_into(deliveries::table)
        .values(CreateDeliveryEntity {
            order_id: order.id,
            status: DeliveryStatus::Pending,
            pickup_address: pharmacy.address.clone(),
            delivery_address: order.delivery_address.clone(),
        })
        .returning(DeliveryEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create delivery")?;

    outbox::publish(
        conn,
        events::DELIVERY_REQUESTED.into(),
        DeliveryRequestedEvent {
            delivery_id: delivery.id,
            order_id: order.id,
            pharmacy_id: pharmacy.id,
            pharmacy_name: pharmacy.name,
            pickup_address: delivery.pickup_address,
            delivery_address: delivery.delivery_address,
            requested_at: Utc::now(),
        },
    )
    .await?;

    tracing::info!("Delivery {} requested for order #{}", delivery.id, order.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(medicine_id: i32, quantity: i32) -> OrderItemReq {
        OrderItemReq {
            medicine_id,
            quantity,
        }
    }

    #[test]
    fn merges_repeated_medicines() {
        let merged = merge_items(&[item(2, 1), item(1, 3), item(2, 4)]).unwrap();
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![(1, 3), (2, 5)]);
    }

    #[test]
    fn rejects_empty_orders_and_bad_quantities() {
        assert!(matches!(merge_items(&[]), Err(AppError::BadRequest(_))));
        assert!(merge_items(&[item(1, 0)]).is_err());
        assert!(merge_items(&[item(1, -2)]).is_err());
        assert!(merge_items(&[item(1, i32::MAX), item(1, 1)]).is_err());
    }

    #[test]
    fn total_is_price_times_quantity() {
        let paracetamol = Decimal::new(1250, 2);
        let syrup = Decimal::new(799, 2);
        let total = order_total([(&paracetamol, 2), (&syrup, 3)]);
        assert_eq!(total, Decimal::new(4897, 2));

        let split = commission::split(total);
        assert_eq!(split.total, split.net + split.commission);
    }
}
