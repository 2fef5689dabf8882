use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    commission,
    domain::{LabBookingStatus, NotificationKind, PaymentMethod, Role},
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
    },
    models::{CreateLabBookingEntity, LabBookingEntity, LabTestEntity},
    notifier,
    routes::shared::{
        self, PaymentTarget, UpdateStatusReq, ensure_future, optional_text, parse_enum,
    },
    schema::{lab_bookings, lab_tests, laboratories, patients},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/lab-bookings",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_lab_bookings))
            .routes(utoipa_axum::routes!(create_lab_booking))
            .routes(utoipa_axum::routes!(get_lab_booking))
            .routes(utoipa_axum::routes!(update_lab_booking_status)),
    )
}

enum BookingScope {
    Patient(i32),
    Laboratory(i32),
    All,
}

impl BookingScope {
    fn of(auth: &AuthUser) -> Result<Self, AppError> {
        match auth.role {
            Role::Patient => Ok(BookingScope::Patient(auth.profile_id)),
            Role::Laboratory => Ok(BookingScope::Laboratory(auth.profile_id)),
            Role::Admin => Ok(BookingScope::All),
            _ => Err(AppError::unauthorized(
                "Only patients, laboratories and administrators can view lab bookings",
            )),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct LabBookingWithTest {
    pub booking: LabBookingEntity,
    pub lab_test: LabTestEntity,
}

/// List lab bookings visible to the caller, soonest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Lab bookings"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List lab bookings", body = StdResponse<Vec<LabBookingWithTest>, String>),
        (status = 401, description = "Not authenticated or wrong role")
    )
)]
async fn get_lab_bookings(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = BookingScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = lab_bookings::table
        .inner_join(lab_tests::table)
        .select((LabBookingEntity::as_select(), LabTestEntity::as_select()))
        .into_boxed();
    query = match scope {
        BookingScope::Patient(id) => query.filter(lab_bookings::patient_id.eq(id)),
        BookingScope::Laboratory(id) => query.filter(lab_bookings::laboratory_id.eq(id)),
        BookingScope::All => query,
    };

    let rows: Vec<(LabBookingEntity, LabTestEntity)> = query
        .order_by(lab_bookings::scheduled_at.asc())
        .get_results(conn)
        .await
        .context("Failed to get lab bookings")?;

    Ok(StdResponse {
        data: Some(
            rows.into_iter()
                .map(|(booking, lab_test)| LabBookingWithTest { booking, lab_test })
                .collect::<Vec<_>>(),
        ),
        message: Some("Get lab bookings successfully"),
    })
}

async fn find_scoped(
    conn: &mut AsyncPgConnection,
    id: i32,
    scope: &BookingScope,
) -> Result<LabBookingEntity, AppError> {
    let mut query = lab_bookings::table.find(id).into_boxed();
    query = match scope {
        BookingScope::Patient(patient_id) => {
            query.filter(lab_bookings::patient_id.eq(*patient_id))
        }
        BookingScope::Laboratory(laboratory_id) => {
            query.filter(lab_bookings::laboratory_id.eq(*laboratory_id))
        }
        BookingScope::All => query,
    };
    Ok(query
        .select(LabBookingEntity::as_select())
        .get_result(conn)
        .await?)
}

/// Fetch one lab booking visible to the caller.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Lab bookings"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Lab booking ID to fetch")
    ),
    responses(
        (status = 200, description = "Get lab booking successfully", body = StdResponse<LabBookingWithTest, String>),
        (status = 404, description = "Lab booking not found")
    )
)]
async fn get_lab_booking(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = BookingScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let booking = find_scoped(conn, id, &scope).await?;
    let lab_test: LabTestEntity = lab_tests::table
        .find(booking.lab_test_id)
        .select(LabTestEntity::as_select())
        .get_result(conn)
        .await
        .context("Failed to get lab test")?;

    Ok(StdResponse {
        data: Some(LabBookingWithTest { booking, lab_test }),
        message: Some("Get lab booking successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CreateLabBookingReq {
    pub lab_test_id: i32,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub home_collection: bool,
    /// Required for home collection; defaults to the patient's saved address.
    pub collection_address: Option<String>,
    /// CARD (default), UPI, CASH_ON_DELIVERY or WALLET.
    pub payment_method: Option<String>,
}

/// Book a lab test with an approved laboratory.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Lab bookings"],
    security(("bearerAuth" = [])),
    request_body = CreateLabBookingReq,
    responses(
        (status = 201, description = "Created lab booking successfully", body = StdResponse<LabBookingEntity, String>),
        (status = 400, description = "Invalid time or home collection request"),
        (status = 403, description = "Laboratory is not approved"),
        (status = 404, description = "Lab test not found")
    )
)]
async fn create_lab_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateLabBookingReq>,
) -> Result<impl IntoResponse, AppError> {
    let patient_id = auth.require(Role::Patient)?;
    ensure_future(body.scheduled_at)?;
    let payment_method: PaymentMethod = match body.payment_method.as_deref() {
        Some(raw) => parse_enum(raw)?,
        None => PaymentMethod::Card,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (lab_test, laboratory_approved): (LabTestEntity, bool) = lab_tests::table
        .inner_join(laboratories::table)
        .filter(lab_tests::id.eq(body.lab_test_id))
        .filter(lab_tests::is_active.eq(true))
        .select((LabTestEntity::as_select(), laboratories::is_approved))
        .get_result(conn)
        .await?;
    if !laboratory_approved {
        return Err(AppError::ForbiddenResource(
            "This laboratory is not approved yet".into(),
        ));
    }

    let collection_address = if body.home_collection {
        if !lab_test.home_collection_available {
            return Err(AppError::bad_request(
                "Home collection is not available for this test",
            ));
        }
        let saved_address: Option<String> = patients::table
            .find(patient_id)
            .select(patients::address)
            .get_result(conn)
            .await
            .context("Failed to get patient address")?;
        Some(
            optional_text(body.collection_address)
                .or_else(|| optional_text(saved_address))
                .ok_or_else(|| {
                    AppError::bad_request("collection_address is required for home collection")
                })?,
        )
    } else {
        None
    };

    let split = commission::split(lab_test.price);
    let payer_user_id = auth.user_id;
    let booking = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let booking = diesel::insert_into(lab_bookings::table)
                    .values(CreateLabBookingEntity {
                        patient_id,
                        laboratory_id: lab_test.laboratory_id,
                        lab_test_id: lab_test.id,
                        status: LabBookingStatus::Pending,
                        scheduled_at: body.scheduled_at,
                        home_collection: body.home_collection,
                        collection_address,
                        total_amount: split.total,
                        commission_amount: split.commission,
                        net_amount: split.net,
                    })
                    .returning(LabBookingEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create lab booking")?;

                shared::record_payment(
                    conn,
                    payer_user_id,
                    PaymentTarget::LabBooking(booking.id),
                    &split,
                    payment_method,
                )
                .await?;

                let laboratory_user_id =
                    shared::laboratory_user_id(conn, booking.laboratory_id).await?;
                notifier::notify(
                    conn,
                    laboratory_user_id,
                    NotificationKind::LabBooking,
                    "New lab booking",
                    format!(
                        "{} booked for {}.",
                        lab_test.name,
                        booking.scheduled_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                )
                .await?;

                Ok::<LabBookingEntity, AppError>(booking)
            })
        })
        .await?;

    tracing::info!(
        "Lab booking #{} created for laboratory #{} (total {}, commission {})",
        booking.id,
        booking.laboratory_id,
        booking.total_amount,
        booking.commission_amount
    );

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(booking),
            message: Some("Created lab booking successfully"),
        },
    ))
}

/// Laboratories confirm, collect and complete bookings (optionally with
/// result notes); patients may cancel while the booking is PENDING.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Lab bookings"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Lab booking ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Updated lab booking successfully", body = StdResponse<LabBookingEntity, String>),
        (status = 400, description = "Transition not allowed"),
        (status = 401, description = "Role may not change lab bookings")
    )
)]
async fn update_lab_booking_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let scope = match auth.role {
        Role::Laboratory => BookingScope::Laboratory(auth.profile_id),
        Role::Patient => BookingScope::Patient(auth.profile_id),
        _ => {
            return Err(AppError::unauthorized(
                "Only the laboratory or the patient can change a lab booking",
            ));
        }
    };
    let next: LabBookingStatus = parse_enum(&body.status)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let current = find_scoped(conn, id, &scope).await?;
    let by_laboratory = matches!(scope, BookingScope::Laboratory(_));
    let allowed = if by_laboratory {
        current.status.laboratory_can_move_to(next)
    } else {
        current.status.patient_can_move_to(next)
    };
    if !allowed {
        return Err(AppError::BadRequest(format!(
            "Cannot move lab booking from {} to {}",
            current.status, next
        )));
    }

    let result_notes = match next {
        LabBookingStatus::Completed => optional_text(body.notes),
        _ => None,
    };

    let updated = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let target = lab_bookings::table
                    .find(current.id)
                    .filter(lab_bookings::status.eq(current.status));
                let updated = match result_notes {
                    Some(notes) => diesel::update(target)
                        .set((
                            lab_bookings::status.eq(next),
                            lab_bookings::result_notes.eq(Some(notes)),
                        ))
                        .returning(LabBookingEntity::as_returning())
                        .get_result(conn)
                        .await,
                    None => diesel::update(target)
                        .set(lab_bookings::status.eq(next))
                        .returning(LabBookingEntity::as_returning())
                        .get_result(conn)
                        .await,
                }
                .optional()
                .context("Failed to update lab booking")?
                .ok_or_else(|| AppError::Conflict("Lab booking was changed concurrently".into()))?;

                let (recipient, title) = if by_laboratory {
                    (
                        shared::patient_user_id(conn, updated.patient_id).await?,
                        "Lab booking updated",
                    )
                } else {
                    (
                        shared::laboratory_user_id(conn, updated.laboratory_id).await?,
                        "Lab booking cancelled",
                    )
                };
                notifier::notify(
                    conn,
                    recipient,
                    NotificationKind::LabBooking,
                    title,
                    format!("Lab booking #{} is now {}.", updated.id, updated.status),
                )
                .await?;

                Ok::<LabBookingEntity, AppError>(updated)
            })
        })
        .await?;

    tracing::info!(
        "Lab booking #{} moved from {} to {}",
        updated.id,
        current.status,
        updated.status
    );

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Updated lab booking successfully"),
    })
}
