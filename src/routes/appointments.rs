use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    dsl::exists,
    result::{DatabaseErrorKind, Error as DieselError},
    select,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    commission,
    domain::{AppointmentStatus, NotificationKind, PaymentMethod, Role},
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
    },
    models::{AppointmentEntity, CreateAppointmentEntity, DoctorEntity},
    notifier,
    routes::shared::{
        self, PaymentTarget, UpdateStatusReq, ensure_future, optional_text, parse_enum,
    },
    schema::{appointments, doctors},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/appointments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_appointments))
            .routes(utoipa_axum::routes!(create_appointment))
            .routes(utoipa_axum::routes!(get_appointment))
            .routes(utoipa_axum::routes!(update_appointment_status)),
    )
}

enum AppointmentScope {
    Patient(i32),
    Doctor(i32),
    All,
}

impl AppointmentScope {
    fn of(auth: &AuthUser) -> Result<Self, AppError> {
        match auth.role {
            Role::Patient => Ok(AppointmentScope::Patient(auth.profile_id)),
            Role::Doctor => Ok(AppointmentScope::Doctor(auth.profile_id)),
            Role::Admin => Ok(AppointmentScope::All),
            _ => Err(AppError::unauthorized(
                "Only patients, doctors and administrators can view appointments",
            )),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AppointmentWithDoctor {
    pub appointment: AppointmentEntity,
    pub doctor: DoctorEntity,
}

/// List appointments visible to the caller, soonest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List appointments", body = StdResponse<Vec<AppointmentWithDoctor>, String>),
        (status = 401, description = "Not authenticated or wrong role")
    )
)]
async fn get_appointments(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = AppointmentScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = appointments::table
        .inner_join(doctors::table)
        .select((AppointmentEntity::as_select(), DoctorEntity::as_select()))
        .into_boxed();
    query = match scope {
        AppointmentScope::Patient(id) => query.filter(appointments::patient_id.eq(id)),
        AppointmentScope::Doctor(id) => query.filter(appointments::doctor_id.eq(id)),
        AppointmentScope::All => query,
    };

    let rows: Vec<(AppointmentEntity, DoctorEntity)> = query
        .order_by(appointments::scheduled_at.asc())
        .get_results(conn)
        .await
        .context("Failed to get appointments")?;

    Ok(StdResponse {
        data: Some(
            rows.into_iter()
                .map(|(appointment, doctor)| AppointmentWithDoctor {
                    appointment,
                    doctor,
                })
                .collect::<Vec<_>>(),
        ),
        message: Some("Get appointments successfully"),
    })
}

async fn find_scoped(
    conn: &mut AsyncPgConnection,
    id: i32,
    scope: &AppointmentScope,
) -> Result<AppointmentEntity, AppError> {
    let mut query = appointments::table.find(id).into_boxed();
    query = match scope {
        AppointmentScope::Patient(patient_id) => {
            query.filter(appointments::patient_id.eq(*patient_id))
        }
        AppointmentScope::Doctor(doctor_id) => query.filter(appointments::doctor_id.eq(*doctor_id)),
        AppointmentScope::All => query,
    };
    Ok(query
        .select(AppointmentEntity::as_select())
        .get_result(conn)
        .await?)
}

/// Fetch one appointment visible to the caller.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID to fetch")
    ),
    responses(
        (status = 200, description = "Get appointment successfully", body = StdResponse<AppointmentWithDoctor, String>),
        (status = 404, description = "Appointment not found")
    )
)]
async fn get_appointment(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = AppointmentScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointment = find_scoped(conn, id, &scope).await?;
    let doctor: DoctorEntity = doctors::table
        .find(appointment.doctor_id)
        .select(DoctorEntity::as_select())
        .get_result(conn)
        .await
        .context("Failed to get doctor")?;

    Ok(StdResponse {
        data: Some(AppointmentWithDoctor {
            appointment,
            doctor,
        }),
        message: Some("Get appointment successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CreateAppointmentReq {
    pub doctor_id: i32,
    pub scheduled_at: DateTime<Utc>,
    pub reason: Option<String>,
    /// CARD (default), UPI, CASH_ON_DELIVERY or WALLET.
    pub payment_method: Option<String>,
}

fn slot_taken() -> AppError {
    AppError::bad_request("The doctor already has an appointment at this time")
}

/// Book a consultation with an approved doctor. The fee is the doctor's
/// consultation fee at booking time.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    request_body = CreateAppointmentReq,
    responses(
        (status = 201, description = "Created appointment successfully", body = StdResponse<AppointmentEntity, String>),
        (status = 400, description = "Time in the past or slot already taken"),
        (status = 403, description = "Doctor is not approved"),
        (status = 404, description = "Doctor not found")
    )
)]
async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateAppointmentReq>,
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

    let doctor: DoctorEntity = doctors::table
        .find(body.doctor_id)
        .select(DoctorEntity::as_select())
        .get_result(conn)
        .await?;
    if !doctor.is_approved {
        return Err(AppError::ForbiddenResource(
            "This doctor is not approved yet".into(),
        ));
    }

    let split = commission::split(doctor.consultation_fee);
    let payer_user_id = auth.user_id;
    let appointment = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let taken: bool = select(exists(
                    appointments::table
                        .filter(appointments::doctor_id.eq(doctor.id))
                        .filter(appointments::scheduled_at.eq(body.scheduled_at))
                        .filter(appointments::status.ne(AppointmentStatus::Cancelled)),
                ))
                .get_result(conn)
                .await
                .context("Failed to check the doctor's schedule")?;
                if taken {
                    return Err(slot_taken());
                }

                let appointment = diesel::insert_into(appointments::table)
                    .values(CreateAppointmentEntity {
                        patient_id,
                        doctor_id: doctor.id,
                        status: AppointmentStatus::Pending,
                        scheduled_at: body.scheduled_at,
                        reason: optional_text(body.reason),
                        total_amount: split.total,
                        commission_amount: split.commission,
                        net_amount: split.net,
                    })
                    .returning(AppointmentEntity::as_returning())
                    .get_result(conn)
                    .await
                    .map_err(|err| match err {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            slot_taken()
                        }
                        other => AppError::from(other),
                    })?;

                shared::record_payment(
                    conn,
                    payer_user_id,
                    PaymentTarget::Appointment(appointment.id),
                    &split,
                    payment_method,
                )
                .await?;

                notifier::notify(
                    conn,
                    doctor.user_id,
                    NotificationKind::Appointment,
                    "New appointment request",
                    format!(
                        "Consultation requested for {}.",
                        appointment.scheduled_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                )
                .await?;

                Ok::<AppointmentEntity, AppError>(appointment)
            })
        })
        .await?;

    tracing::info!(
        "Appointment #{} created with doctor #{} (total {}, commission {})",
        appointment.id,
        appointment.doctor_id,
        appointment.total_amount,
        appointment.commission_amount
    );

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(appointment),
            message: Some("Created appointment successfully"),
        },
    ))
}

/// Doctors confirm and complete appointments (optionally with notes);
/// patients may cancel while PENDING or CONFIRMED.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Updated appointment successfully", body = StdResponse<AppointmentEntity, String>),
        (status = 400, description = "Transition not allowed"),
        (status = 401, description = "Role may not change appointments")
    )
)]
async fn update_appointment_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let scope = match auth.role {
        Role::Doctor => AppointmentScope::Doctor(auth.profile_id),
        Role::Patient => AppointmentScope::Patient(auth.profile_id),
        _ => {
            return Err(AppError::unauthorized(
                "Only the doctor or the patient can change an appointment",
            ));
        }
    };
    let next: AppointmentStatus = parse_enum(&body.status)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let current = find_scoped(conn, id, &scope).await?;
    let by_doctor = matches!(scope, AppointmentScope::Doctor(_));
    let allowed = if by_doctor {
        current.status.doctor_can_move_to(next)
    } else {
        current.status.patient_can_move_to(next)
    };
    if !allowed {
        return Err(AppError::BadRequest(format!(
            "Cannot move appointment from {} to {}",
            current.status, next
        )));
    }

    let doctor_notes = if by_doctor {
        optional_text(body.notes)
    } else {
        None
    };

    let updated = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let target = appointments::table
                    .find(current.id)
                    .filter(appointments::status.eq(current.status));
                let updated = match doctor_notes {
                    Some(notes) => diesel::update(target)
                        .set((
                            appointments::status.eq(next),
                            appointments::doctor_notes.eq(Some(notes)),
                        ))
                        .returning(AppointmentEntity::as_returning())
                        .get_result(conn)
                        .await,
                    None => diesel::update(target)
                        .set(appointments::status.eq(next))
                        .returning(AppointmentEntity::as_returning())
                        .get_result(conn)
                        .await,
                }
                .optional()
                .context("Failed to update appointment")?
                .ok_or_else(|| AppError::Conflict("Appointment was changed concurrently".into()))?;

                let (recipient, title) = if by_doctor {
                    (
                        shared::patient_user_id(conn, updated.patient_id).await?,
                        "Appointment updated",
                    )
                } else {
                    (
                        shared::doctor_user_id(conn, updated.doctor_id).await?,
                        "Appointment cancelled",
                    )
                };
                notifier::notify(
                    conn,
                    recipient,
                    NotificationKind::Appointment,
                    title,
                    format!("Appointment #{} is now {}.", updated.id, updated.status),
                )
                .await?;

                Ok::<AppointmentEntity, AppError>(updated)
            })
        })
        .await?;

    tracing::info!(
        "Appointment #{} moved from {} to {}",
        updated.id,
        current.status,
        updated.status
    );

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Updated appointment successfully"),
    })
}
