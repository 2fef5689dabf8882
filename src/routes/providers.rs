//! Public directory of approved providers.

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, PgTextExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    models::{DoctorEntity, LaboratoryEntity, PharmacyEntity},
    routes::shared::{like_pattern, optional_text},
    schema::{doctors, laboratories, pharmacies},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_pharmacies))
        .routes(utoipa_axum::routes!(get_laboratories))
        .routes(utoipa_axum::routes!(get_doctors))
        .routes(utoipa_axum::routes!(get_doctor))
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct DoctorQuery {
    /// Case-insensitive substring of the specialization.
    pub specialization: Option<String>,
}

#[utoipa::path(
    get,
    path = "/pharmacies",
    tags = ["Providers"],
    responses(
        (status = 200, description = "List approved pharmacies", body = StdResponse<Vec<PharmacyEntity>, String>)
    )
)]
async fn get_pharmacies(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let pharmacies = pharmacies::table
        .filter(pharmacies::is_approved.eq(true))
        .order_by(pharmacies::name.asc())
        .select(PharmacyEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get pharmacies")?;

    Ok(StdResponse {
        data: Some(pharmacies),
        message: Some("Get pharmacies successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/laboratories",
    tags = ["Providers"],
    responses(
        (status = 200, description = "List approved laboratories", body = StdResponse<Vec<LaboratoryEntity>, String>)
    )
)]
async fn get_laboratories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let laboratories = laboratories::table
        .filter(laboratories::is_approved.eq(true))
        .order_by(laboratories::name.asc())
        .select(LaboratoryEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get laboratories")?;

    Ok(StdResponse {
        data: Some(laboratories),
        message: Some("Get laboratories successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/doctors",
    tags = ["Providers"],
    params(DoctorQuery),
    responses(
        (status = 200, description = "List approved doctors", body = StdResponse<Vec<DoctorEntity>, String>)
    )
)]
async fn get_doctors(
    State(state): State<AppState>,
    Query(params): Query<DoctorQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = doctors::table
        .filter(doctors::is_approved.eq(true))
        .into_boxed();
    if let Some(specialization) = optional_text(params.specialization) {
        query = query.filter(doctors::specialization.ilike(like_pattern(&specialization)));
    }

    let doctors = query
        .order_by(doctors::full_name.asc())
        .select(DoctorEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get doctors")?;

    Ok(StdResponse {
        data: Some(doctors),
        message: Some("Get doctors successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/doctors/{id}",
    tags = ["Providers"],
    params(
        ("id" = i32, Path, description = "Doctor ID to fetch")
    ),
    responses(
        (status = 200, description = "Get doctor successfully", body = StdResponse<DoctorEntity, String>),
        (status = 404, description = "Doctor not found or not approved")
    )
)]
async fn get_doctor(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let doctor = doctors::table
        .find(id)
        .filter(doctors::is_approved.eq(true))
        .select(DoctorEntity::as_select())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to get doctor")?
        .ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(doctor),
        message: Some("Get doctor successfully"),
    })
}
