use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl, SelectableHelper,
};
use diesel_async::RunQueryDsl;
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    domain::Role,
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
    },
    models::{CreateLabTestEntity, LabTestEntity, UpdateLabTestEntity},
    routes::shared::{like_pattern, optional_text, required_text},
    schema::{lab_tests, laboratories},
};

const DEFAULT_TURNAROUND_HOURS: i32 = 24;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/lab-tests",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_lab_tests))
            .routes(utoipa_axum::routes!(create_lab_test))
            .routes(utoipa_axum::routes!(get_my_lab_tests))
            .routes(utoipa_axum::routes!(get_lab_test))
            .routes(utoipa_axum::routes!(update_lab_test))
            .routes(utoipa_axum::routes!(delete_lab_test)),
    )
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct LabTestQuery {
    pub laboratory_id: Option<i32>,
    /// Matches name or description.
    pub q: Option<String>,
    pub category: Option<String>,
    /// Only tests that offer home sample collection.
    pub home_collection: Option<bool>,
}

/// Browse active tests of approved laboratories.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Lab tests"],
    params(LabTestQuery),
    responses(
        (status = 200, description = "List lab tests", body = StdResponse<Vec<LabTestEntity>, String>)
    )
)]
async fn get_lab_tests(
    State(state): State<AppState>,
    Query(params): Query<LabTestQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = lab_tests::table
        .inner_join(laboratories::table)
        .filter(lab_tests::is_active.eq(true))
        .filter(laboratories::is_approved.eq(true))
        .select(LabTestEntity::as_select())
        .into_boxed();
    if let Some(laboratory_id) = params.laboratory_id {
        query = query.filter(lab_tests::laboratory_id.eq(laboratory_id));
    }
    if let Some(term) = optional_text(params.q) {
        let pattern = like_pattern(&term);
        query = query.filter(
            lab_tests::name
                .ilike(pattern.clone())
                .or(lab_tests::description.ilike(pattern)),
        );
    }
    if let Some(category) = optional_text(params.category) {
        query = query.filter(lab_tests::category.ilike(category));
    }
    if params.home_collection == Some(true) {
        query = query.filter(lab_tests::home_collection_available.eq(true));
    }

    let tests: Vec<LabTestEntity> = query
        .order_by(lab_tests::name.asc())
        .get_results(conn)
        .await
        .context("Failed to get lab tests")?;

    Ok(StdResponse {
        data: Some(tests),
        message: Some("Get lab tests successfully"),
    })
}

/// The calling laboratory's catalog, including deactivated tests.
#[utoipa::path(
    get,
    path = "/mine",
    tags = ["Lab tests"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my lab tests", body = StdResponse<Vec<LabTestEntity>, String>),
        (status = 401, description = "Not a laboratory")
    )
)]
async fn get_my_lab_tests(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let laboratory_id = auth.require(Role::Laboratory)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let tests: Vec<LabTestEntity> = lab_tests::table
        .filter(lab_tests::laboratory_id.eq(laboratory_id))
        .order_by(lab_tests::name.asc())
        .select(LabTestEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get my lab tests")?;

    Ok(StdResponse {
        data: Some(tests),
        message: Some("Get my lab tests successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Lab tests"],
    params(
        ("id" = i32, Path, description = "Lab test ID to fetch")
    ),
    responses(
        (status = 200, description = "Get lab test successfully", body = StdResponse<LabTestEntity, String>),
        (status = 404, description = "Lab test not found")
    )
)]
async fn get_lab_test(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: Option<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (test, laboratory_approved): (LabTestEntity, bool) = lab_tests::table
        .inner_join(laboratories::table)
        .filter(lab_tests::id.eq(id))
        .select((LabTestEntity::as_select(), laboratories::is_approved))
        .get_result(conn)
        .await?;

    let owner = auth.is_some_and(|auth| {
        auth.is(Role::Laboratory) && auth.profile_id == test.laboratory_id
    });
    if !owner && !(test.is_active && laboratory_approved) {
        return Err(AppError::NotFound);
    }

    Ok(StdResponse {
        data: Some(test),
        message: Some("Get lab test successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CreateLabTestReq {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sample_type: Option<String>,
    pub price: Decimal,
    /// Defaults to 24.
    pub turnaround_hours: Option<i32>,
    #[serde(default)]
    pub home_collection_available: bool,
}

fn check_price_and_turnaround(
    price: Option<Decimal>,
    turnaround_hours: Option<i32>,
) -> Result<(), AppError> {
    if price.is_some_and(|price| price.is_sign_negative()) {
        return Err(AppError::bad_request("price cannot be negative"));
    }
    if turnaround_hours.is_some_and(|hours| hours < 1) {
        return Err(AppError::bad_request("turnaround_hours must be at least 1"));
    }
    Ok(())
}

pub fn validate_update(changes: &mut UpdateLabTestEntity) -> Result<(), AppError> {
    if let Some(name) = changes.name.take() {
        changes.name = Some(required_text("name", Some(name))?);
    }
    check_price_and_turnaround(changes.price, changes.turnaround_hours)?;

    let UpdateLabTestEntity {
        name,
        description,
        category,
        sample_type,
        price,
        turnaround_hours,
        home_collection_available,
        is_active,
    } = changes;
    let empty = name.is_none()
        && description.is_none()
        && category.is_none()
        && sample_type.is_none()
        && price.is_none()
        && turnaround_hours.is_none()
        && home_collection_available.is_none()
        && is_active.is_none();
    if empty {
        return Err(AppError::bad_request("Nothing to update"));
    }
    Ok(())
}

/// Add a test to the calling laboratory's catalog.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Lab tests"],
    security(("bearerAuth" = [])),
    request_body = CreateLabTestReq,
    responses(
        (status = 201, description = "Created lab test successfully", body = StdResponse<LabTestEntity, String>),
        (status = 400, description = "Invalid lab test"),
        (status = 401, description = "Not a laboratory")
    )
)]
async fn create_lab_test(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateLabTestReq>,
) -> Result<impl IntoResponse, AppError> {
    let laboratory_id = auth.require(Role::Laboratory)?;
    let name = required_text("name", body.name)?;
    let turnaround_hours = body.turnaround_hours.unwrap_or(DEFAULT_TURNAROUND_HOURS);
    check_price_and_turnaround(Some(body.price), Some(turnaround_hours))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let test = diesel::insert_into(lab_tests::table)
        .values(CreateLabTestEntity {
            laboratory_id,
            name,
            description: optional_text(body.description),
            category: optional_text(body.category),
            sample_type: optional_text(body.sample_type),
            price: body.price,
            turnaround_hours,
            home_collection_available: body.home_collection_available,
        })
        .returning(LabTestEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create lab test")?;

    tracing::info!("Laboratory #{} added lab test #{}", laboratory_id, test.id);

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(test),
            message: Some("Created lab test successfully"),
        },
    ))
}

#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Lab tests"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Lab test ID to update")
    ),
    request_body = UpdateLabTestEntity,
    responses(
        (status = 200, description = "Updated lab test successfully", body = StdResponse<LabTestEntity, String>),
        (status = 400, description = "Invalid changes"),
        (status = 404, description = "Lab test not found")
    )
)]
async fn update_lab_test(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(mut body): Json<UpdateLabTestEntity>,
) -> Result<impl IntoResponse, AppError> {
    let laboratory_id = auth.require(Role::Laboratory)?;
    validate_update(&mut body)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let test: LabTestEntity = diesel::update(
        lab_tests::table
            .find(id)
            .filter(lab_tests::laboratory_id.eq(laboratory_id)),
    )
    .set(&body)
    .returning(LabTestEntity::as_returning())
    .get_result(conn)
    .await?;

    Ok(StdResponse {
        data: Some(test),
        message: Some("Updated lab test successfully"),
    })
}

/// Deactivate one of the calling laboratory's tests.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Lab tests"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Lab test ID to deactivate")
    ),
    responses(
        (status = 200, description = "Deactivated lab test successfully", body = StdResponse<LabTestEntity, String>),
        (status = 404, description = "Lab test not found")
    )
)]
async fn delete_lab_test(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let laboratory_id = auth.require(Role::Laboratory)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let test: LabTestEntity = diesel::update(
        lab_tests::table
            .find(id)
            .filter(lab_tests::laboratory_id.eq(laboratory_id)),
    )
    .set(lab_tests::is_active.eq(false))
    .returning(LabTestEntity::as_returning())
    .get_result(conn)
    .await?;

    tracing::info!("Laboratory #{} deactivated lab test #{}", laboratory_id, test.id);

    Ok(StdResponse {
        data: Some(test),
        message: Some("Deactivated lab test successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turnaround_must_be_positive() {
        let mut zero = UpdateLabTestEntity {
            turnaround_hours: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            validate_update(&mut zero),
            Err(AppError::BadRequest(_))
        ));
        assert!(check_price_and_turnaround(Some(Decimal::ZERO), Some(48)).is_ok());
    }

    #[test]
    fn empty_updates_are_rejected() {
        assert!(validate_update(&mut UpdateLabTestEntity::default()).is_err());
    }
}
