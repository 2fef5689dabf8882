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
    models::{CreateMedicineEntity, MedicineEntity, UpdateMedicineEntity},
    routes::shared::{like_pattern, optional_text, required_text},
    schema::{medicines, pharmacies},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/medicines",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_medicines))
            .routes(utoipa_axum::routes!(create_medicine))
            .routes(utoipa_axum::routes!(get_my_medicines))
            .routes(utoipa_axum::routes!(get_medicine))
            .routes(utoipa_axum::routes!(update_medicine))
            .routes(utoipa_axum::routes!(delete_medicine)),
    )
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct MedicineQuery {
    pub pharmacy_id: Option<i32>,
    /// Matches name or generic name.
    pub q: Option<String>,
    pub category: Option<String>,
}

/// Browse active medicines of approved pharmacies.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Medicines"],
    params(MedicineQuery),
    responses(
        (status = 200, description = "List medicines", body = StdResponse<Vec<MedicineEntity>, String>)
    )
)]
async fn get_medicines(
    State(state): State<AppState>,
    Query(params): Query<MedicineQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut query = medicines::table
        .inner_join(pharmacies::table)
        .filter(medicines::is_active.eq(true))
        .filter(pharmacies::is_approved.eq(true))
        .select(MedicineEntity::as_select())
        .into_boxed();
    if let Some(pharmacy_id) = params.pharmacy_id {
        query = query.filter(medicines::pharmacy_id.eq(pharmacy_id));
    }
    if let Some(term) = optional_text(params.q) {
        let pattern = like_pattern(&term);
        query = query.filter(
            medicines::name
                .ilike(pattern.clone())
                .or(medicines::generic_name.ilike(pattern)),
        );
    }
    if let Some(category) = optional_text(params.category) {
        query = query.filter(medicines::category.ilike(category));
    }

    let medicines: Vec<MedicineEntity> = query
        .order_by(medicines::name.asc())
        .get_results(conn)
        .await
        .context("Failed to get medicines")?;

    Ok(StdResponse {
        data: Some(medicines),
        message: Some("Get medicines successfully"),
    })
}

/// The calling pharmacy's catalog, including deactivated items.
#[utoipa::path(
    get,
    path = "/mine",
    tags = ["Medicines"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my medicines", body = StdResponse<Vec<MedicineEntity>, String>),
        (status = 401, description = "Not a pharmacy")
    )
)]
async fn get_my_medicines(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let pharmacy_id = auth.require(Role::Pharmacy)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let medicines: Vec<MedicineEntity> = medicines::table
        .filter(medicines::pharmacy_id.eq(pharmacy_id))
        .order_by(medicines::name.asc())
        .select(MedicineEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get my medicines")?;

    Ok(StdResponse {
        data: Some(medicines),
        message: Some("Get my medicines successfully"),
    })
}

/// Fetch a medicine. Hidden items are only visible to the owning pharmacy.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Medicines"],
    params(
        ("id" = i32, Path, description = "Medicine ID to fetch")
    ),
    responses(
        (status = 200, description = "Get medicine successfully", body = StdResponse<MedicineEntity, String>),
        (status = 404, description = "Medicine not found")
    )
)]
async fn get_medicine(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: Option<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (medicine, pharmacy_approved): (MedicineEntity, bool) = medicines::table
        .inner_join(pharmacies::table)
        .filter(medicines::id.eq(id))
        .select((MedicineEntity::as_select(), pharmacies::is_approved))
        .get_result(conn)
        .await?;

    let owner = auth.is_some_and(|auth| {
        auth.is(Role::Pharmacy) && auth.profile_id == medicine.pharmacy_id
    });
    if !owner && !(medicine.is_active && pharmacy_approved) {
        return Err(AppError::NotFound);
    }

    Ok(StdResponse {
        data: Some(medicine),
        message: Some("Get medicine successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CreateMedicineReq {
    pub name: Option<String>,
    pub generic_name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub requires_prescription: bool,
}

fn check_price_and_stock(price: Option<Decimal>, stock: Option<i32>) -> Result<(), AppError> {
    if price.is_some_and(|price| price.is_sign_negative()) {
        return Err(AppError::bad_request("price cannot be negative"));
    }
    if stock.is_some_and(|stock| stock < 0) {
        return Err(AppError::bad_request("stock cannot be negative"));
    }
    Ok(())
}

pub fn validate_update(changes: &mut UpdateMedicineEntity) -> Result<(), AppError> {
    if let Some(name) = changes.name.take() {
        changes.name = Some(required_text("name", Some(name))?);
    }
    check_price_and_stock(changes.price, changes.stock)?;

    let UpdateMedicineEntity {
        name,
        generic_name,
        manufacturer,
        category,
        description,
        price,
        stock,
        requires_prescription,
        is_active,
    } = changes;
    let empty = name.is_none()
        && generic_name.is_none()
        && manufacturer.is_none()
        && category.is_none()
        && description.is_none()
        && price.is_none()
        && stock.is_none()
        && requires_prescription.is_none()
        && is_active.is_none();
    if empty {
        return Err(AppError::bad_request("Nothing to update"));
    }
    Ok(())
}

/// Add a medicine to the calling pharmacy's catalog.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Medicines"],
    security(("bearerAuth" = [])),
    request_body = CreateMedicineReq,
    responses(
        (status = 201, description = "Created medicine successfully", body = StdResponse<MedicineEntity, String>),
        (status = 400, description = "Invalid medicine"),
        (status = 401, description = "Not a pharmacy")
    )
)]
async fn create_medicine(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateMedicineReq>,
) -> Result<impl IntoResponse, AppError> {
    let pharmacy_id = auth.require(Role::Pharmacy)?;
    let name = required_text("name", body.name)?;
    check_price_and_stock(Some(body.price), Some(body.stock))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let medicine = diesel::insert_into(medicines::table)
        .values(CreateMedicineEntity {
            pharmacy_id,
            name,
            generic_name: optional_text(body.generic_name),
            manufacturer: optional_text(body.manufacturer),
            category: optional_text(body.category),
            description: optional_text(body.description),
            price: body.price,
            stock: body.stock,
            requires_prescription: body.requires_prescription,
        })
        .returning(MedicineEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create medicine")?;

    tracing::info!("Pharmacy #{} added medicine #{}", pharmacy_id, medicine.id);

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(medicine),
            message: Some("Created medicine successfully"),
        },
    ))
}

/// Update one of the calling pharmacy's medicines.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Medicines"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Medicine ID to update")
    ),
    request_body = UpdateMedicineEntity,
    responses(
        (status = 200, description = "Updated medicine successfully", body = StdResponse<MedicineEntity, String>),
        (status = 400, description = "Invalid changes"),
        (status = 404, description = "Medicine not found")
    )
)]
async fn update_medicine(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(mut body): Json<UpdateMedicineEntity>,
) -> Result<impl IntoResponse, AppError> {
    let pharmacy_id = auth.require(Role::Pharmacy)?;
    validate_update(&mut body)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let medicine: MedicineEntity = diesel::update(
        medicines::table
            .find(id)
            .filter(medicines::pharmacy_id.eq(pharmacy_id)),
    )
    .set(&body)
    .returning(MedicineEntity::as_returning())
    .get_result(conn)
    .await?;

    Ok(StdResponse {
        data: Some(medicine),
        message: Some("Updated medicine successfully"),
    })
}

/// Deactivate one of the calling pharmacy's medicines. Rows are kept for
/// order history.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Medicines"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Medicine ID to deactivate")
    ),
    responses(
        (status = 200, description = "Deactivated medicine successfully", body = StdResponse<MedicineEntity, String>),
        (status = 404, description = "Medicine not found")
    )
)]
async fn delete_medicine(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let pharmacy_id = auth.require(Role::Pharmacy)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let medicine: MedicineEntity = diesel::update(
        medicines::table
            .find(id)
            .filter(medicines::pharmacy_id.eq(pharmacy_id)),
    )
    .set(medicines::is_active.eq(false))
    .returning(MedicineEntity::as_returning())
    .get_result(conn)
    .await?;

    tracing::info!("Pharmacy #{} deactivated medicine #{}", pharmacy_id, medicine.id);

    Ok(StdResponse {
        data: Some(medicine),
        message: Some("Deactivated medicine successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_updates_are_rejected() {
        assert!(matches!(
            validate_update(&mut UpdateMedicineEntity::default()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn update_values_are_checked_and_trimmed() {
        let mut rename = UpdateMedicineEntity {
            name: Some("  Ibuprofen  ".into()),
            ..Default::default()
        };
        validate_update(&mut rename).unwrap();
        assert_eq!(rename.name.as_deref(), Some("Ibuprofen"));

        let mut blank = UpdateMedicineEntity {
            name: Some(" ".into()),
            ..Default::default()
        };
        assert!(validate_update(&mut blank).is_err());

        let mut negative = UpdateMedicineEntity {
            stock: Some(-1),
            ..Default::default()
        };
        assert!(validate_update(&mut negative).is_err());

        let mut deactivate = UpdateMedicineEntity {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(validate_update(&mut deactivate).is_ok());
    }
}
