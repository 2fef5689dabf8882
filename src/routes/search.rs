use anyhow::Context;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl, SelectableHelper,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    models::{DoctorEntity, LabTestEntity, LaboratoryEntity, MedicineEntity, PharmacyEntity},
    routes::shared::like_pattern,
    schema::{doctors, lab_tests, laboratories, medicines, pharmacies},
};

const MIN_TERM_CHARS: usize = 2;
const RESULTS_PER_KIND: i64 = 20;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(utoipa_axum::routes!(search))
}

#[derive(Deserialize, ToSchema, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    #[default]
    All,
    Medicines,
    LabTests,
    Doctors,
    Pharmacies,
    Laboratories,
}

impl SearchKind {
    fn includes(&self, kind: SearchKind) -> bool {
        *self == SearchKind::All || *self == kind
    }
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// At least two characters.
    pub q: Option<String>,
    #[param(inline)]
    pub kind: Option<SearchKind>,
}

#[derive(Serialize, ToSchema, Debug, Default)]
pub struct SearchRes {
    pub medicines: Vec<MedicineEntity>,
    pub lab_tests: Vec<LabTestEntity>,
    pub doctors: Vec<DoctorEntity>,
    pub pharmacies: Vec<PharmacyEntity>,
    pub laboratories: Vec<LaboratoryEntity>,
}

pub fn search_term(q: Option<&str>) -> Result<&str, AppError> {
    let term = q.map(str::trim).unwrap_or_default();
    if term.chars().count() < MIN_TERM_CHARS {
        return Err(AppError::BadRequest(format!(
            "Search term must be at least {} characters",
            MIN_TERM_CHARS
        )));
    }
    Ok(term)
}

/// Case-insensitive search over approved providers and their active catalogs.
#[utoipa::path(
    get,
    path = "/search",
    tags = ["Search"],
    params(SearchQuery),
    responses(
        (status = 200, description = "Search results", body = StdResponse<SearchRes, String>),
        (status = 400, description = "Search term too short")
    )
)]
async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let pattern = like_pattern(search_term(params.q.as_deref())?);
    let kind = params.kind.unwrap_or_default();

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut results = SearchRes::default();
    if kind.includes(SearchKind::Medicines) {
        results.medicines = search_medicines(conn, &pattern).await?;
    }
    if kind.includes(SearchKind::LabTests) {
        results.lab_tests = search_lab_tests(conn, &pattern).await?;
    }
    if kind.includes(SearchKind::Doctors) {
        results.doctors = doctors::table
            .filter(doctors::is_approved.eq(true))
            .filter(
                doctors::full_name
                    .ilike(pattern.as_str())
                    .or(doctors::specialization.ilike(pattern.as_str())),
            )
            .order_by(doctors::full_name.asc())
            .limit(RESULTS_PER_KIND)
            .select(DoctorEntity::as_select())
            .get_results(conn)
            .await
            .context("Failed to search doctors")?;
    }
    if kind.includes(SearchKind::Pharmacies) {
        results.pharmacies = pharmacies::table
            .filter(pharmacies::is_approved.eq(true))
            .filter(
                pharmacies::name
                    .ilike(pattern.as_str())
                    .or(pharmacies::address.ilike(pattern.as_str())),
            )
            .order_by(pharmacies::name.asc())
            .limit(RESULTS_PER_KIND)
            .select(PharmacyEntity::as_select())
            .get_results(conn)
            .await
            .context("Failed to search pharmacies")?;
    }
    if kind.includes(SearchKind::Laboratories) {
        results.laboratories = laboratories::table
            .filter(laboratories::is_approved.eq(true))
            .filter(
                laboratories::name
                    .ilike(pattern.as_str())
                    .or(laboratories::address.ilike(pattern.as_str())),
            )
            .order_by(laboratories::name.asc())
            .limit(RESULTS_PER_KIND)
            .select(LaboratoryEntity::as_select())
            .get_results(conn)
            .await
            .context("Failed to search laboratories")?;
    }

    Ok(StdResponse {
        data: Some(results),
        message: Some("Search completed successfully"),
    })
}

async fn search_medicines(
    conn: &mut AsyncPgConnection,
    pattern: &str,
) -> Result<Vec<MedicineEntity>, AppError> {
    Ok(medicines::table
        .inner_join(pharmacies::table)
        .filter(medicines::is_active.eq(true))
        .filter(pharmacies::is_approved.eq(true))
        .filter(
            medicines::name
                .ilike(pattern)
                .or(medicines::generic_name.ilike(pattern))
                .or(medicines::category.ilike(pattern)),
        )
        .order_by(medicines::name.asc())
        .limit(RESULTS_PER_KIND)
        .select(MedicineEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to search medicines")?)
}

async fn search_lab_tests(
    conn: &mut AsyncPgConnection,
    pattern: &str,
) -> Result<Vec<LabTestEntity>, AppError> {
    Ok(lab_tests::table
        .inner_join(laboratories::table)
        .filter(lab_tests::is_active.eq(true))
        .filter(laboratories::is_approved.eq(true))
        .filter(
            lab_tests::name
                .ilike(pattern)
                .or(lab_tests::category.ilike(pattern)),
        )
        .order_by(lab_tests::name.asc())
        .limit(RESULTS_PER_KIND)
        .select(LabTestEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to search lab tests")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_terms_are_rejected() {
        assert!(matches!(search_term(None), Err(AppError::BadRequest(_))));
        assert!(matches!(search_term(Some(" a ")), Err(AppError::BadRequest(_))));
        assert_eq!(search_term(Some(" ab ")).unwrap(), "ab");
    }

    #[test]
    fn all_includes_every_kind() {
        assert!(SearchKind::All.includes(SearchKind::Doctors));
        assert!(SearchKind::Doctors.includes(SearchKind::Doctors));
        assert!(!SearchKind::Doctors.includes(SearchKind::Medicines));
    }

    #[test]
    fn kinds_deserialize_from_snake_case() {
        let kind: SearchKind = serde_json::from_str("\"lab_tests\"").unwrap();
        assert_eq!(kind, SearchKind::LabTests);
    }
}
