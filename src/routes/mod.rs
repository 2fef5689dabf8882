use axum::Router;
use utoipa_axum::router::OpenApiRouter;

use crate::infra::{app_state::AppState, swagger};

pub mod admin;
pub mod appointments;
pub mod auth;
pub mod deliveries;
pub mod earnings;
pub mod lab_bookings;
pub mod lab_tests;
pub mod medicines;
pub mod notifications;
pub mod orders;
pub mod prescriptions;
pub mod providers;
pub mod search;
pub mod shared;

/// Every API route under `/api`, with its OpenAPI description.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/api",
        OpenApiRouter::new()
            .merge(auth::routes_with_openapi())
            .merge(orders::routes_with_openapi())
            .merge(deliveries::routes_with_openapi())
            .merge(lab_bookings::routes_with_openapi())
            .merge(appointments::routes_with_openapi())
            .merge(medicines::routes_with_openapi())
            .merge(lab_tests::routes_with_openapi())
            .merge(prescriptions::routes_with_openapi())
            .merge(notifications::routes_with_openapi())
            .merge(search::routes_with_openapi())
            .merge(providers::routes_with_openapi())
            .merge(earnings::routes_with_openapi())
            .merge(admin::routes_with_openapi()),
    )
}

/// The full application: API routes plus the Swagger UI serving their
/// OpenAPI document.
pub fn router() -> Router<AppState> {
    let (routes, mut openapi) = routes_with_openapi().split_for_parts();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("MedBook Marketplace API")
        .version("1.0.0")
        .build();

    routes.merge(swagger::create_swagger_ui(openapi))
}
