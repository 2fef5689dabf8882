use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, NullableExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    api::ocr,
    domain::Role,
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::AuthUser,
    },
    models::{CreatePrescriptionEntity, PrescriptionEntity},
    schema::{orders, prescriptions},
};

const MAX_NAME_LEN: usize = 255;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/prescriptions",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_prescriptions))
            .routes(utoipa_axum::routes!(upload_prescription))
            .routes(utoipa_axum::routes!(get_prescription))
            .routes(utoipa_axum::routes!(download_prescription))
            // Size is enforced while streaming against the configured limit.
            .layer(DefaultBodyLimit::disable()),
    )
}

/// Multipart form with a single `file` part (PNG, JPEG or PDF).
#[derive(ToSchema)]
#[allow(dead_code)]
struct UploadPrescriptionForm {
    #[schema(format = Binary)]
    file: String,
}

/// Keeps the last path segment of a client-supplied file name.
pub fn clean_file_name(raw: Option<&str>) -> String {
    let name = raw
        .and_then(|raw| raw.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("prescription");
    name.chars().take(MAX_NAME_LEN).collect()
}

enum PrescriptionScope {
    Patient(i32),
    Pharmacy(i32),
    All,
}

impl PrescriptionScope {
    fn of(auth: &AuthUser) -> Result<Self, AppError> {
        match auth.role {
            Role::Patient => Ok(PrescriptionScope::Patient(auth.profile_id)),
            Role::Pharmacy => Ok(PrescriptionScope::Pharmacy(auth.profile_id)),
            Role::Admin => Ok(PrescriptionScope::All),
            _ => Err(AppError::unauthorized(
                "Only patients, pharmacies and administrators can view prescriptions",
            )),
        }
    }
}

async fn find_scoped(
    conn: &mut AsyncPgConnection,
    id: Option<i32>,
    scope: &PrescriptionScope,
) -> Result<Vec<PrescriptionEntity>, AppError> {
    let mut query = prescriptions::table.into_boxed();
    if let Some(id) = id {
        query = query.filter(prescriptions::id.eq(id));
    }
    query = match scope {
        PrescriptionScope::Patient(patient_id) => {
            query.filter(prescriptions::patient_id.eq(*patient_id))
        }
        // Pharmacies see prescriptions attached to their orders.
        PrescriptionScope::Pharmacy(pharmacy_id) => query.filter(
            prescriptions::id.nullable().eq_any(
                orders::table
                    .filter(orders::pharmacy_id.eq(*pharmacy_id))
                    .select(orders::prescription_id),
            ),
        ),
        PrescriptionScope::All => query,
    };

    Ok(query
        .order_by(prescriptions::created_at.desc())
        .select(PrescriptionEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get prescriptions")?)
}

/// Upload a prescription image or PDF. Text is extracted with OCR when
/// available.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Prescriptions"],
    security(("bearerAuth" = [])),
    request_body(content = UploadPrescriptionForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Uploaded prescription successfully", body = StdResponse<PrescriptionEntity, String>),
        (status = 400, description = "Missing, empty, oversized or unsupported file"),
        (status = 401, description = "Not a patient")
    )
)]
async fn upload_prescription(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let patient_id = auth.require(Role::Patient)?;
    let max_bytes = state.prescriptions.max_bytes();

    let mut upload = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = clean_file_name(field.file_name());
        let content_type = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("The file part needs a Content-Type"))?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| AppError::BadRequest(err.body_text()))?
        {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::BadRequest(format!(
                    "Uploaded file exceeds the {} byte limit",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((original_name, content_type, bytes));
        break;
    }
    let (original_name, content_type, bytes) =
        upload.ok_or_else(|| AppError::bad_request("A `file` part is required"))?;

    let store = state.prescriptions.clone();
    let stored = tokio::task::spawn_blocking({
        let content_type = content_type.clone();
        move || store.save(patient_id, &content_type, &bytes)
    })
    .await
    .context("Upload task panicked")??;

    let extracted_text = ocr::extract_text(&state.config.ocr, &stored.absolute_path).await;

    let record = CreatePrescriptionEntity {
        patient_id,
        original_name,
        stored_path: stored.relative_path.clone(),
        content_type,
        size_bytes: stored.size_bytes,
        extracted_text,
    };
    let prescription = match insert_prescription(&state, record).await {
        Ok(prescription) => prescription,
        Err(err) => {
            discard_upload(&state, stored.relative_path).await;
            return Err(err);
        }
    };

    tracing::info!(
        "Patient #{} uploaded prescription #{} ({} bytes, OCR {})",
        patient_id,
        prescription.id,
        prescription.size_bytes,
        if prescription.extracted_text.is_some() { "ok" } else { "empty" }
    );

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(prescription),
            message: Some("Uploaded prescription successfully"),
        },
    ))
}

async fn insert_prescription(
    state: &AppState,
    record: CreatePrescriptionEntity,
) -> Result<PrescriptionEntity, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    Ok(diesel::insert_into(prescriptions::table)
        .values(record)
        .returning(PrescriptionEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to save prescription")?)
}

/// Removes a file whose prescription row was never written.
async fn discard_upload(state: &AppState, relative_path: String) {
    let store = state.prescriptions.clone();
    let removed = tokio::task::spawn_blocking({
        let relative_path = relative_path.clone();
        move || store.remove(&relative_path)
    })
    .await;
    match removed {
        Ok(Ok(())) => tracing::debug!("Discarded orphaned upload {}", relative_path),
        Ok(Err(err)) => tracing::warn!("Failed to discard upload {}: {:?}", relative_path, err),
        Err(err) => tracing::warn!("Discard task for {} panicked: {:?}", relative_path, err),
    }
}

#[utoipa::path(
    get,
    path = "/",
    tags = ["Prescriptions"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List prescriptions", body = StdResponse<Vec<PrescriptionEntity>, String>),
        (status = 401, description = "Not authenticated or wrong role")
    )
)]
async fn get_prescriptions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = PrescriptionScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let prescriptions = find_scoped(conn, None, &scope).await?;

    Ok(StdResponse {
        data: Some(prescriptions),
        message: Some("Get prescriptions successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Prescriptions"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Prescription ID to fetch")
    ),
    responses(
        (status = 200, description = "Get prescription successfully", body = StdResponse<PrescriptionEntity, String>),
        (status = 404, description = "Prescription not found")
    )
)]
async fn get_prescription(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = PrescriptionScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let prescription = find_scoped(conn, Some(id), &scope)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(prescription),
        message: Some("Get prescription successfully"),
    })
}

/// Stream the stored file back with its original content type.
#[utoipa::path(
    get,
    path = "/{id}/file",
    tags = ["Prescriptions"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Prescription ID to download")
    ),
    responses(
        (status = 200, description = "The uploaded file", content_type = "application/octet-stream", body = Vec<u8>),
        (status = 404, description = "Prescription not found")
    )
)]
async fn download_prescription(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let scope = PrescriptionScope::of(&auth)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let prescription = find_scoped(conn, Some(id), &scope)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;

    let store = state.prescriptions.clone();
    let stored_path = prescription.stored_path.clone();
    let bytes = tokio::task::spawn_blocking(move || store.read(&stored_path))
        .await
        .context("Download task panicked")??;

    Ok(([(header::CONTENT_TYPE, prescription.content_type)], bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_lose_client_paths() {
        assert_eq!(clean_file_name(Some("C:\\Users\\me\\rx.png")), "rx.png");
        assert_eq!(clean_file_name(Some("../../etc/passwd")), "passwd");
        assert_eq!(clean_file_name(Some("  ")), "prescription");
        assert_eq!(clean_file_name(None), "prescription");
        assert_eq!(clean_file_name(Some(&"a".repeat(300))).len(), MAX_NAME_LEN);
    }
}
