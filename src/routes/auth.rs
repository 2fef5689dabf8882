use anyhow::Context;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::NaiveDate;
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    dsl::exists,
    result::{DatabaseErrorKind, Error as DieselError},
    select,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    api::email,
    domain::{NotificationKind, Role},
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        auth::{self, Claims},
        middleware::AuthUser,
    },
    models::{
        AdminEntity, CreateDeliveryPartnerEntity, CreateDoctorEntity, CreateLaboratoryEntity,
        CreatePatientEntity, CreatePharmacyEntity, CreateUserEntity, DeliveryPartnerEntity,
        DoctorEntity, LaboratoryEntity, PatientEntity, PharmacyEntity, UserEntity,
    },
    notifier,
    routes::shared::{optional_text, parse_enum, required_text},
    schema::{admins, delivery_partners, doctors, laboratories, patients, pharmacies, users},
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/auth",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(register))
            .routes(utoipa_axum::routes!(login))
            .routes(utoipa_axum::routes!(me)),
    )
}

/// Registration form. Which profile fields are required depends on `role`.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct RegisterReq {
    pub email: String,
    pub password: String,
    pub role: String,
    /// Patients, doctors, delivery partners.
    pub full_name: Option<String>,
    /// Pharmacy or laboratory name.
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub license_number: Option<String>,
    pub specialization: Option<String>,
    pub consultation_fee: Option<Decimal>,
    pub experience_years: Option<i32>,
    pub vehicle_number: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum NewProfile {
    Patient {
        full_name: String,
        phone: String,
        address: Option<String>,
        date_of_birth: Option<NaiveDate>,
    },
    Pharmacy {
        name: String,
        license_number: String,
        phone: String,
        address: String,
    },
    Laboratory {
        name: String,
        license_number: String,
        phone: String,
        address: String,
    },
    Doctor {
        full_name: String,
        specialization: String,
        license_number: String,
        phone: String,
        consultation_fee: Decimal,
        experience_years: i32,
    },
    DeliveryPartner {
        full_name: String,
        phone: String,
        vehicle_number: String,
    },
}

impl NewProfile {
    pub fn role(&self) -> Role {
        match self {
            NewProfile::Patient { .. } => Role::Patient,
            NewProfile::Pharmacy { .. } => Role::Pharmacy,
            NewProfile::Laboratory { .. } => Role::Laboratory,
            NewProfile::Doctor { .. } => Role::Doctor,
            NewProfile::DeliveryPartner { .. } => Role::DeliveryPartner,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            NewProfile::Patient { full_name, .. }
            | NewProfile::Doctor { full_name, .. }
            | NewProfile::DeliveryPartner { full_name, .. } => full_name,
            NewProfile::Pharmacy { name, .. } | NewProfile::Laboratory { name, .. } => name,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct ValidRegistration {
    pub email: String,
    pub password: String,
    pub profile: NewProfile,
}

/// Checks the form without touching the database.
pub fn validate_registration(req: RegisterReq) -> Result<ValidRegistration, AppError> {
    let email = normalize_email(&req.email)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let role: Role = parse_enum(&req.role)?;
    let profile = match role {
        Role::Patient => NewProfile::Patient {
            full_name: required_text("full_name", req.full_name)?,
            phone: required_text("phone", req.phone)?,
            address: optional_text(req.address),
            date_of_birth: req.date_of_birth,
        },
        Role::Pharmacy => NewProfile::Pharmacy {
            name: required_text("name", req.name)?,
            license_number: required_text("license_number", req.license_number)?,
            phone: required_text("phone", req.phone)?,
            address: required_text("address", req.address)?,
        },
        Role::Laboratory => NewProfile::Laboratory {
            name: required_text("name", req.name)?,
            license_number: required_text("license_number", req.license_number)?,
            phone: required_text("phone", req.phone)?,
            address: required_text("address", req.address)?,
        },
        Role::Doctor => {
            let consultation_fee = req
                .consultation_fee
                .ok_or_else(|| AppError::bad_request("consultation_fee is required"))?;
            if consultation_fee.is_sign_negative() {
                return Err(AppError::bad_request("consultation_fee cannot be negative"));
            }
            let experience_years = req.experience_years.unwrap_or(0);
            if experience_years < 0 {
                return Err(AppError::bad_request("experience_years cannot be negative"));
            }
            NewProfile::Doctor {
                full_name: required_text("full_name", req.full_name)?,
                specialization: required_text("specialization", req.specialization)?,
                license_number: required_text("license_number", req.license_number)?,
                phone: required_text("phone", req.phone)?,
                consultation_fee,
                experience_years,
            }
        }
        Role::DeliveryPartner => NewProfile::DeliveryPartner {
            full_name: required_text("full_name", req.full_name)?,
            phone: required_text("phone", req.phone)?,
            vehicle_number: required_text("vehicle_number", req.vehicle_number)?,
        },
        Role::Admin => {
            return Err(AppError::bad_request(
                "Administrator accounts cannot be self-registered",
            ));
        }
    };

    Ok(ValidRegistration {
        email,
        password: req.password,
        profile,
    })
}

fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(AppError::bad_request("A valid email address is required"));
    }
    Ok(email)
}

#[derive(Serialize, ToSchema)]
pub struct AuthRes {
    pub token: String,
    pub user: UserEntity,
}

/// Register a new account with its role profile.
#[utoipa::path(
    post,
    path = "/register",
    tags = ["Auth"],
    request_body = RegisterReq,
    responses(
        (status = 201, description = "Registered successfully", body = StdResponse<AuthRes, String>),
        (status = 400, description = "Invalid form or email already registered")
    )
)]
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterReq>,
) -> Result<impl IntoResponse, AppError> {
    let registration = validate_registration(body)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let taken: bool = select(exists(users::table.filter(users::email.eq(&registration.email))))
        .get_result(conn)
        .await
        .context("Failed to check email")?;
    if taken {
        return Err(email_taken());
    }

    let password_hash = auth::hash_password(registration.password).await?;
    let role = registration.profile.role();
    let display_name = registration.profile.display_name().to_string();
    let awaiting_approval = role.requires_approval();

    let (user, profile_id) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let user = diesel::insert_into(users::table)
                    .values(CreateUserEntity {
                        email: registration.email,
                        password_hash,
                        role,
                        is_approved: !awaiting_approval,
                    })
                    .returning(UserEntity::as_returning())
                    .get_result(conn)
                    .await
                    .map_err(map_user_insert_error)?;

                let profile_id = insert_profile(conn, user.id, registration.profile).await?;

                let message = if awaiting_approval {
                    "Your account was created and is awaiting administrator approval."
                } else {
                    "Your account was created successfully."
                };
                notifier::notify(conn, user.id, NotificationKind::Account, "Welcome to MedBook", message)
                    .await?;

                Ok::<(UserEntity, i32), AppError>((user, profile_id))
            })
        })
        .await?;

    tracing::info!("Registered {} #{} ({})", user.role, user.id, user.email);

    email::send_email_detached(
        state.http_client.clone(),
        state.config.email.clone(),
        email::welcome(&user.email, &display_name, awaiting_approval),
    );

    let token = auth::issue_token(
        &state.config.auth.jwt_secret,
        &Claims::new(user.id, user.role, profile_id, state.config.auth.token_ttl_hours),
    )?;

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(AuthRes { token, user }),
            message: Some("Registered successfully"),
        },
    ))
}

fn email_taken() -> AppError {
    AppError::bad_request("Email is already registered")
}

/// A concurrent registration can pass the pre-check and still lose on the
/// unique email index.
pub fn map_user_insert_error(err: DieselError) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => email_taken(),
        other => AppError::Other(anyhow::Error::new(other).context("Failed to create user")),
    }
}

async fn insert_profile(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    profile: NewProfile,
) -> anyhow::Result<i32> {
    let id = match profile {
        NewProfile::Patient {
            full_name,
            phone,
            address,
            date_of_birth,
        } => {
            diesel::insert_into(patients::table)
                .values(CreatePatientEntity {
                    user_id,
                    full_name,
                    phone,
                    address,
                    date_of_birth,
                })
                .returning(patients::id)
                .get_result(conn)
                .await
        }
        NewProfile::Pharmacy {
            name,
            license_number,
            phone,
            address,
        } => {
            diesel::insert_into(pharmacies::table)
                .values(CreatePharmacyEntity {
                    user_id,
                    name,
                    license_number,
                    phone,
                    address,
                })
                .returning(pharmacies::id)
                .get_result(conn)
                .await
        }
        NewProfile::Laboratory {
            name,
            license_number,
            phone,
            address,
        } => {
            diesel::insert_into(laboratories::table)
                .values(CreateLaboratoryEntity {
                    user_id,
                    name,
                    license_number,
                    phone,
                    address,
                })
                .returning(laboratories::id)
                .get_result(conn)
                .await
        }
        NewProfile::Doctor {
            full_name,
            specialization,
            license_number,
            phone,
            consultation_fee,
            experience_years,
        } => {
            diesel::insert_into(doctors::table)
                .values(CreateDoctorEntity {
                    user_id,
                    full_name,
                    specialization,
                    license_number,
                    phone,
                    consultation_fee,
                    experience_years,
                })
                .returning(doctors::id)
                .get_result(conn)
                .await
        }
        NewProfile::DeliveryPartner {
            full_name,
            phone,
            vehicle_number,
        } => {
            diesel::insert_into(delivery_partners::table)
                .values(CreateDeliveryPartnerEntity {
                    user_id,
                    full_name,
                    phone,
                    vehicle_number,
                })
                .returning(delivery_partners::id)
                .get_result(conn)
                .await
        }
    };
    id.context("Failed to create profile")
}

#[derive(Deserialize, ToSchema)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

/// Exchange credentials for a bearer token.
#[utoipa::path(
    post,
    path = "/login",
    tags = ["Auth"],
    request_body = LoginReq,
    responses(
        (status = 200, description = "Logged in successfully", body = StdResponse<AuthRes, String>),
        (status = 401, description = "Invalid email or password")
    )
)]
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginReq>,
) -> Result<impl IntoResponse, AppError> {
    let invalid = || AppError::unauthorized("Invalid email or password");
    let email = body.email.trim().to_lowercase();

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user: UserEntity = users::table
        .filter(users::email.eq(&email))
        .select(UserEntity::as_select())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to look up user")?
        .ok_or_else(invalid)?;

    if !auth::verify_password(body.password, user.password_hash.clone()).await? {
        tracing::info!("Rejected login for {}", email);
        return Err(invalid());
    }

    let profile_id = profile_id_of(conn, &user).await?;
    let token = auth::issue_token(
        &state.config.auth.jwt_secret,
        &Claims::new(user.id, user.role, profile_id, state.config.auth.token_ttl_hours),
    )?;

    Ok(StdResponse {
        data: Some(AuthRes { token, user }),
        message: Some("Logged in successfully"),
    })
}

async fn profile_id_of(conn: &mut AsyncPgConnection, user: &UserEntity) -> Result<i32, AppError> {
    let id = match user.role {
        Role::Patient => {
            patients::table
                .filter(patients::user_id.eq(user.id))
                .select(patients::id)
                .get_result(conn)
                .await
        }
        Role::Pharmacy => {
            pharmacies::table
                .filter(pharmacies::user_id.eq(user.id))
                .select(pharmacies::id)
                .get_result(conn)
                .await
        }
        Role::Laboratory => {
            laboratories::table
                .filter(laboratories::user_id.eq(user.id))
                .select(laboratories::id)
                .get_result(conn)
                .await
        }
        Role::Doctor => {
            doctors::table
                .filter(doctors::user_id.eq(user.id))
                .select(doctors::id)
                .get_result(conn)
                .await
        }
        Role::DeliveryPartner => {
            delivery_partners::table
                .filter(delivery_partners::user_id.eq(user.id))
                .select(delivery_partners::id)
                .get_result(conn)
                .await
        }
        Role::Admin => {
            admins::table
                .filter(admins::user_id.eq(user.id))
                .select(admins::id)
                .get_result(conn)
                .await
        }
    };
    id.with_context(|| format!("User #{} has no {} profile", user.id, user.role))
        .map_err(AppError::Other)
}

#[derive(Serialize, ToSchema)]
#[serde(untagged)]
pub enum Profile {
    Patient(PatientEntity),
    Pharmacy(PharmacyEntity),
    Laboratory(LaboratoryEntity),
    Doctor(DoctorEntity),
    DeliveryPartner(DeliveryPartnerEntity),
    Admin(AdminEntity),
}

#[derive(Serialize, ToSchema)]
pub struct MeRes {
    pub user: UserEntity,
    pub profile: Profile,
}

/// The authenticated user and their role profile.
#[utoipa::path(
    get,
    path = "/me",
    tags = ["Auth"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Get profile successfully", body = StdResponse<MeRes, String>),
        (status = 401, description = "Not authenticated")
    )
)]
async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user: UserEntity = users::table
        .find(auth.user_id)
        .select(UserEntity::as_select())
        .get_result(conn)
        .await?;

    let id = auth.profile_id;
    let profile = match auth.role {
        Role::Patient => Profile::Patient(
            patients::table
                .find(id)
                .select(PatientEntity::as_select())
                .get_result(conn)
                .await?,
        ),
        Role::Pharmacy => Profile::Pharmacy(
            pharmacies::table
                .find(id)
                .select(PharmacyEntity::as_select())
                .get_result(conn)
                .await?,
        ),
        Role::Laboratory => Profile::Laboratory(
            laboratories::table
                .find(id)
                .select(LaboratoryEntity::as_select())
                .get_result(conn)
                .await?,
        ),
        Role::Doctor => Profile::Doctor(
            doctors::table
                .find(id)
                .select(DoctorEntity::as_select())
                .get_result(conn)
                .await?,
        ),
        Role::DeliveryPartner => Profile::DeliveryPartner(
            delivery_partners::table
                .find(id)
                .select(DeliveryPartnerEntity::as_select())
                .get_result(conn)
                .await?,
        ),
        Role::Admin => Profile::Admin(
            admins::table
                .find(id)
                .select(AdminEntity::as_select())
                .get_result(conn)
                .await?,
        ),
    };

    Ok(StdResponse {
        data: Some(MeRes { user, profile }),
        message: Some("Get profile successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_email_on_insert_is_a_bad_request() {
        let duplicate = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(String::from("duplicate key value violates unique constraint \"users_email_key\"")),
        );
        match map_user_insert_error(duplicate) {
            AppError::BadRequest(message) => assert_eq!(message, "Email is already registered"),
            other => panic!("unexpected error: {:?}", other),
        }

        let other = DieselError::DatabaseError(
            DatabaseErrorKind::ForeignKeyViolation,
            Box::new(String::from("fk")),
        );
        assert!(matches!(map_user_insert_error(other), AppError::Other(_)));
        assert!(matches!(
            map_user_insert_error(DieselError::RollbackTransaction),
            AppError::Other(_)
        ));
    }

    fn form(role: &str) -> RegisterReq {
        RegisterReq {
            email: "  Someone@Example.COM ".into(),
            password: "correct horse".into(),
            role: role.into(),
            ..Default::default()
        }
    }

    #[test]
    fn patient_needs_name_and_phone() {
        assert!(matches!(
            validate_registration(form("PATIENT")),
            Err(AppError::BadRequest(_))
        ));

        let valid = validate_registration(RegisterReq {
            full_name: Some("Ann Patient".into()),
            phone: Some("555-0100".into()),
            ..form("patient")
        })
        .unwrap();
        assert_eq!(valid.email, "someone@example.com");
        assert_eq!(valid.profile.role(), Role::Patient);
        assert_eq!(valid.profile.display_name(), "Ann Patient");
    }

    #[test]
    fn providers_need_license_and_address() {
        let missing_license = RegisterReq {
            name: Some("Corner Pharmacy".into()),
            phone: Some("555-0101".into()),
            address: Some("1 Main St".into()),
            ..form("PHARMACY")
        };
        assert!(validate_registration(missing_license).is_err());

        let lab = validate_registration(RegisterReq {
            name: Some("City Lab".into()),
            phone: Some("555-0102".into()),
            address: Some("2 Main St".into()),
            license_number: Some("LAB-1".into()),
            ..form("LABORATORY")
        })
        .unwrap();
        assert_eq!(lab.profile.role(), Role::Laboratory);
    }

    #[test]
    fn doctor_needs_a_non_negative_fee() {
        let base = || RegisterReq {
            full_name: Some("Dr. Who".into()),
            specialization: Some("General".into()),
            license_number: Some("MD-1".into()),
            phone: Some("555-0103".into()),
            ..form("DOCTOR")
        };
        assert!(validate_registration(base()).is_err());
        assert!(
            validate_registration(RegisterReq {
                consultation_fee: Some(Decimal::new(-1, 0)),
                ..base()
            })
            .is_err()
        );
        let doctor = validate_registration(RegisterReq {
            consultation_fee: Some(Decimal::new(50000, 2)),
            ..base()
        })
        .unwrap();
        assert!(matches!(
            doctor.profile,
            NewProfile::Doctor {
                experience_years: 0,
                ..
            }
        ));
    }

    #[test]
    fn delivery_partner_needs_vehicle() {
        let partner = RegisterReq {
            full_name: Some("Rider".into()),
            phone: Some("555-0104".into()),
            ..form("DELIVERY_PARTNER")
        };
        assert!(validate_registration(partner).is_err());
    }

    #[test]
    fn admins_cannot_self_register() {
        assert!(matches!(
            validate_registration(RegisterReq {
                full_name: Some("Root".into()),
                ..form("ADMIN")
            }),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_bad_email_password_and_role() {
        assert!(
            validate_registration(RegisterReq {
                email: "not-an-email".into(),
                ..form("PATIENT")
            })
            .is_err()
        );
        assert!(
            validate_registration(RegisterReq {
                password: "short".into(),
                ..form("PATIENT")
            })
            .is_err()
        );
        assert!(validate_registration(form("SUPERUSER")).is_err());
    }
}
