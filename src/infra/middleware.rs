use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::{
    domain::Role,
    infra::{app_error::AppError, app_state::AppState, auth},
};

/// The authenticated caller, resolved from the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i32,
    pub role: Role,
    pub profile_id: i32,
}

impl AuthUser {
    /// Returns the caller's profile ID if they hold `role`.
    pub fn require(&self, role: Role) -> Result<i32, AppError> {
        if self.role == role {
            Ok(self.profile_id)
        } else {
            Err(AppError::Unauthorized(format!(
                "This action requires the {} role",
                role
            )))
        }
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::unauthorized(
                "Your role is not allowed to perform this action",
            ))
        }
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

/// Lets public endpoints tailor their response to a signed-in caller.
impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<AuthUser>().copied())
    }
}

/// Resolves `Authorization: Bearer <token>` into an [`AuthUser`] extension.
/// Requests without the header pass through anonymously; a present but
/// invalid token is rejected outright.
pub async fn authentication(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = bearer_token(request.headers())? {
        let claims = auth::verify_token(&state.config.auth.jwt_secret, token)?;
        request.extensions_mut().insert(AuthUser {
            user_id: claims.sub,
            role: claims.role,
            profile_id: claims.profile_id,
        });
    }

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AppError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized("Invalid Authorization header"))?;

    value
        .strip_prefix("Bearer ")
        .map(|token| Some(token.trim()))
        .ok_or_else(|| AppError::unauthorized("Authorization header must use the Bearer scheme"))
}

async fn authorize_role(role: Role, request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .copied()
        .ok_or_else(|| AppError::unauthorized("Authentication required"))?;
    user.require(role)?;
    Ok(next.run(request).await)
}

pub async fn admins_authorization(request: Request, next: Next) -> Result<Response, AppError> {
    authorize_role(Role::Admin, request, next).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 1,
            role,
            profile_id: 10,
        }
    }

    #[test]
    fn require_returns_profile_for_matching_role() {
        assert_eq!(user(Role::Doctor).require(Role::Doctor).unwrap(), 10);
        assert!(matches!(
            user(Role::Patient).require(Role::Doctor),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn require_any_checks_membership() {
        assert!(user(Role::Admin).require_any(&[Role::Admin, Role::Pharmacy]).is_ok());
        assert!(user(Role::Patient).require_any(&[Role::Admin]).is_err());
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers).unwrap(), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(bearer_token(&headers).is_err());
    }
}
