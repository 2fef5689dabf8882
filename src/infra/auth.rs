//! Credential handling: argon2 password hashes and HS256 bearer tokens.

use anyhow::{Context, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{domain::Role, infra::app_error::AppError};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Claims carried by every bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: i32,
    pub role: Role,
    /// ID of the role-specific profile row (patients.id, pharmacies.id, ...).
    pub profile_id: i32,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: i32, role: Role, profile_id: i32, ttl_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            role,
            profile_id,
            iat: now.timestamp(),
            exp: (now + Duration::hours(ttl_hours)).timestamp(),
        }
    }
}

pub fn issue_token(secret: &str, claims: &Claims) -> anyhow::Result<String> {
    let header = URL_SAFE_NO_PAD.encode(TOKEN_HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).context("Failed to encode claims")?);
    let message = format!("{}.{}", header, payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow!("Failed to create HMAC: {}", err))?;
    mac.update(message.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", message, signature))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AppError::unauthorized("Malformed token"));
    };

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AppError::unauthorized("Malformed token signature"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| AppError::Other(anyhow!("Failed to create HMAC: {}", err)))?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AppError::unauthorized("Invalid token signature"))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AppError::unauthorized("Malformed token payload"))?;
    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|_| AppError::unauthorized("Malformed token claims"))?;

    if claims.exp <= Utc::now().timestamp() {
        return Err(AppError::unauthorized("Token has expired"));
    }

    Ok(claims)
}

/// Hashes on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("Failed to hash password: {}", err))
    })
    .await
    .context("Password hashing task panicked")?
}

pub async fn verify_password(password: String, password_hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|err| anyhow!("Stored password hash is invalid: {}", err))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .context("Password verification task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_tokens_verify() {
        let claims = Claims::new(7, Role::Pharmacy, 3, 1);
        let token = issue_token(SECRET, &claims).unwrap();
        assert_eq!(verify_token(SECRET, &token).unwrap(), claims);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issue_token(SECRET, &Claims::new(1, Role::Patient, 1, 1)).unwrap();
        assert!(matches!(
            verify_token("other-secret", &token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_tampered_payload() {
        let token = issue_token(SECRET, &Claims::new(1, Role::Patient, 1, 1)).unwrap();
        let forged_claims = Claims::new(1, Role::Admin, 1, 1);
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(verify_token(SECRET, &forged).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let claims = Claims::new(1, Role::Patient, 1, -1);
        let token = issue_token(SECRET, &claims).unwrap();
        assert!(matches!(
            verify_token(SECRET, &token),
            Err(AppError::Unauthorized(msg)) if msg.contains("expired")
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(verify_token(SECRET, "not-a-token").is_err());
        assert!(verify_token(SECRET, "a.b.c.d").is_err());
    }

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("correct horse".into()).await.unwrap();
        assert!(verify_password("correct horse".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong horse".into(), hash).await.unwrap());
    }
}
