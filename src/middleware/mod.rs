use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use crate::models::User;
use crate::AppState;

/// Claims JWT: `sub` - id пользователя, `exp` - время истечения (unix).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Аутентифицированный пользователь (Bearer JWT или Basic).
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Пользователь, если запрос аутентифицирован; гость иначе.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<User>);

impl MaybeAuthUser {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }
}

async fn user_from_bearer(token: &str, state: &AppState) -> Result<User, StatusCode> {
    let key = DecodingKey::from_secret(state.config.jwt.secret.expose().as_bytes());
    let data = decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256)).map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;
    let user_id: i64 = data.claims.sub.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;

    state
        .store
        .find_user(user_id)
        .await
        .map_err(|e| {
            error!("Failed to load user {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn user_from_basic(encoded: &str, state: &AppState) -> Result<User, StatusCode> {
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // email:password
    let (email, password) = credentials.split_once(':').ok_or(StatusCode::UNAUTHORIZED)?;

    let user = state
        .store
        .find_user_by_email(email)
        .await
        .map_err(|e| {
            error!("Failed to load user by email: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !user.verify_password(password) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(user)
}

async fn authenticate(header_value: &str, state: &AppState) -> Result<User, StatusCode> {
    let user = if let Some(token) = header_value.strip_prefix("Bearer ") {
        user_from_bearer(token.trim(), state).await?
    } else if let Some(encoded) = header_value.strip_prefix("Basic ") {
        user_from_basic(encoded.trim(), state).await?
    } else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    if !user.is_active {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(user)
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser(authenticate(header_value, state).await?))
    }
}

impl OptionalFromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Option<Self>, Self::Rejection> {
        // Нет заголовка - гость; неверные учётные данные гостем не делают
        let Some(header_value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let header_value = header_value.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
        Ok(Some(AuthUser(authenticate(header_value, state).await?)))
    }
}

impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user = <AuthUser as OptionalFromRequestParts<Arc<AppState>>>::from_request_parts(parts, state).await?;
        Ok(MaybeAuthUser(user.map(|AuthUser(user)| user)))
    }
}
