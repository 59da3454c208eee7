use std::path::PathBuf;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use gigline_db::Database;
use gigline_gateway::{Dispatcher, Identity};
use gigline_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use gigline_types::models::Role;

use crate::error::ApiError;
use crate::run_blocking;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// Root for uploaded files; attachments live under `chat_attachments/`.
    pub media_dir: PathBuf,
    pub token_ttl: chrono::Duration,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    let username_len = req.username.chars().count();
    if !(3..=32).contains(&username_len) {
        return Err(ApiError::bad_request("username must be 3 to 32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let username = req.username.clone();
    let role = req.role;

    let created = run_blocking(&state, move |db| {
        if db.get_user_by_username(&username)?.is_some() {
            return Ok(false);
        }
        db.create_user(user_id, &username, &password_hash, role.as_str(), chrono::Utc::now())?;
        Ok(true)
    })
    .await?;

    if !created {
        return Err(ApiError::conflict("username already taken"));
    }

    let token = create_token(&state, user_id, &req.username, req.role)?;
    info!("Registered {} ({}) as {}", req.username, user_id, req.role.as_str());

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.clone();
    let user = run_blocking(&state, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is invalid: {}", user.id, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let role = Role::parse(&user.role).ok_or_else(|| {
        warn!("Corrupt role '{}' on user '{}'", user.role, user.id);
        anyhow::anyhow!("corrupt role on user {}", user.id)
    })?;

    let token = create_token(&state, user.id, &user.username, role)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        role,
        token,
    }))
}

pub fn create_token(
    state: &AppStateInner,
    user_id: Uuid,
    username: &str,
    role: Role,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + state.token_ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate an HS256 token and return its claims.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

pub fn identity_of(claims: &Claims) -> Identity {
    Identity {
        user_id: claims.sub,
        username: claims.username.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppStateInner {
        AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            media_dir: std::env::temp_dir(),
            token_ttl: chrono::Duration::days(1),
        }
    }

    #[test]
    fn tokens_round_trip_with_the_same_secret() {
        let state = state();
        let user_id = Uuid::new_v4();
        let token = create_token(&state, user_id, "band", Role::Vendor).unwrap();

        let claims = decode_token("test-secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Vendor);

        assert!(decode_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let mut state = state();
        state.token_ttl = chrono::Duration::days(-1);
        let token = create_token(&state, Uuid::new_v4(), "org", Role::Organizer).unwrap();
        assert!(decode_token("test-secret", &token).is_err());
    }
}
