// =============================================================================
// Barangay Backend - Authentication Handlers
// =============================================================================

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{User, UserResponse};
use crate::error::ApiError;
use crate::AppState;

// -----------------------------------------------------------------------------
// JWT Claims
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub exp: i64,     // Expiry timestamp
    pub iat: i64,     // Issued at
}

// -----------------------------------------------------------------------------
// Auth Extractor
// -----------------------------------------------------------------------------

/// Authenticated user extracted from JWT token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid authorization format"))?;

        // Get JWT secret from environment (fallback for extractor)
        let secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "default-dev-secret".to_string());

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

        Ok(AuthUser {
            user_id: claims.claims.sub,
        })
    }
}

// -----------------------------------------------------------------------------
// Request/Response Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub barangay: Option<String>,
    pub municipality: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

// -----------------------------------------------------------------------------
// Helper Functions
// -----------------------------------------------------------------------------

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| ApiError::BadRequest("Failed to hash password".into()))
}

/// Verify a password against an Argon2 hash.
fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Create a signed JWT for a user.
pub fn create_token(user_id: &str, secret: &str, expiry_hours: i64) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(expiry_hours)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| ApiError::Unauthorized)
}

/// Load the authenticated user, rejecting deactivated accounts. A user
/// banned by the threshold policy keeps a valid token until expiry but
/// is blocked here on the next request.
pub async fn require_active_user(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    let user = state
        .db
        .find_user_by_id(user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    if !user.account_active {
        return Err(ApiError::Forbidden("Account is deactivated".into()));
    }
    Ok(user)
}

/// Load the authenticated user and require LGU staff role.
pub async fn require_lgu(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    let user = require_active_user(state, user_id).await?;
    if !user.is_lgu() {
        return Err(ApiError::Forbidden("LGU staff role required".into()));
    }
    Ok(user)
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

/// Register a new user account.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if req.username.trim().is_empty() || req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Username required and password must be at least 8 characters".into(),
        ));
    }

    if state
        .db
        .find_user_by_username(&req.username)
        .await?
        .is_some()
    {
        return Err(ApiError::InvalidState("Username already taken".into()));
    }

    let password_hash = hash_password(&req.password)?;
    let user = state
        .db
        .create_user(
            &uuid::Uuid::new_v4().to_string(),
            req.username.trim(),
            req.email.as_deref(),
            Some(&password_hash),
            req.barangay.as_deref(),
            req.municipality.as_deref(),
        )
        .await?;

    let token = create_token(&user.id, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

/// Log in with username and password.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .db
        .find_user_by_username(&req.username)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let valid = user
        .password_hash
        .as_deref()
        .map(|h| verify_password(&req.password, h))
        .unwrap_or(false);
    if !valid {
        return Err(ApiError::Unauthorized);
    }
    if !user.account_active {
        return Err(ApiError::Forbidden("Account is deactivated".into()));
    }

    let token = create_token(&user.id, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

/// Current authenticated user.
pub async fn get_current_user(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .db
        .find_user_by_id(&auth.user_id)
        .await?
        .ok_or(ApiError::NotFound("User not found".into()))?;
    Ok(Json(user.into()))
}
