//! User accounts: signup, login, profile and admin management under
//! `/api/auth`.

mod tokens;

pub use tokens::{hash_password, verify_password, TokenKeys};

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::server::ApiError;
use crate::state::{NewUser, User, UserChanges, UserStore, ROLE_ADMIN, ROLE_USER};

const LIST_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct AuthState {
    pub users: UserStore,
    pub keys: Arc<TokenKeys>,
    pub bcrypt_cost: u32,
}

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/users/me", get(read_me).put(update_me))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", delete(delete_user))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UserCreate {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    ROLE_USER.to_string()
}

#[derive(Debug, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// The user named by a valid bearer token.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AuthState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AuthState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

        let claims = state
            .keys
            .verify(token)
            .ok_or_else(|| ApiError::Unauthorized("Could not validate credentials".to_string()))?;

        let user = state
            .users
            .find_by_email(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;
        Ok(CurrentUser(user))
    }
}

/// A [`CurrentUser`] whose role is admin.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AuthState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AuthState) -> Result<Self, ApiError> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden("Not enough permissions".to_string()));
        }
        Ok(AdminUser(user))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn signup(
    State(state): State<AuthState>,
    Json(body): Json<UserCreate>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = register(&state, body).await?;
    info!(user_id = %user.id, "User signed up");
    Ok(Json(issue_token(&state, &user.email)?))
}

async fn login(
    State(state): State<AuthState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let rejected = || ApiError::Unauthorized("Incorrect email or password".to_string());

    let user = state
        .users
        .find_by_email(&form.username)
        .await?
        .ok_or_else(rejected)?;
    if !verify_password(form.password, user.hashed_password.clone()).await {
        return Err(rejected());
    }
    info!(user_id = %user.id, "User logged in");
    Ok(Json(issue_token(&state, &user.email)?))
}

async fn read_me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

async fn update_me(
    State(state): State<AuthState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<UserUpdate>,
) -> Result<Json<User>, ApiError> {
    if let Some(email) = &body.email {
        validate_email(email)?;
        if *email != user.email && state.users.find_by_email(email).await?.is_some() {
            return Err(ApiError::BadRequest("Email already registered".to_string()));
        }
    }

    let hashed_password = match body.password {
        Some(password) => Some(hash_password(password, state.bcrypt_cost).await?),
        None => None,
    };

    let changes = UserChanges {
        email: body.email,
        name: body.name,
        hashed_password,
    };
    let updated = state
        .users
        .update(&user.id, changes)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Failed to update user".to_string()))?;
    Ok(Json(updated))
}

async fn list_users(
    State(state): State<AuthState>,
    _admin: AdminUser,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.users.list(LIST_LIMIT).await?))
}

async fn create_user(
    State(state): State<AuthState>,
    AdminUser(admin): AdminUser,
    Json(body): Json<UserCreate>,
) -> Result<Json<User>, ApiError> {
    let user = register(&state, body).await?;
    info!(user_id = %user.id, admin_id = %admin.id, "User created by admin");
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AuthState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if user_id == admin.id {
        return Err(ApiError::BadRequest(
            "Cannot delete your own account".to_string(),
        ));
    }
    if !state.users.delete(&user_id).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    info!(user_id = %user_id, admin_id = %admin.id, "User deleted");
    Ok(Json(json!({"message": "User deleted successfully"})))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn register(state: &AuthState, body: UserCreate) -> Result<User, ApiError> {
    validate_email(&body.email)?;
    if body.role != ROLE_USER && body.role != ROLE_ADMIN {
        return Err(ApiError::Unprocessable(format!(
            "role must be '{}' or '{}'",
            ROLE_USER, ROLE_ADMIN
        )));
    }
    // skips hashing for the common case; the unique index settles races
    if state.users.find_by_email(&body.email).await?.is_some() {
        return Err(ApiError::BadRequest("Email already registered".to_string()));
    }

    let hashed_password = hash_password(body.password, state.bcrypt_cost).await?;
    let user = state
        .users
        .create(NewUser {
            email: body.email,
            name: body.name,
            role: body.role,
            hashed_password,
        })
        .await?;
    Ok(user)
}

fn issue_token(state: &AuthState, email: &str) -> Result<TokenResponse, ApiError> {
    Ok(TokenResponse {
        access_token: state.keys.issue(email)?,
        token_type: "bearer",
    })
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if valid && !email.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(ApiError::Unprocessable(format!(
            "'{}' is not a valid email address",
            email
        )))
    }
}
