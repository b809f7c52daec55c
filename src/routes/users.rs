use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, Role},
    error::{AppError, AppResult},
    models::User,
    schema::{refresh_tokens::dsl as refresh_dsl, users},
    state::AppState,
};

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub is_active: bool,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    require_admin(&user)?;

    let mut conn = state.db()?;
    let rows: Vec<User> = users::table.order(users::email.asc()).load(&mut conn)?;

    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    if user_id != user.user_id && !user.role.is_admin() {
        return Err(AppError::forbidden(
            "you do not have permission to view this user",
        ));
    }

    let mut conn = state.db()?;
    let record: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(record.into()))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    require_admin(&user)?;

    let new_role = match payload.role.as_deref() {
        None => None,
        Some(value) => Some(value.parse::<Role>().map_err(AppError::bad_request)?),
    };

    if payload.is_active == Some(false) && user_id == user.user_id {
        return Err(AppError::bad_request(
            "you cannot deactivate your own account",
        ));
    }

    if new_role.is_none() && payload.is_active.is_none() {
        return Err(AppError::bad_request("no changes provided"));
    }

    let mut conn = state.db()?;
    let existing: User = users::table.find(user_id).first(&mut conn)?;
    let now = Utc::now().naive_utc();

    diesel::update(users::table.find(user_id))
        .set((
            users::role.eq(new_role
                .map(|role| role.as_str().to_string())
                .unwrap_or(existing.role)),
            users::is_active.eq(payload.is_active.unwrap_or(existing.is_active)),
            users::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    if payload.is_active == Some(false) {
        revoke_refresh_tokens(&mut conn, user_id)?;
    }

    let updated: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<UserResponse>> {
    require_admin(&user)?;

    if user_id == user.user_id && !payload.is_active {
        return Err(AppError::bad_request(
            "you cannot deactivate your own account",
        ));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let updated_rows = diesel::update(users::table.find(user_id))
        .set((
            users::is_active.eq(payload.is_active),
            users::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    if updated_rows == 0 {
        return Err(AppError::not_found());
    }

    if !payload.is_active {
        revoke_refresh_tokens(&mut conn, user_id)?;
    }

    let updated: User = users::table.find(user_id).first(&mut conn)?;
    info!(target_user = %user_id, is_active = payload.is_active, "account status updated");
    Ok(Json(updated.into()))
}

/// Accounts follow a soft lifecycle: delete deactivates the row and revokes
/// its sessions rather than removing it.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    require_admin(&user)?;

    if user_id == user.user_id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let updated_rows = diesel::update(users::table.find(user_id))
        .set((users::is_active.eq(false), users::updated_at.eq(now)))
        .execute(&mut conn)?;

    if updated_rows == 0 {
        return Err(AppError::not_found());
    }

    revoke_refresh_tokens(&mut conn, user_id)?;
    info!(target_user = %user_id, "account deactivated via delete");

    Ok(StatusCode::NO_CONTENT)
}

fn require_admin(user: &AuthenticatedUser) -> AppResult<()> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "you do not have permission to manage users",
        ))
    }
}

fn revoke_refresh_tokens(conn: &mut PgConnection, user_id: Uuid) -> AppResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(
        refresh_dsl::refresh_tokens
            .filter(refresh_dsl::user_id.eq(user_id))
            .filter(refresh_dsl::revoked_at.is_null()),
    )
    .set((
        refresh_dsl::revoked_at.eq(now),
        refresh_dsl::updated_at.eq(now),
    ))
    .execute(conn)?;
    Ok(())
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    chrono::DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
