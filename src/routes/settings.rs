use axum::{extract::State, Json};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{User, UserSettings},
    schema::{user_settings, users},
    state::AppState,
};

const THEMES: &[&str] = &["light", "dark", "system"];
const FONT_SIZES: &[&str] = &["small", "medium", "large"];
const DEFAULT_VIEWS: &[&str] = &["list", "grid"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettingsResponse {
    pub full_name: String,
    pub email: String,
    pub job_title: String,
    pub department: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettingsPatch {
    pub full_name: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettingsResponse {
    pub two_factor_enabled: bool,
}

#[derive(Deserialize)]
pub struct SecuritySettingsPatch {
    #[serde(rename = "twoFactorEnabled")]
    pub two_factor_enabled: Option<bool>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettingsResponse {
    pub document_updates: bool,
    pub share_notifications: bool,
    pub comment_notifications: bool,
    pub task_reminders: bool,
    pub system_updates: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettingsPatch {
    pub document_updates: Option<bool>,
    pub share_notifications: Option<bool>,
    pub comment_notifications: Option<bool>,
    pub task_reminders: Option<bool>,
    pub system_updates: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySettingsResponse {
    pub theme: String,
    pub font_size: String,
    pub default_view: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySettingsPatch {
    pub theme: Option<String>,
    pub font_size: Option<String>,
    pub default_view: Option<String>,
}

#[derive(Serialize)]
pub struct AllSettingsResponse {
    pub account: AccountSettingsResponse,
    pub security: SecuritySettingsResponse,
    pub notifications: NotificationSettingsResponse,
    pub display: DisplaySettingsResponse,
}

pub async fn get_all_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<AllSettingsResponse>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;

    Ok(Json(AllSettingsResponse {
        account: account_response(&settings, &user),
        security: SecuritySettingsResponse {
            two_factor_enabled: settings.two_factor_enabled,
        },
        notifications: notifications_response(&settings),
        display: display_response(&settings),
    }))
}

pub async fn get_account_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<AccountSettingsResponse>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;
    Ok(Json(account_response(&settings, &user)))
}

pub async fn patch_account_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AccountSettingsPatch>,
) -> AppResult<Json<AccountSettingsResponse>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;

    diesel::update(user_settings::table.find(user.user_id))
        .set((
            user_settings::full_name.eq(payload.full_name.unwrap_or(settings.full_name)),
            user_settings::job_title.eq(payload.job_title.unwrap_or(settings.job_title)),
            user_settings::department.eq(payload.department.unwrap_or(settings.department)),
            user_settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated = load_settings(&mut conn, &user)?;
    Ok(Json(account_response(&updated, &user)))
}

pub async fn get_security_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<SecuritySettingsResponse>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;
    Ok(Json(SecuritySettingsResponse {
        two_factor_enabled: settings.two_factor_enabled,
    }))
}

pub async fn patch_security_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SecuritySettingsPatch>,
) -> AppResult<Json<SecuritySettingsResponse>> {
    match (&payload.current_password, &payload.new_password) {
        (Some(_), None) => {
            return Err(AppError::bad_request("new password is required"));
        }
        (None, Some(_)) => {
            return Err(AppError::bad_request(
                "current password is required to set a new password",
            ));
        }
        _ => {}
    }

    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;

    if let (Some(current), Some(new)) = (&payload.current_password, &payload.new_password) {
        let record: User = users::table.find(user.user_id).first(&mut conn)?;
        let valid = password::verify_password(current, &record.password_hash)
            .map_err(|_| AppError::bad_request("current password is incorrect"))?;
        if !valid {
            return Err(AppError::bad_request("current password is incorrect"));
        }
        if new.len() < password::MIN_PASSWORD_LENGTH {
            return Err(AppError::bad_request(format!(
                "password must be at least {} characters",
                password::MIN_PASSWORD_LENGTH
            )));
        }

        let new_hash = password::hash_password(new)?;
        diesel::update(users::table.find(user.user_id))
            .set((
                users::password_hash.eq(new_hash),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
    }

    diesel::update(user_settings::table.find(user.user_id))
        .set((
            user_settings::two_factor_enabled.eq(payload
                .two_factor_enabled
                .unwrap_or(settings.two_factor_enabled)),
            user_settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated = load_settings(&mut conn, &user)?;
    Ok(Json(SecuritySettingsResponse {
        two_factor_enabled: updated.two_factor_enabled,
    }))
}

pub async fn get_notification_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<NotificationSettingsResponse>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;
    Ok(Json(notifications_response(&settings)))
}

pub async fn patch_notification_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<NotificationSettingsPatch>,
) -> AppResult<Json<NotificationSettingsResponse>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;

    diesel::update(user_settings::table.find(user.user_id))
        .set((
            user_settings::document_updates.eq(payload
                .document_updates
                .unwrap_or(settings.document_updates)),
            user_settings::share_notifications.eq(payload
                .share_notifications
                .unwrap_or(settings.share_notifications)),
            user_settings::comment_notifications.eq(payload
                .comment_notifications
                .unwrap_or(settings.comment_notifications)),
            user_settings::task_reminders
                .eq(payload.task_reminders.unwrap_or(settings.task_reminders)),
            user_settings::system_updates
                .eq(payload.system_updates.unwrap_or(settings.system_updates)),
            user_settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated = load_settings(&mut conn, &user)?;
    Ok(Json(notifications_response(&updated)))
}

pub async fn get_display_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<DisplaySettingsResponse>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;
    Ok(Json(display_response(&settings)))
}

pub async fn patch_display_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<DisplaySettingsPatch>,
) -> AppResult<Json<DisplaySettingsResponse>> {
    if let Some(theme) = payload.theme.as_deref() {
        ensure_choice("theme", theme, THEMES)?;
    }
    if let Some(font_size) = payload.font_size.as_deref() {
        ensure_choice("fontSize", font_size, FONT_SIZES)?;
    }
    if let Some(default_view) = payload.default_view.as_deref() {
        ensure_choice("defaultView", default_view, DEFAULT_VIEWS)?;
    }

    let mut conn = state.db()?;
    let settings = load_settings(&mut conn, &user)?;

    diesel::update(user_settings::table.find(user.user_id))
        .set((
            user_settings::theme.eq(payload.theme.unwrap_or(settings.theme)),
            user_settings::font_size.eq(payload.font_size.unwrap_or(settings.font_size)),
            user_settings::default_view.eq(payload.default_view.unwrap_or(settings.default_view)),
            user_settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated = load_settings(&mut conn, &user)?;
    Ok(Json(display_response(&updated)))
}

fn load_settings(conn: &mut PgConnection, user: &AuthenticatedUser) -> AppResult<UserSettings> {
    user_settings::table
        .find(user.user_id)
        .first(conn)
        .map_err(AppError::from)
}

fn account_response(settings: &UserSettings, user: &AuthenticatedUser) -> AccountSettingsResponse {
    AccountSettingsResponse {
        full_name: settings.full_name.clone(),
        email: user.email.clone(),
        job_title: settings.job_title.clone(),
        department: settings.department.clone(),
    }
}

fn notifications_response(settings: &UserSettings) -> NotificationSettingsResponse {
    NotificationSettingsResponse {
        document_updates: settings.document_updates,
        share_notifications: settings.share_notifications,
        comment_notifications: settings.comment_notifications,
        task_reminders: settings.task_reminders,
        system_updates: settings.system_updates,
    }
}

fn display_response(settings: &UserSettings) -> DisplaySettingsResponse {
    DisplaySettingsResponse {
        theme: settings.theme.clone(),
        font_size: settings.font_size.clone(),
        default_view: settings.default_view.clone(),
    }
}

fn ensure_choice(field: &str, value: &str, allowed: &[&str]) -> AppResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "invalid {field} '{value}'. Allowed values: {}",
            allowed.join(", ")
        )))
    }
}
