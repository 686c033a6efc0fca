// =============================================================================
// Barangay Backend - Notification Collaborator
// =============================================================================
// In-app notifications, written best-effort. Delivery failures are
// logged and swallowed; they never fail the triggering operation.
// =============================================================================

use axum::{extract::State, Json};

use crate::auth::AuthUser;
use crate::db::{Concern, Database};
use crate::error::ApiError;
use crate::AppState;

/// Notify a concern's reporter that a vote landed. Fire-and-forget.
pub async fn notify_vote(db: &Database, concern: &Concern, voter_name: &str, value: i64) {
    let Some(reporter_id) = concern.reporter_id.as_deref() else {
        return;
    };
    let direction = if value > 0 { "upvoted" } else { "downvoted" };
    let message = format!("{} {} your concern \"{}\"", voter_name, direction, concern.title);
    if let Err(e) = db
        .insert_notification(reporter_id, "VOTE", &message, Some(&concern.id))
        .await
    {
        tracing::warn!("Failed to record vote notification: {}", e);
    }
}

/// Notify a concern's reporter of a status transition. Fire-and-forget.
pub async fn notify_status_change(db: &Database, concern: &Concern, old: &str, new: &str) {
    let Some(reporter_id) = concern.reporter_id.as_deref() else {
        return;
    };
    let message = format!(
        "Your concern \"{}\" moved from {} to {}",
        concern.title, old, new
    );
    if let Err(e) = db
        .insert_notification(reporter_id, "STATUS_CHANGE", &message, Some(&concern.id))
        .await
    {
        tracing::warn!("Failed to record status notification: {}", e);
    }
}

/// List the authenticated user's notifications.
pub async fn get_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notifications = state.db.list_notifications(&auth.user_id).await?;
    Ok(Json(serde_json::json!({ "notifications": notifications })))
}
