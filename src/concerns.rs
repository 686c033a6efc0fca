// =============================================================================
// Barangay Backend - Concerns API
// =============================================================================
// Concern submission (authenticated or anonymous), detail with votes
// and comments, LGU status triage, and commenting.
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use rand::Rng;
use serde::Deserialize;

use crate::ai::{self, ConcernAnalysis};
use crate::auth::{require_active_user, require_lgu, AuthUser};
use crate::db::{Concern, Database, StatusChanged, User};
use crate::error::ApiError;
use crate::notify;
use crate::AppState;

/// Recognized concern categories.
pub const CATEGORIES: &[&str] = &[
    "FLOOD",
    "ROAD",
    "WASTE",
    "ELECTRICITY",
    "WATER",
    "SAFETY",
    "OTHER",
];

/// Recognized concern statuses.
pub const STATUSES: &[&str] = &["PENDING", "IN_PROGRESS", "RESOLVED", "CLOSED"];

/// Recognized priorities.
pub const PRIORITIES: &[&str] = &["LOW", "MEDIUM", "HIGH", "URGENT"];

/// Display alias for anonymous reporters.
fn generate_alias() -> String {
    format!("Citizen{:04}", rand::thread_rng().gen_range(0..10000))
}

// -----------------------------------------------------------------------------
// Request Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateConcernRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub barangay: String,
    pub municipality: String,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct FlagReporterRequest {
    pub reason: String,
}

// -----------------------------------------------------------------------------
// Services
// -----------------------------------------------------------------------------

/// Record the AI reasoning as a comment on a fresh concern. Authored
/// by the reporter, or by the oldest LGU account when the concern is
/// anonymous; dropped when neither exists. Best-effort: failures are
/// logged and swallowed.
pub async fn record_analysis_comment(
    db: &Database,
    concern: &Concern,
    analysis: &ConcernAnalysis,
    reporter: Option<&User>,
) {
    let author_id = match reporter {
        Some(user) => Some(user.id.clone()),
        None => match db.find_system_author().await {
            Ok(user) => user.map(|u| u.id),
            Err(e) => {
                tracing::warn!("Failed to look up system comment author: {}", e);
                None
            }
        },
    };
    let Some(author_id) = author_id else {
        return;
    };

    let message = format!(
        "[System AI] Suggested category: {}, priority: {}. {}",
        analysis.category, analysis.priority, analysis.reasoning
    );
    if let Err(e) = db
        .create_comment(
            &uuid::Uuid::new_v4().to_string(),
            &concern.id,
            &author_id,
            &message,
        )
        .await
    {
        tracing::warn!("Failed to record AI analysis comment: {}", e);
    }
}

/// Change a concern's status/priority and notify the reporter when the
/// status actually moved. Returns the explicit transition event.
pub async fn change_status(
    db: &Database,
    concern_id: &str,
    new_status: &str,
    new_priority: Option<&str>,
) -> Result<StatusChanged, ApiError> {
    if !STATUSES.contains(&new_status) {
        return Err(ApiError::BadRequest("Unknown status".into()));
    }
    if let Some(p) = new_priority {
        if !PRIORITIES.contains(&p) {
            return Err(ApiError::BadRequest("Unknown priority".into()));
        }
    }

    let change = db
        .update_concern_status(concern_id, new_status, new_priority)
        .await?
        .ok_or_else(|| ApiError::NotFound("Concern not found".into()))?;

    if change.old != change.new {
        if let Some(concern) = db.find_concern_by_id(concern_id).await? {
            notify::notify_status_change(db, &concern, &change.old, &change.new).await;
        }
    }
    Ok(change)
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

/// POST /api/concerns — authenticated or anonymous submission. The AI
/// advisory result is threaded through as an explicit Option; any AI
/// failure leaves it None and the submission proceeds untouched.
pub async fn create_concern(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Json(req): Json<CreateConcernRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.title.trim().is_empty() || req.description.trim().is_empty() {
        return Err(ApiError::BadRequest("Title and description required".into()));
    }
    if !CATEGORIES.contains(&req.category.as_str()) {
        return Err(ApiError::BadRequest("Unknown category".into()));
    }
    if let Some(p) = req.priority.as_deref() {
        if !PRIORITIES.contains(&p) {
            return Err(ApiError::BadRequest("Unknown priority".into()));
        }
    }

    let reporter = match &auth {
        Some(a) => Some(require_active_user(&state, &a.user_id).await?),
        None => None,
    };
    let alias = reporter.is_none().then(generate_alias);

    let analysis = ai::suggest_for_concern(&state.config, &req.title, &req.description).await;

    let mut category = req.category.clone();
    let mut priority = req
        .priority
        .clone()
        .unwrap_or_else(|| "MEDIUM".to_string());
    if let Some(analysis) = &analysis {
        if let Some(p) = analysis.valid_priority() {
            priority = p.to_string();
        }
        // only override a category the submitter did not pick
        if category == "OTHER" {
            if let Some(c) = analysis.valid_category() {
                category = c.to_string();
            }
        }
    }

    let concern = state
        .db
        .create_concern(
            &uuid::Uuid::new_v4().to_string(),
            req.title.trim(),
            req.description.trim(),
            &category,
            &req.location,
            &req.barangay,
            &req.municipality,
            &priority,
            reporter.as_ref().map(|u| u.id.as_str()),
            alias.as_deref(),
        )
        .await?;

    if let Some(analysis) = &analysis {
        record_analysis_comment(&state.db, &concern, analysis, reporter.as_ref()).await;
    }

    Ok(Json(serde_json::json!({ "concern": concern })))
}

/// GET /api/concerns
pub async fn list_concerns(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let concerns = state.db.list_concerns(50).await?;
    Ok(Json(serde_json::json!({ "concerns": concerns })))
}

/// GET /api/concerns/:id — detail with vote score and comments.
pub async fn get_concern(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let concern = state
        .db
        .find_concern_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Concern not found".into()))?;
    let score = state.db.concern_score(&id).await?;
    let comments = state.db.list_comments(&id).await?;

    Ok(Json(serde_json::json!({
        "concern": concern,
        "score": score,
        "comments": comments,
    })))
}

/// POST /api/concerns/:id/status (LGU only)
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_lgu(&state, &auth.user_id).await?;
    let change = change_status(&state.db, &id, &req.status, req.priority.as_deref()).await?;
    Ok(Json(serde_json::json!({
        "old_status": change.old,
        "new_status": change.new,
    })))
}

/// POST /api/concerns/:id/comments
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let author = require_active_user(&state, &auth.user_id).await?;
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Comment cannot be empty".into()));
    }
    let concern = state
        .db
        .find_concern_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Concern not found".into()))?;

    let comment = state
        .db
        .create_comment(
            &uuid::Uuid::new_v4().to_string(),
            &concern.id,
            &author.id,
            req.content.trim(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "comment": comment })))
}

/// POST /api/concerns/:id/archive (LGU only) — soft delete; the
/// concern drops out of the public listing but stays queryable by ID.
pub async fn archive_concern(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_lgu(&state, &auth.user_id).await?;
    state
        .db
        .find_concern_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Concern not found".into()))?;

    if !state.db.archive_concern(&id, &actor.id).await? {
        return Err(ApiError::InvalidState("Concern already archived".into()));
    }
    Ok(Json(serde_json::json!({ "status": "archived" })))
}

/// POST /api/concerns/:id/unarchive (LGU only)
pub async fn unarchive_concern(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_lgu(&state, &auth.user_id).await?;
    state
        .db
        .find_concern_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Concern not found".into()))?;

    if !state.db.unarchive_concern(&id).await? {
        return Err(ApiError::InvalidState("Concern is not archived".into()));
    }
    Ok(Json(serde_json::json!({ "status": "unarchived" })))
}

/// POST /api/concerns/:id/flag-reporter (LGU only)
pub async fn flag_reporter(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<FlagReporterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_lgu(&state, &auth.user_id).await?;
    let concern: Concern = state
        .db
        .find_concern_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Concern not found".into()))?;
    let Some(reporter_id) = concern.reporter_id.as_deref() else {
        return Err(ApiError::BadRequest(
            "Cannot flag an anonymous reporter".into(),
        ));
    };

    state
        .db
        .flag_for_legal_action(reporter_id, &req.reason)
        .await?;
    Ok(Json(serde_json::json!({ "status": "flagged" })))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_change_status_validates_labels() {
        let db = Database::open_in_memory().await.unwrap();
        let err = change_status(&db, "missing", "LOST", None).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = change_status(&db, "missing", "RESOLVED", Some("EXTREME"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = change_status(&db, "missing", "RESOLVED", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_transition_notifies_reporter() {
        let db = Database::open_in_memory().await.unwrap();
        let reporter = db
            .create_user("reporter", "reporter", None, None, None, None)
            .await
            .unwrap();
        let concern = db
            .create_concern(
                "c1",
                "Leaking water main",
                "Water pooling on the road",
                "WATER",
                "Main St",
                "Poblacion",
                "San Mateo",
                "MEDIUM",
                Some(&reporter.id),
                None,
            )
            .await
            .unwrap();

        let change = change_status(&db, &concern.id, "IN_PROGRESS", None)
            .await
            .unwrap();
        assert_eq!(change.old, "PENDING");
        assert_eq!(change.new, "IN_PROGRESS");

        let notifications = db.list_notifications(&reporter.id).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, "STATUS_CHANGE");

        // same status again: no transition, no extra notification
        change_status(&db, &concern.id, "IN_PROGRESS", None)
            .await
            .unwrap();
        let notifications = db.list_notifications(&reporter.id).await.unwrap();
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_archived_concerns_hidden_from_listing() {
        let db = Database::open_in_memory().await.unwrap();
        let staff = db
            .create_user("staff", "staff", None, None, None, None)
            .await
            .unwrap();
        db.set_role(&staff.id, "LGU").await.unwrap();
        let concern = db
            .create_concern(
                "c1",
                "Collapsed drainage",
                "Drainage caved in after the storm",
                "FLOOD",
                "Riverside",
                "Poblacion",
                "San Mateo",
                "HIGH",
                None,
                Some("Citizen0001"),
            )
            .await
            .unwrap();

        assert!(db.archive_concern(&concern.id, &staff.id).await.unwrap());
        assert!(db.list_concerns(50).await.unwrap().is_empty());

        // still reachable by id, with the archive metadata stamped
        let archived = db.find_concern_by_id(&concern.id).await.unwrap().unwrap();
        assert!(archived.is_archived);
        assert!(archived.archived_at.is_some());
        assert_eq!(archived.archived_by.as_deref(), Some(staff.id.as_str()));

        // archiving twice is a no-op signalled to the caller
        assert!(!db.archive_concern(&concern.id, &staff.id).await.unwrap());

        assert!(db.unarchive_concern(&concern.id).await.unwrap());
        let restored = db.find_concern_by_id(&concern.id).await.unwrap().unwrap();
        assert!(!restored.is_archived);
        assert!(restored.archived_at.is_none());
        assert!(restored.archived_by.is_none());
        assert_eq!(db.list_concerns(50).await.unwrap().len(), 1);

        assert!(!db.unarchive_concern(&concern.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_analysis_comment_falls_back_to_lgu_author() {
        let db = Database::open_in_memory().await.unwrap();
        let concern = db
            .create_concern(
                "c1",
                "Streetlight out",
                "Corner light has been dark for a week",
                "ELECTRICITY",
                "5th Ave",
                "Poblacion",
                "San Mateo",
                "LOW",
                None,
                Some("Citizen0002"),
            )
            .await
            .unwrap();
        let analysis = ConcernAnalysis {
            category: "ELECTRICITY".into(),
            priority: "MEDIUM".into(),
            reasoning: "Outage affects a single fixture".into(),
        };

        // no LGU account yet: the comment is dropped, not an error
        record_analysis_comment(&db, &concern, &analysis, None).await;
        assert!(db.list_comments(&concern.id).await.unwrap().is_empty());

        let staff = db
            .create_user("staff", "staff", None, None, None, None)
            .await
            .unwrap();
        db.set_role(&staff.id, "LGU").await.unwrap();

        record_analysis_comment(&db, &concern, &analysis, None).await;
        let comments = db.list_comments(&concern.id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author_id, staff.id);
        assert!(comments[0].content.starts_with("[System AI]"));
    }

    #[test]
    fn test_generate_alias_shape() {
        let alias = generate_alias();
        assert!(alias.starts_with("Citizen"));
        assert_eq!(alias.len(), "Citizen".len() + 4);
    }
}
