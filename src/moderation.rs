// =============================================================================
// Barangay Backend - Moderation
// =============================================================================
// Comment report aggregation, the admin moderation queue, report
// resolution, and audited admin account actions.
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::auth::{require_active_user, require_lgu, AuthUser};
use crate::db::{Comment, CommentReport, Database, User};
use crate::error::ApiError;
use crate::karma;
use crate::AppState;

// -----------------------------------------------------------------------------
// Report filing
// -----------------------------------------------------------------------------

/// Outcome of filing a report. A duplicate is informational, not a
/// failure.
#[derive(Debug)]
pub enum ReportOutcome {
    Created(CommentReport),
    AlreadyReported,
}

/// File a report against a comment. At most one PENDING report per
/// (comment, reporter).
pub async fn file_report(
    db: &Database,
    comment: &Comment,
    reporter: &User,
    reason: &str,
) -> Result<ReportOutcome, ApiError> {
    if comment.author_id == reporter.id {
        return Err(ApiError::Forbidden(
            "You cannot report your own comment".into(),
        ));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ApiError::BadRequest(
            "Please provide a reason for your report".into(),
        ));
    }

    if db.has_pending_report(&comment.id, &reporter.id).await? {
        return Ok(ReportOutcome::AlreadyReported);
    }

    let report = db
        .create_report(
            &uuid::Uuid::new_v4().to_string(),
            &comment.id,
            &reporter.id,
            reason,
        )
        .await?;
    Ok(ReportOutcome::Created(report))
}

// -----------------------------------------------------------------------------
// Report resolution
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    Delete,
    Dismiss,
}

impl ResolveAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DELETE" => Some(ResolveAction::Delete),
            "DISMISS" => Some(ResolveAction::Dismiss),
            _ => None,
        }
    }
}

/// Apply an admin decision to a PENDING report. DELETE deducts karma
/// from the comment author, removes the comment (taking every report
/// on it along) and audits; DISMISS records the review only. Both are
/// terminal.
pub async fn resolve(
    db: &Database,
    report_id: &str,
    action: ResolveAction,
    karma_penalty: i64,
    admin_notes: Option<&str>,
    actor: &User,
) -> Result<(), ApiError> {
    if karma_penalty < 0 {
        return Err(ApiError::BadRequest("Karma penalty must be >= 0".into()));
    }

    let report = db
        .find_report_by_id(report_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Report not found".into()))?;
    if report.status != "PENDING" {
        return Err(ApiError::InvalidState(format!(
            "Report already {}",
            report.status.to_lowercase()
        )));
    }

    match action {
        ResolveAction::Delete => {
            let resolved = db
                .resolve_report_delete(report_id, karma_penalty, &actor.id, admin_notes)
                .await?;
            // Lost the race to another reviewer
            let Some((author_id, new_karma)) = resolved else {
                return Err(ApiError::InvalidState("Report already handled".into()));
            };
            karma::enforce_threshold(db, &author_id, new_karma).await?;
        }
        ResolveAction::Dismiss => {
            let dismissed = db
                .resolve_report_dismiss(report_id, &actor.id, admin_notes)
                .await?;
            if !dismissed {
                return Err(ApiError::InvalidState("Report already handled".into()));
            }
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Admin account actions
// -----------------------------------------------------------------------------

/// Explicit admin ban.
pub async fn ban_user(db: &Database, user_id: &str, actor: &User) -> Result<(), ApiError> {
    let user = db
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    db.set_account_active(&user.id, false).await?;
    db.insert_audit(Some(&actor.id), "BAN", &user.id, "manual deactivation")
        .await?;
    Ok(())
}

/// Explicit admin unban. Reactivates the account; when karma sits at
/// or below the ban threshold it is reset to -5 so the account does
/// not immediately re-trip the ban. Karma above the threshold is left
/// untouched (e.g. a manually deactivated account).
pub async fn unban_user(db: &Database, user_id: &str, actor: &User) -> Result<User, ApiError> {
    let user = db
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    db.set_account_active(&user.id, true).await?;
    if user.karma <= karma::BAN_THRESHOLD {
        db.set_karma(&user.id, karma::UNBAN_RESET_KARMA).await?;
    }
    db.insert_audit(
        Some(&actor.id),
        "UNBAN",
        &user.id,
        &format!("reactivated at karma {}", user.karma),
    )
    .await?;

    db.find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

/// Change a user's role between USER and LGU, audited as
/// PROMOTE/DEMOTE.
pub async fn set_user_role(
    db: &Database,
    user_id: &str,
    role: &str,
    actor: &User,
) -> Result<(), ApiError> {
    if role != "USER" && role != "LGU" {
        return Err(ApiError::BadRequest("Unknown role".into()));
    }
    let user = db
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    db.set_role(&user.id, role).await?;
    let action = if role == "LGU" { "PROMOTE" } else { "DEMOTE" };
    db.insert_audit(
        Some(&actor.id),
        action,
        &user.id,
        &format!("role {} -> {}", user.role, role),
    )
    .await?;
    Ok(())
}

/// Reset a user's karma to zero, audited.
pub async fn reset_karma(db: &Database, user_id: &str, actor: &User) -> Result<(), ApiError> {
    let user = db
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    db.set_karma(&user.id, 0).await?;
    db.insert_audit(
        Some(&actor.id),
        "KARMA_RESET",
        &user.id,
        &format!("karma {} -> 0", user.karma),
    )
    .await?;
    Ok(())
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub reason: String,
}

/// POST /api/comments/:id/report
pub async fn report_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(comment_id): Path<String>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let reporter = require_active_user(&state, &auth.user_id).await?;
    let comment = state
        .db
        .find_comment_by_id(&comment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".into()))?;

    let status = match file_report(&state.db, &comment, &reporter, &req.reason).await? {
        ReportOutcome::Created(_) => "reported",
        ReportOutcome::AlreadyReported => "already_reported",
    };
    let pending = state.db.pending_report_count(&comment.id).await?;
    Ok(Json(serde_json::json!({
        "status": status,
        "pending_reports": pending,
        "queue_worthy": pending >= state.config.report_queue_threshold,
    })))
}

/// GET /api/admin/comments/:id/reports — full report history for a
/// comment under review.
pub async fn get_comment_reports(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(comment_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_lgu(&state, &auth.user_id).await?;
    let reports = state.db.list_reports_for_comment(&comment_id).await?;
    Ok(Json(serde_json::json!({ "reports": reports })))
}

/// GET /api/admin/moderation/queue
pub async fn get_moderation_queue(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_lgu(&state, &auth.user_id).await?;
    let entries = state
        .db
        .moderation_queue(state.config.report_queue_threshold)
        .await?;
    Ok(Json(serde_json::json!({ "queue": entries })))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub action: String,
    pub karma_penalty: Option<i64>,
    pub admin_notes: Option<String>,
}

/// POST /api/admin/reports/:id/resolve
pub async fn resolve_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(report_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_lgu(&state, &auth.user_id).await?;
    let action = ResolveAction::parse(&req.action)
        .ok_or_else(|| ApiError::BadRequest("Action must be DELETE or DISMISS".into()))?;
    let penalty = req
        .karma_penalty
        .unwrap_or(state.config.default_karma_penalty);

    resolve(
        &state.db,
        &report_id,
        action,
        penalty,
        req.admin_notes.as_deref(),
        &actor,
    )
    .await?;
    Ok(Json(serde_json::json!({ "status": "resolved" })))
}

/// POST /api/admin/users/:id/ban
pub async fn ban_user_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_lgu(&state, &auth.user_id).await?;
    ban_user(&state.db, &user_id, &actor).await?;
    Ok(Json(serde_json::json!({ "status": "banned" })))
}

/// POST /api/admin/users/:id/unban
pub async fn unban_user_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_lgu(&state, &auth.user_id).await?;
    let user = unban_user(&state.db, &user_id, &actor).await?;
    Ok(Json(serde_json::json!({
        "status": "unbanned",
        "karma": user.karma,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

/// POST /api/admin/users/:id/role
pub async fn set_role_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_lgu(&state, &auth.user_id).await?;
    set_user_role(&state.db, &user_id, &req.role, &actor).await?;
    Ok(Json(serde_json::json!({ "status": "updated" })))
}

/// POST /api/admin/users/:id/karma-reset
pub async fn reset_karma_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_lgu(&state, &auth.user_id).await?;
    reset_karma(&state.db, &user_id, &actor).await?;
    Ok(Json(serde_json::json!({ "status": "reset" })))
}

/// GET /api/admin/users/at-risk
pub async fn get_at_risk_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_lgu(&state, &auth.user_id).await?;
    let users: Vec<crate::db::UserResponse> = state
        .db
        .list_at_risk_users()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(serde_json::json!({ "users": users })))
}

/// GET /api/admin/audit
pub async fn get_audit_log(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_lgu(&state, &auth.user_id).await?;
    let entries = state.db.list_audit(100).await?;
    Ok(Json(serde_json::json!({ "audit": entries })))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: Database,
        admin: User,
        author: User,
        comment: Comment,
    }

    async fn setup() -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("admin", "admin", None, None, None, None)
            .await
            .unwrap();
        db.set_role("admin", "LGU").await.unwrap();
        let admin = db.find_user_by_id("admin").await.unwrap().unwrap();

        let author = db
            .create_user("author", "author", None, None, None, None)
            .await
            .unwrap();
        let reporter = db
            .create_user("concern_owner", "concern_owner", None, None, None, None)
            .await
            .unwrap();
        let concern = db
            .create_concern(
                "c1",
                "Uncollected garbage",
                "Garbage has piled up for two weeks",
                "WASTE",
                "Purok 3",
                "Poblacion",
                "San Mateo",
                "MEDIUM",
                Some(&reporter.id),
                None,
            )
            .await
            .unwrap();
        let comment = db
            .create_comment("cm1", &concern.id, &author.id, "offensive remark")
            .await
            .unwrap();

        Fixture {
            db,
            admin,
            author,
            comment,
        }
    }

    async fn add_reporter(db: &Database, name: &str) -> User {
        db.create_user(name, name, None, None, None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_self_report_rejected() {
        let f = setup().await;
        let err = file_report(&f.db, &f.comment, &f.author, "spam")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_duplicate_pending_report_is_informational() {
        let f = setup().await;
        let r1 = add_reporter(&f.db, "r1").await;

        let outcome = file_report(&f.db, &f.comment, &r1, "spam").await.unwrap();
        assert!(matches!(outcome, ReportOutcome::Created(_)));

        let outcome = file_report(&f.db, &f.comment, &r1, "spam again")
            .await
            .unwrap();
        assert!(matches!(outcome, ReportOutcome::AlreadyReported));
        assert_eq!(f.db.pending_report_count(&f.comment.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_requires_threshold_and_dedupes() {
        let f = setup().await;
        for name in ["r1", "r2"] {
            let r = add_reporter(&f.db, name).await;
            file_report(&f.db, &f.comment, &r, "abusive").await.unwrap();
        }

        // two pending reports: below threshold, not queue-worthy
        assert!(f.db.moderation_queue(3).await.unwrap().is_empty());

        let r3 = add_reporter(&f.db, "r3").await;
        file_report(&f.db, &f.comment, &r3, "abusive").await.unwrap();

        // third report: exactly one entry for the comment
        let queue = f.db.moderation_queue(3).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].comment_id, f.comment.id);
        assert_eq!(queue[0].pending_count, 3);
        assert_eq!(queue[0].latest_reason, "abusive");
    }

    #[tokio::test]
    async fn test_resolve_delete_deducts_and_cascades() {
        let f = setup().await;
        let mut report_id = String::new();
        for name in ["r1", "r2", "r3"] {
            let r = add_reporter(&f.db, name).await;
            if let ReportOutcome::Created(rep) =
                file_report(&f.db, &f.comment, &r, "abusive").await.unwrap()
            {
                report_id = rep.id;
            }
        }

        resolve(
            &f.db,
            &report_id,
            ResolveAction::Delete,
            5,
            Some("removed for abuse"),
            &f.admin,
        )
        .await
        .unwrap();

        let author = f.db.find_user_by_id(&f.author.id).await.unwrap().unwrap();
        assert_eq!(author.karma, -5);

        // comment and every report on it are gone
        assert!(f
            .db
            .find_comment_by_id(&f.comment.id)
            .await
            .unwrap()
            .is_none());
        assert!(f
            .db
            .list_reports_for_comment(&f.comment.id)
            .await
            .unwrap()
            .is_empty());

        // audited with the admin as actor
        let audits = f.db.list_audit(10).await.unwrap();
        let entry = audits
            .iter()
            .find(|a| a.action == "COMMENT_DELETED")
            .unwrap();
        assert_eq!(entry.actor_id.as_deref(), Some(f.admin.id.as_str()));
        assert_eq!(entry.target, f.author.id);
    }

    #[tokio::test]
    async fn test_resolve_dismiss_never_touches_karma() {
        let f = setup().await;
        let r1 = add_reporter(&f.db, "r1").await;
        let ReportOutcome::Created(report) =
            file_report(&f.db, &f.comment, &r1, "spam").await.unwrap()
        else {
            panic!("expected created report");
        };

        resolve(
            &f.db,
            &report.id,
            ResolveAction::Dismiss,
            5,
            Some("not actionable"),
            &f.admin,
        )
        .await
        .unwrap();

        let author = f.db.find_user_by_id(&f.author.id).await.unwrap().unwrap();
        assert_eq!(author.karma, 0);

        let report = f.db.find_report_by_id(&report.id).await.unwrap().unwrap();
        assert_eq!(report.status, "DISMISSED");
        assert_eq!(report.reviewed_by.as_deref(), Some(f.admin.id.as_str()));

        // terminal: a second resolution attempt is rejected
        let err = resolve(
            &f.db,
            &report.id,
            ResolveAction::Delete,
            1,
            None,
            &f.admin,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_report_penalty_can_trigger_auto_ban() {
        let f = setup().await;
        f.db.set_karma(&f.author.id, -6).await.unwrap();
        let r1 = add_reporter(&f.db, "r1").await;
        let ReportOutcome::Created(report) =
            file_report(&f.db, &f.comment, &r1, "threats").await.unwrap()
        else {
            panic!("expected created report");
        };

        resolve(&f.db, &report.id, ResolveAction::Delete, 5, None, &f.admin)
            .await
            .unwrap();

        let author = f.db.find_user_by_id(&f.author.id).await.unwrap().unwrap();
        assert_eq!(author.karma, -11);
        assert!(!author.account_active);
    }

    #[tokio::test]
    async fn test_unban_resets_karma_only_below_threshold() {
        let f = setup().await;

        // banned at -12: unban reactivates and resets to -5
        f.db.set_karma(&f.author.id, -12).await.unwrap();
        f.db.set_account_active(&f.author.id, false).await.unwrap();
        let user = unban_user(&f.db, &f.author.id, &f.admin).await.unwrap();
        assert!(user.account_active);
        assert_eq!(user.karma, -5);

        // manually deactivated at -3: unban leaves karma alone
        f.db.set_karma(&f.author.id, -3).await.unwrap();
        f.db.set_account_active(&f.author.id, false).await.unwrap();
        let user = unban_user(&f.db, &f.author.id, &f.admin).await.unwrap();
        assert!(user.account_active);
        assert_eq!(user.karma, -3);

        let audits = f.db.list_audit(10).await.unwrap();
        assert_eq!(audits.iter().filter(|a| a.action == "UNBAN").count(), 2);
    }

    #[tokio::test]
    async fn test_role_change_is_audited() {
        let f = setup().await;
        set_user_role(&f.db, &f.author.id, "LGU", &f.admin)
            .await
            .unwrap();
        let user = f.db.find_user_by_id(&f.author.id).await.unwrap().unwrap();
        assert!(user.is_lgu());

        set_user_role(&f.db, &f.author.id, "USER", &f.admin)
            .await
            .unwrap();

        let audits = f.db.list_audit(10).await.unwrap();
        assert!(audits.iter().any(|a| a.action == "PROMOTE"));
        assert!(audits.iter().any(|a| a.action == "DEMOTE"));

        let err = set_user_role(&f.db, &f.author.id, "MAYOR", &f.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
