// =============================================================================
// Barangay Backend - Vote Accounting
// =============================================================================
// One vote per (voter, concern). Casting the same value toggles the
// vote off; casting the other value flips it. Karma deltas land on the
// concern's reporter in the same transaction as the vote row, and the
// threshold policy runs after every outcome.
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::auth::{require_active_user, AuthUser};
use crate::db::{Concern, Database, User, VoteCast, VoteOutcome};
use crate::error::ApiError;
use crate::AppState;
use crate::{karma, notify};

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub value: i64,
}

/// Cast, change, or toggle off a vote on a concern.
pub async fn cast_vote(
    db: &Database,
    concern: &Concern,
    voter: &User,
    value: i64,
) -> Result<VoteCast, ApiError> {
    if concern.reporter_id.as_deref() == Some(voter.id.as_str()) {
        return Err(ApiError::Forbidden(
            "You cannot vote on your own report".into(),
        ));
    }
    if value != 1 && value != -1 {
        return Err(ApiError::BadRequest("Invalid vote value".into()));
    }

    let cast = db
        .cast_vote(&concern.id, &voter.id, value, concern.reporter_id.as_deref())
        .await?;

    if cast.outcome == VoteOutcome::Created {
        notify::notify_vote(db, concern, &voter.username, value).await;
    }

    if let (Some(reporter_id), Some(new_karma)) =
        (concern.reporter_id.as_deref(), cast.reporter_karma)
    {
        karma::enforce_threshold(db, reporter_id, new_karma).await?;
    }

    Ok(cast)
}

/// POST /api/concerns/:id/vote
pub async fn vote_on_concern(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(concern_id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let voter = require_active_user(&state, &auth.user_id).await?;
    let concern = state
        .db
        .find_concern_by_id(&concern_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Concern not found".into()))?;

    let cast = cast_vote(&state.db, &concern, &voter, req.value).await?;
    Ok(Json(serde_json::json!({
        "status": cast.outcome.as_str(),
        "score": cast.score,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (Database, User, User, Concern) {
        let db = Database::open_in_memory().await.unwrap();
        let reporter = db
            .create_user("reporter", "reporter", None, None, None, None)
            .await
            .unwrap();
        let voter = db
            .create_user("voter", "voter", None, None, None, None)
            .await
            .unwrap();
        let concern = db
            .create_concern(
                "c1",
                "Flooded street",
                "Knee-deep water after every rain",
                "FLOOD",
                "Riverside Rd",
                "Poblacion",
                "San Mateo",
                "HIGH",
                Some(&reporter.id),
                None,
            )
            .await
            .unwrap();
        (db, reporter, voter, concern)
    }

    #[tokio::test]
    async fn test_self_vote_rejected() {
        let (db, reporter, _, concern) = setup().await;
        let err = cast_vote(&db, &concern, &reporter, 1).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_invalid_value_rejected() {
        let (db, _, voter, concern) = setup().await;
        for bad in [0, 2, -3] {
            let err = cast_vote(&db, &concern, &voter, bad).await.unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)));
        }
    }

    #[tokio::test]
    async fn test_toggle_off_round_trips_karma() {
        let (db, reporter, voter, concern) = setup().await;

        cast_vote(&db, &concern, &voter, 1).await.unwrap();
        let u = db.find_user_by_id(&reporter.id).await.unwrap().unwrap();
        assert_eq!(u.karma, 1);

        let cast = cast_vote(&db, &concern, &voter, 1).await.unwrap();
        assert_eq!(cast.outcome, VoteOutcome::Removed);
        let u = db.find_user_by_id(&reporter.id).await.unwrap().unwrap();
        assert_eq!(u.karma, 0);
        assert_eq!(db.concern_score(&concern.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_downvote_across_ban_threshold_deactivates() {
        let (db, reporter, voter, concern) = setup().await;
        db.set_karma(&reporter.id, -9).await.unwrap();

        cast_vote(&db, &concern, &voter, -1).await.unwrap();

        let u = db.find_user_by_id(&reporter.id).await.unwrap().unwrap();
        assert_eq!(u.karma, -10);
        assert!(!u.account_active);
    }

    #[tokio::test]
    async fn test_vote_creation_notifies_reporter() {
        let (db, reporter, voter, concern) = setup().await;

        cast_vote(&db, &concern, &voter, 1).await.unwrap();
        let notifications = db.list_notifications(&reporter.id).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, "VOTE");

        // changing the vote does not re-notify
        cast_vote(&db, &concern, &voter, -1).await.unwrap();
        let notifications = db.list_notifications(&reporter.id).await.unwrap();
        assert_eq!(notifications.len(), 1);
    }
}
