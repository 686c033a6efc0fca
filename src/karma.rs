// =============================================================================
// Barangay Backend - Karma Threshold Policy
// =============================================================================
// Maps a karma value to an account standing tier and enforces the ban
// threshold. The policy runs after every karma delta, regardless of
// whether the delta came from a vote or a moderation penalty.
// =============================================================================

use serde::Serialize;

use crate::db::Database;

/// Karma at or below this deactivates the account.
pub const BAN_THRESHOLD: i64 = -10;

/// Karma at or below this (but above the ban threshold) is advisory
/// only, surfaced in the admin at-risk listing.
pub const AT_RISK_THRESHOLD: i64 = -5;

/// Karma an unbanned account is reset to when it was at or below the
/// ban threshold, so it does not immediately re-trip the ban.
pub const UNBAN_RESET_KARMA: i64 = -5;

/// Account standing tier derived from karma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Standing {
    Normal,
    AtRisk,
    Banned,
}

/// Pure tier function. No side effects, no datastore.
pub fn tier_for(karma: i64) -> Standing {
    if karma <= BAN_THRESHOLD {
        Standing::Banned
    } else if karma <= AT_RISK_THRESHOLD {
        Standing::AtRisk
    } else {
        Standing::Normal
    }
}

/// Apply the threshold policy to a user's current karma. Deactivates
/// the account when the karma sits in the banned tier; never modifies
/// karma itself. Idempotent: repeated crossings while already banned
/// are no-ops. Auto-bans are audited with a system (None) actor.
pub async fn enforce_threshold(
    db: &Database,
    user_id: &str,
    karma: i64,
) -> Result<Standing, sqlx::Error> {
    let standing = tier_for(karma);
    if standing == Standing::Banned {
        let deactivated = db.set_account_active(user_id, false).await?;
        if deactivated {
            tracing::info!(user_id, karma, "account deactivated: karma below ban threshold");
            db.insert_audit(
                None,
                "BAN",
                user_id,
                &format!("automatic deactivation at karma {}", karma),
            )
            .await?;
        }
    }
    Ok(standing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(tier_for(0), Standing::Normal);
        assert_eq!(tier_for(100), Standing::Normal);
        assert_eq!(tier_for(-4), Standing::Normal);
        assert_eq!(tier_for(-5), Standing::AtRisk);
        assert_eq!(tier_for(-9), Standing::AtRisk);
        assert_eq!(tier_for(-10), Standing::Banned);
        assert_eq!(tier_for(-1000), Standing::Banned);
    }

    #[tokio::test]
    async fn test_enforce_threshold_deactivates_once() {
        let db = Database::open_in_memory().await.unwrap();
        let user = db
            .create_user("u1", "resident", None, None, None, None)
            .await
            .unwrap();

        // advisory tier: no mutation
        let standing = enforce_threshold(&db, &user.id, -9).await.unwrap();
        assert_eq!(standing, Standing::AtRisk);
        let user = db.find_user_by_id("u1").await.unwrap().unwrap();
        assert!(user.account_active);

        // crossing the ban threshold deactivates
        let standing = enforce_threshold(&db, &user.id, -10).await.unwrap();
        assert_eq!(standing, Standing::Banned);
        let user = db.find_user_by_id("u1").await.unwrap().unwrap();
        assert!(!user.account_active);

        // idempotent while already banned; one BAN audit entry
        enforce_threshold(&db, &user.id, -12).await.unwrap();
        let audits = db.list_audit(10).await.unwrap();
        assert_eq!(audits.iter().filter(|a| a.action == "BAN").count(), 1);
        assert!(audits.iter().all(|a| a.actor_id.is_none()));
    }
}
