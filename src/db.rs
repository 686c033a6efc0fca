// =============================================================================
// Barangay Backend - Database Layer
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

// =============================================================================
// Models
// =============================================================================

/// User model.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: String,
    pub karma: i64,
    pub account_active: bool,
    pub flagged_for_legal_action: bool,
    pub legal_action_reason: Option<String>,
    pub barangay: Option<String>,
    pub municipality: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_lgu(&self) -> bool {
        self.role == "LGU"
    }
}

/// Concern model.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Concern {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub barangay: String,
    pub municipality: String,
    pub status: String,
    pub priority: String,
    /// None for anonymous submissions; karma effects are skipped.
    pub reporter_id: Option<String>,
    pub alias: Option<String>,
    pub is_locked: bool,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Comment model.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: String,
    pub concern_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Vote model. Absence of a row means "no vote"; value is +1 or -1,
/// never 0.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: String,
    pub concern_id: String,
    pub voter_id: String,
    pub value: i64,
    pub created_at: DateTime<Utc>,
}

/// Comment report model. A reporter holds at most one PENDING report
/// per comment; RESOLVED and DISMISSED are terminal.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommentReport {
    pub id: String,
    pub comment_id: String,
    pub reporter_id: String,
    pub reason: String,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
    pub karma_deducted: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Audit log entry. Append-only; `actor_id` is None for automatic
/// (system-triggered) actions.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub target: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// In-app notification row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub message: String,
    pub concern_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// User response (without sensitive fields).
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub karma: i64,
    pub account_active: bool,
    pub barangay: Option<String>,
    pub municipality: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            karma: user.karma,
            account_active: user.account_active,
            barangay: user.barangay,
            municipality: user.municipality,
            created_at: user.created_at,
        }
    }
}

// =============================================================================
// Vote accounting result types
// =============================================================================

/// What happened to the voter's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Created,
    Changed,
    Removed,
}

impl VoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOutcome::Created => "voted",
            VoteOutcome::Changed => "changed",
            VoteOutcome::Removed => "removed",
        }
    }
}

/// Result of a committed vote transaction.
#[derive(Debug, Clone)]
pub struct VoteCast {
    pub outcome: VoteOutcome,
    /// Aggregate vote score for the concern after the transaction.
    pub score: i64,
    /// Reporter's karma after the delta; None when the concern is
    /// anonymous and no delta was applied.
    pub reporter_karma: Option<i64>,
}

/// Explicit status-transition event, returned from the same transaction
/// that performed the mutation.
#[derive(Debug, Clone)]
pub struct StatusChanged {
    pub old: String,
    pub new: String,
}

/// One moderation-queue entry per comment at or above the report
/// threshold, carrying its most recent pending report.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ModerationQueueEntry {
    pub comment_id: String,
    pub concern_id: String,
    pub content: String,
    pub author_id: String,
    pub pending_count: i64,
    pub latest_report_id: String,
    pub latest_reason: String,
    pub latest_reported_at: DateTime<Utc>,
}

// =============================================================================
// Database
// =============================================================================

/// The one statement allowed to touch karma: a datastore-side atomic
/// increment, usable standalone or inside a transaction.
const KARMA_DELTA_SQL: &str =
    "UPDATE users SET karma = karma + ?1, updated_at = ?2 WHERE id = ?3 RETURNING karma";

impl Database {
    /// Create a new database connection pool.
    pub async fn new(url: &str) -> Result<Self, sqlx::Error> {
        // Add create_if_missing option for SQLite
        let url_with_options = if url.starts_with("sqlite:") && !url.contains("?") {
            format!("{}?mode=rwc", url)
        } else if url.starts_with("sqlite:") && !url.contains("mode=") {
            format!("{}&mode=rwc", url)
        } else {
            url.to_string()
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url_with_options)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests. Capped at one connection so every
    /// query sees the same memory-backed store.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        // Users table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                password_hash TEXT,
                role TEXT NOT NULL DEFAULT 'USER',
                karma INTEGER NOT NULL DEFAULT 0,
                account_active INTEGER NOT NULL DEFAULT 1,
                flagged_for_legal_action INTEGER NOT NULL DEFAULT 0,
                legal_action_reason TEXT,
                barangay TEXT,
                municipality TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Concerns table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS concerns (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                location TEXT NOT NULL,
                barangay TEXT NOT NULL,
                municipality TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                priority TEXT NOT NULL DEFAULT 'MEDIUM',
                reporter_id TEXT REFERENCES users(id),
                alias TEXT,
                is_locked INTEGER NOT NULL DEFAULT 0,
                is_archived INTEGER NOT NULL DEFAULT 0,
                archived_at TEXT,
                archived_by TEXT REFERENCES users(id),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                resolved_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Comments table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                concern_id TEXT NOT NULL REFERENCES concerns(id) ON DELETE CASCADE,
                author_id TEXT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Votes table: at most one vote per (concern, voter)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                concern_id TEXT NOT NULL REFERENCES concerns(id) ON DELETE CASCADE,
                voter_id TEXT NOT NULL REFERENCES users(id),
                value INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(concern_id, voter_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Comment reports table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comment_reports (
                id TEXT PRIMARY KEY,
                comment_id TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
                reporter_id TEXT NOT NULL REFERENCES users(id),
                reason TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                reviewed_by TEXT,
                reviewed_at TEXT,
                admin_notes TEXT,
                karma_deducted INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Audit log table (append-only)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                actor_id TEXT,
                action TEXT NOT NULL,
                target TEXT NOT NULL,
                details TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Notifications table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                concern_id TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes for performance
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_concerns_reporter ON concerns(reporter_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_concern ON comments(concern_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_concern ON votes(concern_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_comment_status ON comment_reports(comment_id, status)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id)")
            .execute(&self.pool)
            .await;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    // =========================================================================
    // User Methods
    // =========================================================================

    /// Find user by ID.
    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Find user by username.
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
    }

    /// Create a new user.
    pub async fn create_user(
        &self,
        id: &str,
        username: &str,
        email: Option<&str>,
        password_hash: Option<&str>,
        barangay: Option<&str>,
        municipality: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, karma, account_active, flagged_for_legal_action, barangay, municipality, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'USER', 0, 1, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(barangay)
        .bind(municipality)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_user_by_id(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Apply a karma delta as a single SQL-side increment and return the
    /// new value. Never read-then-write from application memory.
    pub async fn apply_karma_delta(&self, user_id: &str, delta: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(KARMA_DELTA_SQL)
            .bind(delta)
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
    }

    /// Set account_active. Returns true if the row changed.
    pub async fn set_account_active(&self, user_id: &str, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET account_active = ?1, updated_at = ?2 WHERE id = ?3 AND account_active != ?1",
        )
        .bind(active)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set karma to an absolute value (admin reset / unban clamp).
    pub async fn set_karma(&self, user_id: &str, karma: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET karma = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(karma)
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set a user's role.
    pub async fn set_role(&self, user_id: &str, role: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(role)
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flag a user for legal action.
    pub async fn flag_for_legal_action(&self, user_id: &str, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET flagged_for_legal_action = 1, legal_action_reason = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Oldest LGU account, used to attribute system-generated comments
    /// on anonymous concerns.
    pub async fn find_system_author(&self) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE role = 'LGU' ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
    }

    /// Users in the advisory at-risk karma band.
    pub async fn list_at_risk_users(&self) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE karma <= ?1 AND karma > ?2 ORDER BY karma ASC",
        )
        .bind(crate::karma::AT_RISK_THRESHOLD)
        .bind(crate::karma::BAN_THRESHOLD)
        .fetch_all(&self.pool)
        .await
    }

    // =========================================================================
    // Concern Methods
    // =========================================================================

    /// Create a concern. `reporter_id` is None for anonymous reports.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_concern(
        &self,
        id: &str,
        title: &str,
        description: &str,
        category: &str,
        location: &str,
        barangay: &str,
        municipality: &str,
        priority: &str,
        reporter_id: Option<&str>,
        alias: Option<&str>,
    ) -> Result<Concern, sqlx::Error> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO concerns (id, title, description, category, location, barangay, municipality, status, priority, reporter_id, alias, is_locked, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(category)
        .bind(location)
        .bind(barangay)
        .bind(municipality)
        .bind(priority)
        .bind(reporter_id)
        .bind(alias)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_concern_by_id(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find concern by ID.
    pub async fn find_concern_by_id(&self, id: &str) -> Result<Option<Concern>, sqlx::Error> {
        sqlx::query_as::<_, Concern>("SELECT * FROM concerns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Recent non-archived concerns, newest first.
    pub async fn list_concerns(&self, limit: i64) -> Result<Vec<Concern>, sqlx::Error> {
        sqlx::query_as::<_, Concern>(
            "SELECT * FROM concerns WHERE is_archived = 0 ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Archive a concern (soft delete), recording who archived it.
    /// Returns false when the concern was already archived.
    pub async fn archive_concern(&self, id: &str, archived_by: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE concerns SET is_archived = 1, archived_at = ?1, archived_by = ?2, updated_at = ?1 WHERE id = ?3 AND is_archived = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(archived_by)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Restore an archived concern. Returns false when it was not
    /// archived.
    pub async fn unarchive_concern(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE concerns SET is_archived = 0, archived_at = NULL, archived_by = NULL, updated_at = ?1 WHERE id = ?2 AND is_archived = 1",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Update a concern's status (and optionally priority) in one
    /// transaction, reading the old status under the same transaction
    /// and returning an explicit StatusChanged event (callers compare
    /// old and new to decide whether to notify). None when the concern
    /// does not exist.
    ///
    /// Leaving PENDING locks the concern; the first transition into
    /// RESOLVED or CLOSED stamps resolved_at.
    pub async fn update_concern_status(
        &self,
        id: &str,
        new_status: &str,
        new_priority: Option<&str>,
    ) -> Result<Option<StatusChanged>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let concern = sqlx::query_as::<_, Concern>("SELECT * FROM concerns WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(concern) = concern else {
            return Ok(None);
        };

        let old_status = concern.status.clone();
        let lock = old_status == "PENDING" && new_status != "PENDING";
        let resolved_at = if (new_status == "RESOLVED" || new_status == "CLOSED")
            && concern.resolved_at.is_none()
        {
            Some(Utc::now().to_rfc3339())
        } else {
            concern.resolved_at.map(|t| t.to_rfc3339())
        };

        sqlx::query(
            r#"
            UPDATE concerns
            SET status = ?1,
                priority = COALESCE(?2, priority),
                is_locked = (is_locked OR ?3),
                resolved_at = ?4,
                updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(new_status)
        .bind(new_priority)
        .bind(lock)
        .bind(resolved_at)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(StatusChanged {
            old: old_status,
            new: new_status.to_string(),
        }))
    }

    /// Aggregate vote score for a concern (0 when no votes).
    pub async fn concern_score(&self, concern_id: &str) -> Result<i64, sqlx::Error> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT SUM(value) FROM votes WHERE concern_id = ?")
                .bind(concern_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(0))
    }

    // =========================================================================
    // Vote Accounting
    // =========================================================================

    /// Apply one voter's vote to a concern inside a single transaction:
    /// the vote row mutation and the reporter's karma delta commit or
    /// roll back together.
    ///
    /// - no existing row: insert, delta = value
    /// - same value: delete (toggle-off), delta = -value
    /// - different value: update, delta = new - old
    ///
    /// `reporter_id` is the concern's reporter; None skips the karma
    /// delta (anonymous concern). Domain validation (self-vote, value
    /// range) is the caller's job.
    pub async fn cast_vote(
        &self,
        concern_id: &str,
        voter_id: &str,
        value: i64,
        reporter_id: Option<&str>,
    ) -> Result<VoteCast, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Vote>(
            "SELECT * FROM votes WHERE concern_id = ? AND voter_id = ?",
        )
        .bind(concern_id)
        .bind(voter_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (outcome, delta) = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO votes (id, concern_id, voter_id, value, created_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(concern_id)
                .bind(voter_id)
                .bind(value)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
                (VoteOutcome::Created, value)
            }
            Some(vote) if vote.value == value => {
                sqlx::query("DELETE FROM votes WHERE id = ?")
                    .bind(&vote.id)
                    .execute(&mut *tx)
                    .await?;
                (VoteOutcome::Removed, -value)
            }
            Some(vote) => {
                sqlx::query("UPDATE votes SET value = ? WHERE id = ?")
                    .bind(value)
                    .bind(&vote.id)
                    .execute(&mut *tx)
                    .await?;
                (VoteOutcome::Changed, value - vote.value)
            }
        };

        let reporter_karma = match reporter_id {
            Some(rid) => Some(
                sqlx::query_scalar::<_, i64>(KARMA_DELTA_SQL)
                    .bind(delta)
                    .bind(Utc::now().to_rfc3339())
                    .bind(rid)
                    .fetch_one(&mut *tx)
                    .await?,
            ),
            None => None,
        };

        let score: Option<i64> =
            sqlx::query_scalar("SELECT SUM(value) FROM votes WHERE concern_id = ?")
                .bind(concern_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(VoteCast {
            outcome,
            score: score.unwrap_or(0),
            reporter_karma,
        })
    }

    // =========================================================================
    // Comment Methods
    // =========================================================================

    /// Create a comment on a concern.
    pub async fn create_comment(
        &self,
        id: &str,
        concern_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<Comment, sqlx::Error> {
        sqlx::query(
            "INSERT INTO comments (id, concern_id, author_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(concern_id)
        .bind(author_id)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_comment_by_id(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find comment by ID.
    pub async fn find_comment_by_id(&self, id: &str) -> Result<Option<Comment>, sqlx::Error> {
        sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Comments on a concern, oldest first.
    pub async fn list_comments(&self, concern_id: &str) -> Result<Vec<Comment>, sqlx::Error> {
        sqlx::query_as::<_, Comment>(
            "SELECT * FROM comments WHERE concern_id = ? ORDER BY created_at ASC",
        )
        .bind(concern_id)
        .fetch_all(&self.pool)
        .await
    }

    // =========================================================================
    // Comment Report Methods
    // =========================================================================

    /// Does this reporter already hold a PENDING report on the comment?
    pub async fn has_pending_report(
        &self,
        comment_id: &str,
        reporter_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comment_reports WHERE comment_id = ? AND reporter_id = ? AND status = 'PENDING'",
        )
        .bind(comment_id)
        .bind(reporter_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Create a PENDING report.
    pub async fn create_report(
        &self,
        id: &str,
        comment_id: &str,
        reporter_id: &str,
        reason: &str,
    ) -> Result<CommentReport, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO comment_reports (id, comment_id, reporter_id, reason, status, created_at)
            VALUES (?, ?, ?, ?, 'PENDING', ?)
            "#,
        )
        .bind(id)
        .bind(comment_id)
        .bind(reporter_id)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_report_by_id(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find report by ID.
    pub async fn find_report_by_id(&self, id: &str) -> Result<Option<CommentReport>, sqlx::Error> {
        sqlx::query_as::<_, CommentReport>("SELECT * FROM comment_reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Pending report count for a comment.
    pub async fn pending_report_count(&self, comment_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM comment_reports WHERE comment_id = ? AND status = 'PENDING'",
        )
        .bind(comment_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Reports referencing a comment (any status).
    pub async fn list_reports_for_comment(
        &self,
        comment_id: &str,
    ) -> Result<Vec<CommentReport>, sqlx::Error> {
        sqlx::query_as::<_, CommentReport>("SELECT * FROM comment_reports WHERE comment_id = ?")
            .bind(comment_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Moderation queue: one entry per comment whose distinct pending
    /// report count has reached the threshold, carrying the latest
    /// pending report. Grouped query, portable across datastores.
    pub async fn moderation_queue(
        &self,
        threshold: i64,
    ) -> Result<Vec<ModerationQueueEntry>, sqlx::Error> {
        sqlx::query_as::<_, ModerationQueueEntry>(
            r#"
            SELECT
                c.id AS comment_id,
                c.concern_id AS concern_id,
                c.content AS content,
                c.author_id AS author_id,
                COUNT(r.id) AS pending_count,
                (SELECT r2.id FROM comment_reports r2
                 WHERE r2.comment_id = c.id AND r2.status = 'PENDING'
                 ORDER BY r2.created_at DESC, r2.id DESC LIMIT 1) AS latest_report_id,
                (SELECT r2.reason FROM comment_reports r2
                 WHERE r2.comment_id = c.id AND r2.status = 'PENDING'
                 ORDER BY r2.created_at DESC, r2.id DESC LIMIT 1) AS latest_reason,
                MAX(r.created_at) AS latest_reported_at
            FROM comment_reports r
            JOIN comments c ON c.id = r.comment_id
            WHERE r.status = 'PENDING'
            GROUP BY c.id
            HAVING COUNT(r.id) >= ?1
            ORDER BY latest_reported_at DESC
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
    }

    /// Resolve a PENDING report with a DELETE action, atomically:
    /// mark it RESOLVED, deduct karma from the comment author, delete
    /// the comment together with every report referencing it, and
    /// append the audit entry. Returns the author's new karma, or None
    /// when the report was not PENDING (lost race / terminal state).
    pub async fn resolve_report_delete(
        &self,
        report_id: &str,
        penalty: i64,
        reviewer_id: &str,
        admin_notes: Option<&str>,
    ) -> Result<Option<(String, i64)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let report = sqlx::query_as::<_, CommentReport>(
            "SELECT * FROM comment_reports WHERE id = ? AND status = 'PENDING'",
        )
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(report) = report else {
            return Ok(None);
        };

        let comment = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
            .bind(&report.comment_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE comment_reports
            SET status = 'RESOLVED', reviewed_by = ?1, reviewed_at = ?2, admin_notes = ?3, karma_deducted = ?4
            WHERE id = ?5
            "#,
        )
        .bind(reviewer_id)
        .bind(&now)
        .bind(admin_notes)
        .bind(penalty)
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

        let new_karma = sqlx::query_scalar::<_, i64>(KARMA_DELTA_SQL)
            .bind(-penalty)
            .bind(&now)
            .bind(&comment.author_id)
            .fetch_one(&mut *tx)
            .await?;

        // Deleting the comment takes every report referencing it along,
        // including the one just resolved. Explicit delete first so the
        // behavior does not depend on SQLite's foreign_keys pragma.
        sqlx::query("DELETE FROM comment_reports WHERE comment_id = ?")
            .bind(&comment.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(&comment.id)
            .execute(&mut *tx)
            .await?;

        let snippet: String = comment.content.chars().take(80).collect();
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, actor_id, action, target, details, created_at)
            VALUES (?, ?, 'COMMENT_DELETED', ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(reviewer_id)
        .bind(&comment.author_id)
        .bind(format!("penalty={} snippet={:?}", penalty, snippet))
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((comment.author_id, new_karma)))
    }

    /// Dismiss a PENDING report. No karma effect, no audit entry.
    /// Returns false when the report was not PENDING.
    pub async fn resolve_report_dismiss(
        &self,
        report_id: &str,
        reviewer_id: &str,
        admin_notes: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE comment_reports
            SET status = 'DISMISSED', reviewed_by = ?1, reviewed_at = ?2, admin_notes = ?3
            WHERE id = ?4 AND status = 'PENDING'
            "#,
        )
        .bind(reviewer_id)
        .bind(Utc::now().to_rfc3339())
        .bind(admin_notes)
        .bind(report_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Audit Log
    // =========================================================================

    /// Append an audit entry. `actor_id` None marks a system action.
    pub async fn insert_audit(
        &self,
        actor_id: Option<&str>,
        action: &str,
        target: &str,
        details: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO audit_log (id, actor_id, action, target, details, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(actor_id)
        .bind(action)
        .bind(target)
        .bind(details)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recent audit entries, newest first.
    pub async fn list_audit(&self, limit: i64) -> Result<Vec<AuditLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, AuditLogEntry>(
            "SELECT * FROM audit_log ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Insert a notification row.
    pub async fn insert_notification(
        &self,
        user_id: &str,
        kind: &str,
        message: &str,
        concern_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, message, concern_id, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(kind)
        .bind(message)
        .bind(concern_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A user's notifications, newest first.
    pub async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_user(db: &Database, name: &str) -> User {
        db.create_user(
            &uuid::Uuid::new_v4().to_string(),
            name,
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap()
    }

    async fn seed_concern(db: &Database, reporter: Option<&User>) -> Concern {
        db.create_concern(
            &uuid::Uuid::new_v4().to_string(),
            "Broken streetlight",
            "The light at the corner has been out for a week",
            "ELECTRICITY",
            "Corner of Mabini St",
            "Poblacion",
            "San Mateo",
            "MEDIUM",
            reporter.map(|u| u.id.as_str()),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_karma_delta_is_cumulative() {
        let db = Database::open_in_memory().await.unwrap();
        let user = seed_user(&db, "resident").await;

        assert_eq!(db.apply_karma_delta(&user.id, 3).await.unwrap(), 3);
        assert_eq!(db.apply_karma_delta(&user.id, -5).await.unwrap(), -2);
        assert_eq!(db.apply_karma_delta(&user.id, 2).await.unwrap(), 0);

        let user = db.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(user.karma, 0);
    }

    #[tokio::test]
    async fn test_cast_vote_create_toggle_change() {
        let db = Database::open_in_memory().await.unwrap();
        let reporter = seed_user(&db, "reporter").await;
        let voter = seed_user(&db, "voter").await;
        let concern = seed_concern(&db, Some(&reporter)).await;

        // create
        let cast = db
            .cast_vote(&concern.id, &voter.id, 1, Some(&reporter.id))
            .await
            .unwrap();
        assert_eq!(cast.outcome, VoteOutcome::Created);
        assert_eq!(cast.score, 1);
        assert_eq!(cast.reporter_karma, Some(1));

        // change to -1: delta is -2
        let cast = db
            .cast_vote(&concern.id, &voter.id, -1, Some(&reporter.id))
            .await
            .unwrap();
        assert_eq!(cast.outcome, VoteOutcome::Changed);
        assert_eq!(cast.score, -1);
        assert_eq!(cast.reporter_karma, Some(-1));

        // toggle off
        let cast = db
            .cast_vote(&concern.id, &voter.id, -1, Some(&reporter.id))
            .await
            .unwrap();
        assert_eq!(cast.outcome, VoteOutcome::Removed);
        assert_eq!(cast.score, 0);
        assert_eq!(cast.reporter_karma, Some(0));
    }

    #[tokio::test]
    async fn test_cast_vote_two_voters_scenario() {
        // A +1 -> 1, B -1 -> 0, A changes to -1 -> -2,
        // A toggles off -> -1 (B's -1 still materialized)
        let db = Database::open_in_memory().await.unwrap();
        let reporter = seed_user(&db, "reporter").await;
        let a = seed_user(&db, "voter_a").await;
        let b = seed_user(&db, "voter_b").await;
        let concern = seed_concern(&db, Some(&reporter)).await;

        let cast = db.cast_vote(&concern.id, &a.id, 1, Some(&reporter.id)).await.unwrap();
        assert_eq!(cast.reporter_karma, Some(1));

        let cast = db.cast_vote(&concern.id, &b.id, -1, Some(&reporter.id)).await.unwrap();
        assert_eq!(cast.reporter_karma, Some(0));

        let cast = db.cast_vote(&concern.id, &a.id, -1, Some(&reporter.id)).await.unwrap();
        assert_eq!(cast.reporter_karma, Some(-2));

        let cast = db.cast_vote(&concern.id, &a.id, -1, Some(&reporter.id)).await.unwrap();
        assert_eq!(cast.outcome, VoteOutcome::Removed);
        assert_eq!(cast.reporter_karma, Some(-1));
        assert_eq!(cast.score, -1);

        // score always equals the sum of materialized votes
        assert_eq!(db.concern_score(&concern.id).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_cast_vote_anonymous_concern_skips_karma() {
        let db = Database::open_in_memory().await.unwrap();
        let voter = seed_user(&db, "voter").await;
        let concern = seed_concern(&db, None).await;

        let cast = db.cast_vote(&concern.id, &voter.id, 1, None).await.unwrap();
        assert_eq!(cast.outcome, VoteOutcome::Created);
        assert_eq!(cast.score, 1);
        assert_eq!(cast.reporter_karma, None);
    }

    #[tokio::test]
    async fn test_status_update_locks_and_stamps_resolved_at() {
        let db = Database::open_in_memory().await.unwrap();
        let reporter = seed_user(&db, "reporter").await;
        let concern = seed_concern(&db, Some(&reporter)).await;
        assert!(!concern.is_locked);

        let change = db
            .update_concern_status(&concern.id, "IN_PROGRESS", Some("HIGH"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.old, "PENDING");
        assert_eq!(change.new, "IN_PROGRESS");

        let concern = db.find_concern_by_id(&concern.id).await.unwrap().unwrap();
        assert!(concern.is_locked);
        assert_eq!(concern.priority, "HIGH");
        assert!(concern.resolved_at.is_none());

        db.update_concern_status(&concern.id, "RESOLVED", None)
            .await
            .unwrap();
        let concern = db.find_concern_by_id(&concern.id).await.unwrap().unwrap();
        assert!(concern.resolved_at.is_some());
        let first_resolved = concern.resolved_at;

        // re-resolving keeps the first timestamp
        db.update_concern_status(&concern.id, "CLOSED", None)
            .await
            .unwrap();
        let concern = db.find_concern_by_id(&concern.id).await.unwrap().unwrap();
        assert_eq!(concern.resolved_at, first_resolved);
    }
}
