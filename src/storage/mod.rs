use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

// ─── Row types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SavedProjectRow {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    /// Free-form duration hint, e.g. "3-4 months". Drives the expected
    /// completion date when progress tracking is initialized.
    pub duration_hint: Option<String>,
    pub status: String,
    pub progress_percentage: i64,
    pub progress_tracking_enabled: bool,
    pub start_date: Option<String>,
    pub expected_completion_date: Option<String>,
    pub actual_completion_date: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct WorkspaceRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub owner_id: i64,
    pub saved_project_id: Option<i64>,
    pub is_public: bool,
    pub max_members: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct MemberRow {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub role: String,
    pub can_edit: bool,
    pub can_invite: bool,
    pub joined_at: String,
}

/// Membership joined with the user directory for display.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct MemberWithUserRow {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub role: String,
    pub can_edit: bool,
    pub can_invite: bool,
    pub joined_at: String,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct InviteRow {
    pub id: i64,
    pub workspace_id: i64,
    pub email: String,
    pub invited_by: i64,
    pub token: String,
    pub role: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
    pub responded_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub body: String,
    pub message_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct MessageWithAuthorRow {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub body: String,
    pub message_type: String,
    pub created_at: String,
    pub author_name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct FileRow {
    pub id: i64,
    pub workspace_id: i64,
    pub uploaded_by: i64,
    /// Generated on-disk name; collision-resistant.
    pub filename: String,
    pub original_filename: String,
    pub file_size: i64,
    pub file_type: Option<String>,
    pub file_path: String,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ActivityRow {
    pub id: i64,
    pub workspace_id: i64,
    /// NULL = system event.
    pub user_id: Option<i64>,
    pub activity_type: String,
    pub description: String,
    /// Free-form structured payload, JSON text.
    pub payload: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PhaseRow {
    pub id: i64,
    pub saved_project_id: i64,
    pub phase_name: String,
    pub phase_order: i64,
    pub description: String,
    pub estimated_duration_weeks: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub actual_completion_date: Option<String>,
    pub status: String,
    pub progress_percentage: i64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TaskRow {
    pub id: i64,
    pub phase_id: i64,
    pub task_name: String,
    pub description: Option<String>,
    pub task_order: i64,
    pub is_completed: bool,
    pub completed_at: Option<String>,
    pub due_date: Option<String>,
    pub created_at: String,
}

/// A phase to materialize, with its task checklist. Used by both the default
/// template and custom timeline replacement.
#[derive(Debug, Clone)]
pub struct NewPhase {
    pub phase_name: String,
    pub phase_order: i64,
    pub description: String,
    pub estimated_duration_weeks: i64,
    pub start_date: String,
    pub end_date: String,
    pub tasks: Vec<String>,
}

// ─── Storage ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("collabd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                // Cascade deletes (workspace → members/invites/messages/files/
                // activity, phase → tasks) rely on FK enforcement.
                .foreign_keys(true)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        let schema = [
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS auth_tokens (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                issued_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS saved_projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                duration_hint TEXT,
                status TEXT NOT NULL DEFAULT 'saved',
                progress_percentage INTEGER NOT NULL DEFAULT 0,
                progress_tracking_enabled INTEGER NOT NULL DEFAULT 0,
                start_date TEXT,
                expected_completion_date TEXT,
                actual_completion_date TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS workspaces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                owner_id INTEGER NOT NULL REFERENCES users(id),
                saved_project_id INTEGER REFERENCES saved_projects(id) ON DELETE SET NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                max_members INTEGER NOT NULL DEFAULT 10,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS workspace_members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                can_edit INTEGER NOT NULL DEFAULT 0,
                can_invite INTEGER NOT NULL DEFAULT 0,
                joined_at TEXT NOT NULL,
                UNIQUE(workspace_id, user_id)
            )",
            "CREATE TABLE IF NOT EXISTS workspace_invites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                invited_by INTEGER NOT NULL REFERENCES users(id),
                token TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                responded_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS workspace_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id),
                body TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'text',
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS workspace_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                uploaded_by INTEGER NOT NULL REFERENCES users(id),
                filename TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                file_type TEXT,
                file_path TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS workspace_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                user_id INTEGER REFERENCES users(id),
                activity_type TEXT NOT NULL,
                description TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS project_phases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                saved_project_id INTEGER NOT NULL REFERENCES saved_projects(id) ON DELETE CASCADE,
                phase_name TEXT NOT NULL,
                phase_order INTEGER NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                estimated_duration_weeks INTEGER,
                start_date TEXT,
                end_date TEXT,
                actual_completion_date TEXT,
                status TEXT NOT NULL DEFAULT 'not_started',
                progress_percentage INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS phase_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phase_id INTEGER NOT NULL REFERENCES project_phases(id) ON DELETE CASCADE,
                task_name TEXT NOT NULL,
                description TEXT,
                task_order INTEGER NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT,
                due_date TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS ix_members_workspace ON workspace_members(workspace_id)",
            "CREATE INDEX IF NOT EXISTS ix_messages_workspace ON workspace_messages(workspace_id, id)",
            "CREATE INDEX IF NOT EXISTS ix_activity_workspace ON workspace_activity(workspace_id, id)",
            "CREATE INDEX IF NOT EXISTS ix_phases_project ON project_phases(saved_project_id, phase_order)",
            "CREATE INDEX IF NOT EXISTS ix_tasks_phase ON phase_tasks(phase_id, task_order)",
        ];
        for stmt in schema {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .context("failed to create schema")?;
        }
        Ok(())
    }

    // ─── Users & tokens ──────────────────────────────────────────────────────

    pub async fn create_user(&self, email: &str, display_name: &str) -> Result<UserRow> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO users (email, display_name, created_at) VALUES (?, ?, ?)",
        )
        .bind(email)
        .bind(display_name)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_user(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("user not found after insert"))
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn lookup_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn insert_token(&self, token: &str, user_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO auth_tokens (token, user_id, issued_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(now_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_for_token(&self, token: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as(
            "SELECT u.* FROM users u JOIN auth_tokens t ON t.user_id = u.id WHERE t.token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ─── Saved projects (external store contract) ────────────────────────────

    pub async fn create_saved_project(
        &self,
        owner_id: i64,
        title: &str,
        duration_hint: Option<&str>,
    ) -> Result<SavedProjectRow> {
        let result = sqlx::query(
            "INSERT INTO saved_projects (owner_id, title, duration_hint, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(owner_id)
        .bind(title)
        .bind(duration_hint)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        self.get_saved_project(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("saved project not found after insert"))
    }

    pub async fn get_saved_project(&self, id: i64) -> Result<Option<SavedProjectRow>> {
        Ok(sqlx::query_as("SELECT * FROM saved_projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn enable_progress_tracking(
        &self,
        id: i64,
        start_date: &str,
        expected_completion_date: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE saved_projects
             SET progress_tracking_enabled = 1, status = 'not_started',
                 start_date = ?, expected_completion_date = ?
             WHERE id = ?",
        )
        .bind(start_date)
        .bind(expected_completion_date)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_project_progress(&self, id: i64, percentage: i64) -> Result<()> {
        sqlx::query("UPDATE saved_projects SET progress_percentage = ? WHERE id = ?")
            .bind(percentage)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_project_status(
        &self,
        id: i64,
        status: &str,
        actual_completion_date: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE saved_projects
             SET status = ?, actual_completion_date = COALESCE(?, actual_completion_date)
             WHERE id = ?",
        )
        .bind(status)
        .bind(actual_completion_date)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ─── Workspaces ──────────────────────────────────────────────────────────

    pub async fn create_workspace(
        &self,
        owner_id: i64,
        name: &str,
        description: &str,
        saved_project_id: Option<i64>,
        is_public: bool,
        max_members: i64,
    ) -> Result<WorkspaceRow> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO workspaces (name, description, owner_id, saved_project_id, is_public, max_members, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(owner_id)
        .bind(saved_project_id)
        .bind(is_public)
        .bind(max_members)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let workspace_id = result.last_insert_rowid();
        // The owner is always an implicit member with full capabilities.
        sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id, role, can_edit, can_invite, joined_at)
             VALUES (?, ?, 'owner', 1, 1, ?)",
        )
        .bind(workspace_id)
        .bind(owner_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.get_workspace(workspace_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("workspace not found after insert"))
    }

    pub async fn get_workspace(&self, id: i64) -> Result<Option<WorkspaceRow>> {
        Ok(sqlx::query_as("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Workspaces the user owns or belongs to, newest first.
    pub async fn list_workspaces_for_user(&self, user_id: i64) -> Result<Vec<WorkspaceRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM workspaces
                 WHERE owner_id = ?
                    OR id IN (SELECT workspace_id FROM workspace_members WHERE user_id = ?)
                 ORDER BY created_at DESC",
            )
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Public workspaces the user is not already a member of.
    pub async fn discover_public_workspaces(&self, user_id: i64) -> Result<Vec<WorkspaceRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM workspaces
             WHERE is_public = 1
               AND id NOT IN (SELECT workspace_id FROM workspace_members WHERE user_id = ?)
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn update_workspace(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
        is_public: Option<bool>,
        max_members: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workspaces SET
                 name = COALESCE(?, name),
                 description = COALESCE(?, description),
                 is_public = COALESCE(?, is_public),
                 max_members = COALESCE(?, max_members),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(is_public)
        .bind(max_members)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a workspace. FK cascades remove members, invites, messages,
    /// files, and activity; linked saved-project phases are untouched.
    pub async fn delete_workspace(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn member_count(&self, workspace_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workspace_members WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // ─── Members ─────────────────────────────────────────────────────────────

    pub async fn get_membership(
        &self,
        workspace_id: i64,
        user_id: i64,
    ) -> Result<Option<MemberRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_member(&self, member_id: i64) -> Result<Option<MemberRow>> {
        Ok(sqlx::query_as("SELECT * FROM workspace_members WHERE id = ?")
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_members(&self, workspace_id: i64) -> Result<Vec<MemberWithUserRow>> {
        Ok(sqlx::query_as(
            "SELECT m.id, m.workspace_id, m.user_id, m.role, m.can_edit, m.can_invite,
                    m.joined_at, u.email, u.display_name
             FROM workspace_members m JOIN users u ON u.id = m.user_id
             WHERE m.workspace_id = ?
             ORDER BY m.joined_at ASC, m.id ASC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Atomically insert a membership only while the workspace has a free
    /// slot. The capacity check and the insert are a single statement, so two
    /// concurrent joins at the last slot cannot both succeed. Returns `false`
    /// when the workspace is full.
    pub async fn try_insert_member(
        &self,
        workspace_id: i64,
        user_id: i64,
        role: &str,
        can_edit: bool,
        can_invite: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id, role, can_edit, can_invite, joined_at)
             SELECT ?, ?, ?, ?, ?, ?
             WHERE (SELECT COUNT(*) FROM workspace_members WHERE workspace_id = ?)
                 < (SELECT max_members FROM workspaces WHERE id = ?)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(role)
        .bind(can_edit)
        .bind(can_invite)
        .bind(now_rfc3339())
        .bind(workspace_id)
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_member_role(
        &self,
        member_id: i64,
        role: &str,
        can_edit: bool,
        can_invite: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workspace_members SET role = ?, can_edit = ?, can_invite = ? WHERE id = ?",
        )
        .bind(role)
        .bind(can_edit)
        .bind(can_invite)
        .bind(member_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_member(&self, member_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM workspace_members WHERE id = ?")
            .bind(member_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Invites ─────────────────────────────────────────────────────────────

    pub async fn create_invite(
        &self,
        workspace_id: i64,
        email: &str,
        invited_by: i64,
        token: &str,
        role: &str,
        expires_at: &str,
    ) -> Result<InviteRow> {
        let result = sqlx::query(
            "INSERT INTO workspace_invites (workspace_id, email, invited_by, token, role, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(email)
        .bind(invited_by)
        .bind(token)
        .bind(role)
        .bind(now_rfc3339())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        Ok(sqlx::query_as("SELECT * FROM workspace_invites WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn get_invite_by_token(&self, token: &str) -> Result<Option<InviteRow>> {
        Ok(sqlx::query_as("SELECT * FROM workspace_invites WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_invite_in_workspace(
        &self,
        invite_id: i64,
        workspace_id: i64,
    ) -> Result<Option<InviteRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM workspace_invites WHERE id = ? AND workspace_id = ?",
        )
        .bind(invite_id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_invites(&self, workspace_id: i64) -> Result<Vec<InviteRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM workspace_invites WHERE workspace_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn find_pending_invite(
        &self,
        workspace_id: i64,
        email: &str,
    ) -> Result<Option<InviteRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM workspace_invites
             WHERE workspace_id = ? AND email = ? AND status = 'pending'",
        )
        .bind(workspace_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn mark_invite(
        &self,
        invite_id: i64,
        status: &str,
        responded_at: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE workspace_invites SET status = ?, responded_at = ? WHERE id = ?")
            .bind(status)
            .bind(responded_at)
            .bind(invite_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Accept an invite: capacity-guarded membership insert plus the invite
    /// flip to `accepted`, as one transaction. Returns `false` (rolled back)
    /// when the workspace is at capacity.
    pub async fn accept_invite_and_join(
        &self,
        invite_id: i64,
        workspace_id: i64,
        user_id: i64,
        role: &str,
        can_edit: bool,
        can_invite: bool,
    ) -> Result<bool> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id, role, can_edit, can_invite, joined_at)
             SELECT ?, ?, ?, ?, ?, ?
             WHERE (SELECT COUNT(*) FROM workspace_members WHERE workspace_id = ?)
                 < (SELECT max_members FROM workspaces WHERE id = ?)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(role)
        .bind(can_edit)
        .bind(can_invite)
        .bind(&now)
        .bind(workspace_id)
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(
            "UPDATE workspace_invites SET status = 'accepted', responded_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(invite_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    pub async fn create_message(
        &self,
        workspace_id: i64,
        user_id: i64,
        body: &str,
        message_type: &str,
    ) -> Result<MessageWithAuthorRow> {
        let result = sqlx::query(
            "INSERT INTO workspace_messages (workspace_id, user_id, body, message_type, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(body)
        .bind(message_type)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        Ok(sqlx::query_as(
            "SELECT m.*, u.display_name AS author_name
             FROM workspace_messages m JOIN users u ON u.id = m.user_id
             WHERE m.id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        Ok(sqlx::query_as("SELECT * FROM workspace_messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Newest-first page of messages, keyed by the monotonic row id so
    /// same-timestamp messages page deterministically. `before` is an
    /// exclusive message-id cursor.
    pub async fn list_messages(
        &self,
        workspace_id: i64,
        limit: i64,
        before: Option<i64>,
    ) -> Result<Vec<MessageWithAuthorRow>> {
        let rows = if let Some(before_id) = before {
            sqlx::query_as(
                "SELECT m.*, u.display_name AS author_name
                 FROM workspace_messages m JOIN users u ON u.id = m.user_id
                 WHERE m.workspace_id = ? AND m.id < ?
                 ORDER BY m.created_at DESC, m.id DESC LIMIT ?",
            )
            .bind(workspace_id)
            .bind(before_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT m.*, u.display_name AS author_name
                 FROM workspace_messages m JOIN users u ON u.id = m.user_id
                 WHERE m.workspace_id = ?
                 ORDER BY m.created_at DESC, m.id DESC LIMIT ?",
            )
            .bind(workspace_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows)
    }

    pub async fn delete_message(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM workspace_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_messages(&self, workspace_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workspace_messages WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // ─── Files ───────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_file(
        &self,
        workspace_id: i64,
        uploaded_by: i64,
        filename: &str,
        original_filename: &str,
        file_size: i64,
        file_type: Option<&str>,
        file_path: &str,
        description: &str,
    ) -> Result<FileRow> {
        let result = sqlx::query(
            "INSERT INTO workspace_files
             (workspace_id, uploaded_by, filename, original_filename, file_size, file_type, file_path, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(uploaded_by)
        .bind(filename)
        .bind(original_filename)
        .bind(file_size)
        .bind(file_type)
        .bind(file_path)
        .bind(description)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        self.get_file(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("file not found after insert"))
    }

    pub async fn get_file(&self, id: i64) -> Result<Option<FileRow>> {
        Ok(sqlx::query_as("SELECT * FROM workspace_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_files(&self, workspace_id: i64) -> Result<Vec<FileRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM workspace_files WHERE workspace_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn delete_file(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM workspace_files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Activity log ────────────────────────────────────────────────────────

    pub async fn append_activity(
        &self,
        workspace_id: i64,
        user_id: Option<i64>,
        activity_type: &str,
        description: &str,
        payload: &str,
    ) -> Result<ActivityRow> {
        let result = sqlx::query(
            "INSERT INTO workspace_activity (workspace_id, user_id, activity_type, description, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(activity_type)
        .bind(description)
        .bind(payload)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        Ok(sqlx::query_as("SELECT * FROM workspace_activity WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn list_activity(
        &self,
        workspace_id: i64,
        limit: i64,
        before: Option<i64>,
    ) -> Result<Vec<ActivityRow>> {
        let rows = if let Some(before_id) = before {
            sqlx::query_as(
                "SELECT * FROM workspace_activity
                 WHERE workspace_id = ? AND id < ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(workspace_id)
            .bind(before_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM workspace_activity
                 WHERE workspace_id = ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(workspace_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows)
    }

    pub async fn count_activity(&self, workspace_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workspace_activity WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn count_invites(&self, workspace_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workspace_invites WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // ─── Phases & tasks ──────────────────────────────────────────────────────

    /// Materialize a phase set for a project in one transaction. With
    /// `replace` the existing phases (and their tasks, via cascade) are
    /// deleted first and the project rollup is reset — no partially-replaced
    /// phase set is ever observable.
    pub async fn create_phases(
        &self,
        saved_project_id: i64,
        phases: &[NewPhase],
        replace: bool,
    ) -> Result<()> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        if replace {
            sqlx::query("DELETE FROM project_phases WHERE saved_project_id = ?")
                .bind(saved_project_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE saved_projects SET status = 'not_started', progress_percentage = 0 WHERE id = ?",
            )
            .bind(saved_project_id)
            .execute(&mut *tx)
            .await?;
        }
        for phase in phases {
            let result = sqlx::query(
                "INSERT INTO project_phases
                 (saved_project_id, phase_name, phase_order, description, estimated_duration_weeks,
                  start_date, end_date, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 'not_started', ?, ?)",
            )
            .bind(saved_project_id)
            .bind(&phase.phase_name)
            .bind(phase.phase_order)
            .bind(&phase.description)
            .bind(phase.estimated_duration_weeks)
            .bind(&phase.start_date)
            .bind(&phase.end_date)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            let phase_id = result.last_insert_rowid();
            for (idx, task_name) in phase.tasks.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO phase_tasks (phase_id, task_name, task_order, created_at)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(phase_id)
                .bind(task_name)
                .bind(idx as i64 + 1)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_phases(&self, saved_project_id: i64) -> Result<Vec<PhaseRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM project_phases WHERE saved_project_id = ? ORDER BY phase_order ASC",
        )
        .bind(saved_project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_phase(&self, id: i64) -> Result<Option<PhaseRow>> {
        Ok(sqlx::query_as("SELECT * FROM project_phases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn update_phase_fields(
        &self,
        id: i64,
        notes: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE project_phases SET
                 notes = COALESCE(?, notes),
                 start_date = COALESCE(?, start_date),
                 end_date = COALESCE(?, end_date),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(notes)
        .bind(start_date)
        .bind(end_date)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Force a phase to `completed`: 100%, every task checked, completion
    /// stamped. One transaction with the task sweep.
    pub async fn force_phase_completed(&self, phase_id: i64) -> Result<()> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE project_phases SET status = 'completed', progress_percentage = 100,
                 actual_completion_date = COALESCE(actual_completion_date, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(phase_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE phase_tasks SET is_completed = 1, completed_at = COALESCE(completed_at, ?)
             WHERE phase_id = ? AND is_completed = 0",
        )
        .bind(&now)
        .bind(phase_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Force a phase back to `not_started`: 0%, every task reset.
    pub async fn force_phase_reset(&self, phase_id: i64) -> Result<()> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE project_phases SET status = 'not_started', progress_percentage = 0,
                 actual_completion_date = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(&now)
        .bind(phase_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE phase_tasks SET is_completed = 0, completed_at = NULL WHERE phase_id = ?",
        )
        .bind(phase_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_phase_status(&self, phase_id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE project_phases SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(now_rfc3339())
            .bind(phase_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_phase_progress(&self, phase_id: i64, percentage: i64) -> Result<()> {
        sqlx::query("UPDATE project_phases SET progress_percentage = ?, updated_at = ? WHERE id = ?")
            .bind(percentage)
            .bind(now_rfc3339())
            .bind(phase_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_phase_completed(&self, phase_id: i64) -> Result<()> {
        let now = now_rfc3339();
        sqlx::query(
            "UPDATE project_phases SET status = 'completed',
                 actual_completion_date = COALESCE(actual_completion_date, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(phase_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_tasks(&self, phase_id: i64) -> Result<Vec<TaskRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM phase_tasks WHERE phase_id = ? ORDER BY task_order ASC, id ASC",
        )
        .bind(phase_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<TaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM phase_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn insert_task(
        &self,
        phase_id: i64,
        task_name: &str,
        description: Option<&str>,
        due_date: Option<&str>,
    ) -> Result<TaskRow> {
        // Appends at max(task_order) + 1.
        let result = sqlx::query(
            "INSERT INTO phase_tasks (phase_id, task_name, description, task_order, due_date, created_at)
             VALUES (?, ?, ?,
                     (SELECT COALESCE(MAX(task_order), 0) + 1 FROM phase_tasks WHERE phase_id = ?),
                     ?, ?)",
        )
        .bind(phase_id)
        .bind(task_name)
        .bind(description)
        .bind(phase_id)
        .bind(due_date)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        self.get_task(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task not found after insert"))
    }

    pub async fn set_task_completion(
        &self,
        task_id: i64,
        is_completed: bool,
        completed_at: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE phase_tasks SET is_completed = ?, completed_at = ? WHERE id = ?")
            .bind(is_completed)
            .bind(completed_at)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM phase_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// (total, completed) task counts for one phase.
    pub async fn phase_task_counts(&self, phase_id: i64) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(is_completed), 0) FROM phase_tasks WHERE phase_id = ?",
        )
        .bind(phase_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// (total, completed) task counts across every phase of a project.
    pub async fn project_task_counts(&self, saved_project_id: i64) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(t.is_completed), 0)
             FROM phase_tasks t
             JOIN project_phases p ON p.id = t.phase_id
             WHERE p.saved_project_id = ?",
        )
        .bind(saved_project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
