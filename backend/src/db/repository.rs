//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity.

use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    AccessRequest, ActivityEntry, Invite, OutboxMessage, Profile, ProfilePayload, Role, Rsvp,
    RsvpStatus, RsvpWrite, Session, SessionDraft, TeamMember, TeamSummary,
};
use crate::time::now_timestamp;

const SESSION_COLUMNS: &str = "id, team_id, title, description, location, notes, start_at, end_at, is_locked, auto_lock_minutes, created_by, created_at, updated_at";

const RSVP_SELECT: &str = "SELECT rsvps.id, rsvps.session_id, rsvps.profile_id, rsvps.status, rsvps.note, rsvps.created_at, rsvps.updated_at, profiles.display_name, profiles.email FROM rsvps JOIN profiles ON profiles.id = rsvps.profile_id";

/// Filters applied when listing a team's sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub ends_after: Option<String>,
    pub starts_from: Option<String>,
    pub starts_before: Option<String>,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== TEAM OPERATIONS ====================

    /// Find a team by name, creating it when missing.
    pub async fn ensure_team(&self, name: &str) -> Result<i64, AppError> {
        let now = now_timestamp();
        let row = sqlx::query(
            "INSERT INTO teams (name, created_at, updated_at) VALUES (?, ?, ?) ON CONFLICT(name) DO UPDATE SET name = excluded.name RETURNING id",
        )
        .bind(name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    /// Teams a profile belongs to, with its role in each.
    pub async fn list_memberships(&self, profile_id: i64) -> Result<Vec<TeamSummary>, AppError> {
        let rows = sqlx::query(
            "SELECT team_members.team_id, team_members.role, teams.name FROM team_members JOIN teams ON teams.id = team_members.team_id WHERE team_members.profile_id = ? ORDER BY teams.name",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TeamSummary {
                team_id: row.get("team_id"),
                name: row.get("name"),
                role: role_from_column(row.get("role")),
            })
            .collect())
    }

    /// Roster of a team joined with profile details.
    pub async fn list_members(&self, team_id: i64) -> Result<Vec<TeamMember>, AppError> {
        let rows = sqlx::query(
            "SELECT team_members.id, team_members.profile_id, team_members.role, team_members.joined_at, profiles.display_name, profiles.email FROM team_members JOIN profiles ON profiles.id = team_members.profile_id WHERE team_members.team_id = ? ORDER BY COALESCE(profiles.display_name, profiles.email) COLLATE NOCASE",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(member_from_row).collect())
    }

    /// Ensure a profile belongs to a team with the given role.
    pub async fn ensure_member(
        &self,
        team_id: i64,
        profile_id: i64,
        role: Role,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO team_members (team_id, profile_id, role, joined_at) VALUES (?, ?, ?, ?) ON CONFLICT(team_id, profile_id) DO UPDATE SET role = excluded.role",
        )
        .bind(team_id)
        .bind(profile_id)
        .bind(role.as_str())
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A profile's role in a team, if it is a member.
    pub async fn member_role(&self, team_id: i64, profile_id: i64) -> Result<Option<Role>, AppError> {
        let row = sqlx::query("SELECT role FROM team_members WHERE team_id = ? AND profile_id = ?")
            .bind(team_id)
            .bind(profile_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| role_from_column(r.get("role"))))
    }

    /// Change a member's role.
    pub async fn update_member_role(
        &self,
        team_id: i64,
        member_id: i64,
        role: Role,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE team_members SET role = ? WHERE id = ? AND team_id = ?")
            .bind(role.as_str())
            .bind(member_id)
            .bind(team_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Member {} not found", member_id)));
        }
        Ok(())
    }

    /// Remove a member from a team.
    pub async fn delete_member(&self, team_id: i64, member_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM team_members WHERE id = ? AND team_id = ?")
            .bind(member_id)
            .bind(team_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Member {} not found", member_id)));
        }
        Ok(())
    }

    /// E-mail addresses of a team's members, optionally only those who can manage it.
    pub async fn team_emails(
        &self,
        team_id: i64,
        managers_only: bool,
    ) -> Result<Vec<String>, AppError> {
        let sql = if managers_only {
            "SELECT profiles.email FROM team_members JOIN profiles ON profiles.id = team_members.profile_id WHERE team_members.team_id = ? AND team_members.role IN ('manager', 'admin')"
        } else {
            "SELECT profiles.email FROM team_members JOIN profiles ON profiles.id = team_members.profile_id WHERE team_members.team_id = ?"
        };
        let rows = sqlx::query(sql).bind(team_id).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("email"))
            .filter(|email| !email.is_empty())
            .collect())
    }

    // ==================== PROFILE OPERATIONS ====================

    /// Get a profile by ID.
    pub async fn get_profile(&self, id: i64) -> Result<Option<Profile>, AppError> {
        let row = sqlx::query(
            "SELECT id, email, display_name, phone, guardian_name, created_at, updated_at FROM profiles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(profile_from_row))
    }

    /// Find a profile by e-mail, creating an empty one when missing.
    pub async fn ensure_profile(&self, email: &str) -> Result<i64, AppError> {
        let now = now_timestamp();
        let row = sqlx::query(
            "INSERT INTO profiles (email, created_at, updated_at) VALUES (?, ?, ?) ON CONFLICT(email) DO UPDATE SET email = excluded.email RETURNING id",
        )
        .bind(email)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    // ==================== AUTH OPERATIONS ====================

    /// Look up the invite matching an e-mail and code.
    pub async fn find_invite(&self, email: &str, code: &str) -> Result<Option<Invite>, AppError> {
        let row = sqlx::query(
            "SELECT id, team_id, email, role, code, created_by, created_at, expires_at, accepted_at FROM invites WHERE email = ? AND code = ?",
        )
        .bind(email)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(invite_from_row))
    }

    /// Accept an invite: upsert the profile and membership, mark the invite
    /// accepted and store a fresh access token, all in one transaction.
    pub async fn accept_invite(
        &self,
        invite: &Invite,
        profile: &ProfilePayload,
        raw_token: &str,
    ) -> Result<i64, AppError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"INSERT INTO profiles (email, display_name, phone, guardian_name, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(email) DO UPDATE SET
                   display_name = COALESCE(excluded.display_name, profiles.display_name),
                   phone = COALESCE(excluded.phone, profiles.phone),
                   guardian_name = COALESCE(excluded.guardian_name, profiles.guardian_name),
                   updated_at = excluded.updated_at
               RETURNING id"#,
        )
        .bind(&invite.email)
        .bind(&profile.display_name)
        .bind(&profile.phone)
        .bind(&profile.guardian_name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
        let profile_id: i64 = row.get("id");

        sqlx::query(
            "INSERT INTO team_members (team_id, profile_id, role, joined_at) VALUES (?, ?, ?, ?) ON CONFLICT(team_id, profile_id) DO UPDATE SET role = excluded.role",
        )
        .bind(invite.team_id)
        .bind(profile_id)
        .bind(invite.role.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE invites SET accepted_at = ? WHERE id = ?")
            .bind(&now)
            .bind(invite.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO access_tokens (profile_id, token, issued_at) VALUES (?, ?, ?)")
            .bind(profile_id)
            .bind(raw_token)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(profile_id)
    }

    /// Resolve a raw access token to its profile and record the use.
    pub async fn touch_access_token(&self, raw_token: &str) -> Result<Option<i64>, AppError> {
        let row = sqlx::query(
            "UPDATE access_tokens SET last_used_at = ? WHERE token = ? RETURNING profile_id",
        )
        .bind(now_timestamp())
        .bind(raw_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("profile_id")))
    }

    /// Revoke an access token.
    pub async fn delete_access_token(&self, raw_token: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM access_tokens WHERE token = ?")
            .bind(raw_token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== INVITE OPERATIONS ====================

    /// List all invites of a team.
    pub async fn list_invites(&self, team_id: i64) -> Result<Vec<Invite>, AppError> {
        let rows = sqlx::query(
            "SELECT id, team_id, email, role, code, created_by, created_at, expires_at, accepted_at FROM invites WHERE team_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(invite_from_row).collect())
    }

    /// Create an invite, replacing any previous one for the same team and e-mail.
    pub async fn upsert_invite(
        &self,
        team_id: i64,
        email: &str,
        role: Role,
        code: &str,
        created_by: i64,
        expires_at: &str,
    ) -> Result<Invite, AppError> {
        let row = sqlx::query(
            r#"INSERT INTO invites (team_id, email, role, code, created_by, created_at, expires_at, accepted_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
               ON CONFLICT(team_id, email) DO UPDATE SET
                   role = excluded.role,
                   code = excluded.code,
                   created_by = excluded.created_by,
                   created_at = excluded.created_at,
                   expires_at = excluded.expires_at,
                   accepted_at = NULL
               RETURNING id, team_id, email, role, code, created_by, created_at, expires_at, accepted_at"#,
        )
        .bind(team_id)
        .bind(email)
        .bind(role.as_str())
        .bind(code)
        .bind(created_by)
        .bind(now_timestamp())
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(invite_from_row(&row))
    }

    /// Delete an invite.
    pub async fn delete_invite(&self, team_id: i64, invite_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM invites WHERE id = ? AND team_id = ?")
            .bind(invite_id)
            .bind(team_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Invite {} not found", invite_id)));
        }
        Ok(())
    }

    // ==================== SESSION OPERATIONS ====================

    /// List a team's sessions ordered by start time.
    pub async fn list_sessions(
        &self,
        team_id: i64,
        filter: &SessionFilter,
    ) -> Result<Vec<Session>, AppError> {
        let sql = format!(
            r#"SELECT {SESSION_COLUMNS} FROM sessions
               WHERE team_id = ?
                 AND (? IS NULL OR end_at >= ?)
                 AND (? IS NULL OR start_at >= ?)
                 AND (? IS NULL OR start_at < ?)
               ORDER BY start_at, id"#
        );
        let rows = sqlx::query(&sql)
            .bind(team_id)
            .bind(&filter.ends_after)
            .bind(&filter.ends_after)
            .bind(&filter.starts_from)
            .bind(&filter.starts_from)
            .bind(&filter.starts_before)
            .bind(&filter.starts_before)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    /// Get a session by ID within a team.
    pub async fn get_session(
        &self,
        team_id: i64,
        session_id: i64,
    ) -> Result<Option<Session>, AppError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ? AND team_id = ?");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    /// Create a new session and log `session.created`.
    pub async fn create_session(
        &self,
        team_id: i64,
        created_by: i64,
        draft: &SessionDraft,
    ) -> Result<Session, AppError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"INSERT INTO sessions (
                team_id, title, description, location, notes, start_at, end_at,
                is_locked, auto_lock_minutes, created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {SESSION_COLUMNS}"#
        );
        let row = sqlx::query(&sql)
            .bind(team_id)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(&draft.location)
            .bind(&draft.notes)
            .bind(&draft.start_at)
            .bind(&draft.end_at)
            .bind(draft.is_locked as i32)
            .bind(draft.auto_lock_minutes)
            .bind(created_by)
            .bind(&now)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;
        let session = session_from_row(&row);

        insert_activity(
            &mut *tx,
            &ActivityRow {
                team_id,
                profile_id: Some(created_by),
                action: "session.created",
                entity_type: "session",
                entity_id: Some(session.id),
                payload: json!({ "title": session.title, "startAt": session.start_at }),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    /// Overwrite a session with validated values and log the submitted changes.
    pub async fn update_session(
        &self,
        team_id: i64,
        session_id: i64,
        actor: i64,
        draft: &SessionDraft,
        changes: &serde_json::Value,
    ) -> Result<Session, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"UPDATE sessions SET
                title = ?, description = ?, location = ?, notes = ?, start_at = ?, end_at = ?,
                is_locked = ?, auto_lock_minutes = ?, updated_at = ?
            WHERE id = ? AND team_id = ?
            RETURNING {SESSION_COLUMNS}"#
        );
        let row = sqlx::query(&sql)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(&draft.location)
            .bind(&draft.notes)
            .bind(&draft.start_at)
            .bind(&draft.end_at)
            .bind(draft.is_locked as i32)
            .bind(draft.auto_lock_minutes)
            .bind(now_timestamp())
            .bind(session_id)
            .bind(team_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;
        let session = session_from_row(&row);

        insert_activity(
            &mut *tx,
            &ActivityRow {
                team_id,
                profile_id: Some(actor),
                action: "session.updated",
                entity_type: "session",
                entity_id: Some(session_id),
                payload: changes.clone(),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    /// Delete a session and, through the foreign key, its RSVPs.
    pub async fn delete_session(
        &self,
        team_id: i64,
        session_id: i64,
        actor: i64,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("DELETE FROM sessions WHERE id = ? AND team_id = ? RETURNING title")
            .bind(session_id)
            .bind(team_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;
        let title: String = row.get("title");

        insert_activity(
            &mut *tx,
            &ActivityRow {
                team_id,
                profile_id: Some(actor),
                action: "session.deleted",
                entity_type: "session",
                entity_id: Some(session_id),
                payload: json!({ "title": title }),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== RSVP OPERATIONS ====================

    /// All RSVPs of a session, unsorted.
    pub async fn list_rsvps(&self, session_id: i64) -> Result<Vec<Rsvp>, AppError> {
        let sql = format!("{RSVP_SELECT} WHERE rsvps.session_id = ?");
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(rsvp_from_row).collect())
    }

    /// The RSVP of one profile for one session.
    pub async fn get_rsvp(&self, session_id: i64, profile_id: i64) -> Result<Option<Rsvp>, AppError> {
        let sql = format!("{RSVP_SELECT} WHERE rsvps.session_id = ? AND rsvps.profile_id = ?");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(profile_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(rsvp_from_row))
    }

    /// Insert or update the RSVP keyed by (session, profile) and log the write.
    ///
    /// The transaction opens with a write so concurrent upserts for the same key
    /// wait on the busy timeout instead of failing a read-to-write upgrade.
    pub async fn upsert_rsvp(
        &self,
        team_id: i64,
        session_id: i64,
        profile_id: i64,
        actor: i64,
        status: RsvpStatus,
        note: &str,
    ) -> Result<(RsvpWrite, Rsvp), AppError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO rsvps (session_id, profile_id, status, note, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(session_id, profile_id) DO NOTHING RETURNING id",
        )
        .bind(session_id)
        .bind(profile_id)
        .bind(status.as_str())
        .bind(note)
        .bind(&now)
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        let (write, id): (RsvpWrite, i64) = match inserted {
            Some(row) => (RsvpWrite::Created, row.get("id")),
            None => {
                let row = sqlx::query(
                    "UPDATE rsvps SET status = ?, note = ?, updated_at = ? WHERE session_id = ? AND profile_id = ? RETURNING id",
                )
                .bind(status.as_str())
                .bind(note)
                .bind(&now)
                .bind(session_id)
                .bind(profile_id)
                .fetch_one(&mut *tx)
                .await?;
                (RsvpWrite::Updated, row.get("id"))
            }
        };

        insert_activity(
            &mut *tx,
            &ActivityRow {
                team_id,
                profile_id: Some(actor),
                action: match write {
                    RsvpWrite::Created => "rsvp.created",
                    RsvpWrite::Updated => "rsvp.updated",
                },
                entity_type: "rsvp",
                entity_id: Some(id),
                payload: json!({
                    "sessionId": session_id,
                    "profileId": profile_id,
                    "status": status,
                }),
            },
        )
        .await?;

        let sql = format!("{RSVP_SELECT} WHERE rsvps.id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_one(&mut *tx).await?;
        let rsvp = rsvp_from_row(&row);

        tx.commit().await?;
        Ok((write, rsvp))
    }

    /// Delete one profile's RSVP and log `rsvp.deleted`.
    pub async fn delete_rsvp(
        &self,
        team_id: i64,
        session_id: i64,
        profile_id: i64,
        actor: i64,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rsvps WHERE session_id = ? AND profile_id = ? RETURNING id")
            .bind(session_id)
            .bind(profile_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("RSVP for profile {} not found", profile_id))
            })?;

        insert_activity(
            &mut *tx,
            &ActivityRow {
                team_id,
                profile_id: Some(actor),
                action: "rsvp.deleted",
                entity_type: "rsvp",
                entity_id: None,
                payload: json!({ "sessionId": session_id, "profileId": profile_id }),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== ACTIVITY OPERATIONS ====================

    /// Most recent activity of a team.
    pub async fn list_activity(&self, team_id: i64, limit: i64) -> Result<Vec<ActivityEntry>, AppError> {
        let rows = sqlx::query(
            "SELECT id, team_id, profile_id, action, entity_type, entity_id, payload, created_at FROM activity_logs WHERE team_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(team_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(activity_from_row).collect())
    }

    // ==================== ACCESS REQUEST OPERATIONS ====================

    /// Record a request for access, replacing an earlier one from the same e-mail.
    pub async fn upsert_access_request(
        &self,
        email: &str,
        display_name: Option<&str>,
        message: Option<&str>,
    ) -> Result<AccessRequest, AppError> {
        let row = sqlx::query(
            r#"INSERT INTO access_requests (email, display_name, message, requested_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(email) DO UPDATE SET
                   display_name = excluded.display_name,
                   message = excluded.message,
                   requested_at = excluded.requested_at
               RETURNING id, email, display_name, message, requested_at"#,
        )
        .bind(email)
        .bind(display_name)
        .bind(message)
        .bind(now_timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(access_request_from_row(&row))
    }

    /// All pending access requests, newest first.
    pub async fn list_access_requests(&self) -> Result<Vec<AccessRequest>, AppError> {
        let rows = sqlx::query(
            "SELECT id, email, display_name, message, requested_at FROM access_requests ORDER BY requested_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(access_request_from_row).collect())
    }

    // ==================== NOTIFICATION OPERATIONS ====================

    /// Queue an e-mail for delivery.
    pub async fn enqueue_notification(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<i64, AppError> {
        let recipients_json = serde_json::to_string(recipients)?;
        let result = sqlx::query(
            "INSERT INTO notification_outbox (subject, body, recipients, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(subject)
        .bind(body)
        .bind(&recipients_json)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Undelivered messages below the attempt limit, oldest first.
    pub async fn pending_notifications(
        &self,
        limit: i64,
        max_attempts: i64,
    ) -> Result<Vec<OutboxMessage>, AppError> {
        let rows = sqlx::query(
            "SELECT id, subject, body, recipients, attempts FROM notification_outbox WHERE sent_at IS NULL AND attempts < ? ORDER BY id LIMIT ?",
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let recipients: String = row.get("recipients");
                OutboxMessage {
                    id: row.get("id"),
                    subject: row.get("subject"),
                    body: row.get("body"),
                    recipients: parse_json_array(&recipients),
                    attempts: row.get("attempts"),
                }
            })
            .collect())
    }

    pub async fn mark_notification_sent(&self, id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE notification_outbox SET sent_at = ?, attempts = attempts + 1, last_error = NULL WHERE id = ?",
        )
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_notification_failed(&self, id: i64, error: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE notification_outbox SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Queued notifications as (subject, recipients), oldest first.
    #[cfg(test)]
    pub async fn list_notifications(&self) -> Result<Vec<(String, Vec<String>)>, AppError> {
        let rows = sqlx::query("SELECT subject, recipients FROM notification_outbox ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let recipients: String = row.get("recipients");
                (row.get("subject"), parse_json_array(&recipients))
            })
            .collect())
    }
}

/// An activity log entry written inside the transaction of the change it records.
struct ActivityRow {
    team_id: i64,
    profile_id: Option<i64>,
    action: &'static str,
    entity_type: &'static str,
    entity_id: Option<i64>,
    payload: serde_json::Value,
}

async fn insert_activity(conn: &mut SqliteConnection, entry: &ActivityRow) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO activity_logs (team_id, profile_id, action, entity_type, entity_id, payload, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.team_id)
    .bind(entry.profile_id)
    .bind(entry.action)
    .bind(entry.entity_type)
    .bind(entry.entity_id)
    .bind(serde_json::to_string(&entry.payload)?)
    .bind(now_timestamp())
    .execute(conn)
    .await?;
    Ok(())
}

// Helper functions for row conversion

fn role_from_column(value: String) -> Role {
    // The CHECK constraint on every role column keeps this exhaustive.
    value.parse().unwrap_or(Role::Player)
}

fn member_from_row(row: &SqliteRow) -> TeamMember {
    TeamMember {
        id: row.get("id"),
        profile_id: row.get("profile_id"),
        role: role_from_column(row.get("role")),
        joined_at: row.get("joined_at"),
        display_name: row.get("display_name"),
        email: row.get("email"),
    }
}

fn profile_from_row(row: &SqliteRow) -> Profile {
    Profile {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        phone: row.get("phone"),
        guardian_name: row.get("guardian_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn invite_from_row(row: &SqliteRow) -> Invite {
    Invite {
        id: row.get("id"),
        team_id: row.get("team_id"),
        email: row.get("email"),
        role: role_from_column(row.get("role")),
        code: row.get("code"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        accepted_at: row.get("accepted_at"),
    }
}

fn session_from_row(row: &SqliteRow) -> Session {
    let is_locked: i32 = row.get("is_locked");
    let mut session = Session {
        id: row.get("id"),
        team_id: row.get("team_id"),
        title: row.get("title"),
        description: row.get("description"),
        location: row.get("location"),
        notes: row.get("notes"),
        start_at: row.get("start_at"),
        end_at: row.get("end_at"),
        is_locked: is_locked != 0,
        auto_lock_minutes: row.get("auto_lock_minutes"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        is_effectively_locked: false,
    };
    session.is_effectively_locked = session.is_locked_at(Utc::now());
    session
}

fn rsvp_from_row(row: &SqliteRow) -> Rsvp {
    let status: String = row.get("status");
    Rsvp {
        id: row.get("id"),
        session_id: row.get("session_id"),
        profile_id: row.get("profile_id"),
        // Guarded by the CHECK constraint on rsvps.status.
        status: status.parse().unwrap_or(RsvpStatus::Pending),
        note: row.get("note"),
        display_name: row.get("display_name"),
        email: row.get("email"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn activity_from_row(row: &SqliteRow) -> ActivityEntry {
    let payload: Option<String> = row.get("payload");
    ActivityEntry {
        id: row.get("id"),
        team_id: row.get("team_id"),
        profile_id: row.get("profile_id"),
        action: row.get("action"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
        created_at: row.get("created_at"),
    }
}

fn access_request_from_row(row: &SqliteRow) -> AccessRequest {
    AccessRequest {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        message: row.get("message"),
        requested_at: row.get("requested_at"),
    }
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .unwrap();
        (Repository::new(pool), temp_dir)
    }

    fn draft(start_at: &str, end_at: &str) -> SessionDraft {
        SessionDraft {
            title: "Dribbling".to_string(),
            description: None,
            location: Some("Pitch 1".to_string()),
            notes: None,
            start_at: start_at.to_string(),
            end_at: end_at.to_string(),
            is_locked: false,
            auto_lock_minutes: None,
        }
    }

    #[tokio::test]
    async fn test_ensure_team_is_idempotent() {
        let (repo, _dir) = repo().await;
        let first = repo.ensure_team("Titans").await.unwrap();
        let second = repo.ensure_team("Titans").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_accept_invite_onboards_profile() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Gladiators").await.unwrap();
        let inviter = repo.ensure_profile("boss@example.com").await.unwrap();
        let invite = repo
            .upsert_invite(team_id, "kid@example.com", Role::Player, "ABC", inviter, "2099-01-01T00:00:00Z")
            .await
            .unwrap();

        let details = ProfilePayload {
            display_name: Some("Kid".to_string()),
            ..Default::default()
        };
        let profile_id = repo.accept_invite(&invite, &details, "raw-1").await.unwrap();

        assert_eq!(repo.member_role(team_id, profile_id).await.unwrap(), Some(Role::Player));
        assert_eq!(repo.member_role(team_id, inviter).await.unwrap(), None);
        assert_eq!(repo.touch_access_token("raw-1").await.unwrap(), Some(profile_id));

        let accepted = repo.find_invite("kid@example.com", "ABC").await.unwrap().unwrap();
        assert!(accepted.accepted_at.is_some());

        // A second sign-in keeps earlier details when none are given.
        repo.accept_invite(&invite, &ProfilePayload::default(), "raw-2")
            .await
            .unwrap();
        let profile = repo.get_profile(profile_id).await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Kid"));

        repo.delete_access_token("raw-1").await.unwrap();
        assert_eq!(repo.touch_access_token("raw-1").await.unwrap(), None);
        assert_eq!(repo.touch_access_token("raw-2").await.unwrap(), Some(profile_id));
    }

    #[tokio::test]
    async fn test_rsvp_upsert_keeps_one_row_per_profile() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Titans").await.unwrap();
        let profile_id = repo.ensure_profile("coach@example.com").await.unwrap();
        let session = repo
            .create_session(
                team_id,
                profile_id,
                &draft("2030-01-01T10:00:00Z", "2030-01-01T11:00:00Z"),
            )
            .await
            .unwrap();

        let (write, _) = repo
            .upsert_rsvp(team_id, session.id, profile_id, profile_id, RsvpStatus::Maybe, "")
            .await
            .unwrap();
        assert_eq!(write, RsvpWrite::Created);

        let (write, rsvp) = repo
            .upsert_rsvp(team_id, session.id, profile_id, profile_id, RsvpStatus::Yes, "bringing cones")
            .await
            .unwrap();
        assert_eq!(write, RsvpWrite::Updated);
        assert_eq!(rsvp.status, RsvpStatus::Yes);
        assert_eq!(rsvp.note, "bringing cones");
        assert_eq!(rsvp.email.as_deref(), Some("coach@example.com"));

        assert_eq!(repo.list_rsvps(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_filters() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Trojans").await.unwrap();
        let profile_id = repo.ensure_profile("m@example.com").await.unwrap();
        for (start, end) in [
            ("2020-01-01T10:00:00Z", "2020-01-01T11:00:00Z"),
            ("2030-02-01T10:00:00Z", "2030-02-01T11:00:00Z"),
            ("2030-01-01T10:00:00Z", "2030-01-01T11:00:00Z"),
        ] {
            repo.create_session(team_id, profile_id, &draft(start, end))
                .await
                .unwrap();
        }

        let all = repo
            .list_sessions(team_id, &SessionFilter::default())
            .await
            .unwrap();
        let starts: Vec<&str> = all.iter().map(|s| s.start_at.as_str()).collect();
        assert_eq!(
            starts,
            vec![
                "2020-01-01T10:00:00Z",
                "2030-01-01T10:00:00Z",
                "2030-02-01T10:00:00Z"
            ]
        );

        let upcoming = repo
            .list_sessions(
                team_id,
                &SessionFilter {
                    ends_after: Some(now_timestamp()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(upcoming.len(), 2);

        let january = repo
            .list_sessions(
                team_id,
                &SessionFilter {
                    starts_from: Some("2030-01-01T00:00:00Z".to_string()),
                    starts_before: Some("2030-02-01T00:00:00Z".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(january.len(), 1);
        assert_eq!(january[0].start_at, "2030-01-01T10:00:00Z");
    }

    #[tokio::test]
    async fn test_delete_session_cascades_rsvps() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Spartans").await.unwrap();
        let profile_id = repo.ensure_profile("p@example.com").await.unwrap();
        let session = repo
            .create_session(
                team_id,
                profile_id,
                &draft("2030-01-01T10:00:00Z", "2030-01-01T11:00:00Z"),
            )
            .await
            .unwrap();
        repo.upsert_rsvp(team_id, session.id, profile_id, profile_id, RsvpStatus::No, "")
            .await
            .unwrap();

        repo.delete_session(team_id, session.id, profile_id).await.unwrap();
        assert!(repo.list_rsvps(session.id).await.unwrap().is_empty());
        assert!(matches!(
            repo.delete_session(team_id, session.id, profile_id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_log_activity() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Argonauts").await.unwrap();
        let profile_id = repo.ensure_profile("m@example.com").await.unwrap();
        let session = repo
            .create_session(
                team_id,
                profile_id,
                &draft("2030-01-01T10:00:00Z", "2030-01-01T11:00:00Z"),
            )
            .await
            .unwrap();

        let changes = serde_json::json!({ "title": "Drills" });
        let mut update = draft("2030-01-01T10:00:00Z", "2030-01-01T11:00:00Z");
        update.title = "Drills".to_string();
        let updated = repo
            .update_session(team_id, session.id, profile_id, &update, &changes)
            .await
            .unwrap();
        assert_eq!(updated.title, "Drills");

        repo.upsert_rsvp(team_id, session.id, profile_id, profile_id, RsvpStatus::Yes, "")
            .await
            .unwrap();
        repo.delete_rsvp(team_id, session.id, profile_id, profile_id)
            .await
            .unwrap();
        assert!(matches!(
            repo.delete_rsvp(team_id, session.id, profile_id, profile_id).await,
            Err(AppError::NotFound(_))
        ));
        repo.delete_session(team_id, session.id, profile_id)
            .await
            .unwrap();

        let entries = repo.list_activity(team_id, 10).await.unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            [
                "session.deleted",
                "rsvp.deleted",
                "rsvp.created",
                "session.updated",
                "session.created"
            ]
        );
        assert_eq!(entries[3].payload, Some(changes));
        assert_eq!(entries[3].entity_id, Some(session.id));
        assert!(entries.iter().all(|e| e.profile_id == Some(profile_id)));
    }

    #[tokio::test]
    async fn test_failed_activity_rolls_back_mutation() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Vikings").await.unwrap();
        let profile_id = repo.ensure_profile("m@example.com").await.unwrap();
        let session = repo
            .create_session(
                team_id,
                profile_id,
                &draft("2030-01-01T10:00:00Z", "2030-01-01T11:00:00Z"),
            )
            .await
            .unwrap();

        sqlx::query("DROP TABLE activity_logs")
            .execute(&repo.pool)
            .await
            .unwrap();

        assert!(repo
            .create_session(
                team_id,
                profile_id,
                &draft("2030-02-01T10:00:00Z", "2030-02-01T11:00:00Z"),
            )
            .await
            .is_err());
        assert!(repo
            .upsert_rsvp(team_id, session.id, profile_id, profile_id, RsvpStatus::Yes, "")
            .await
            .is_err());
        assert!(repo
            .delete_session(team_id, session.id, profile_id)
            .await
            .is_err());

        let sessions = repo
            .list_sessions(team_id, &SessionFilter::default())
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(repo.list_rsvps(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_rsvp_upserts_update_in_place() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Titans").await.unwrap();
        let profile_id = repo.ensure_profile("p@example.com").await.unwrap();
        let session = repo
            .create_session(
                team_id,
                profile_id,
                &draft("2030-01-01T10:00:00Z", "2030-01-01T11:00:00Z"),
            )
            .await
            .unwrap();
        let session_id = session.id;

        for _ in 0..5 {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let repo = repo.clone();
                    let status = if i % 2 == 0 { RsvpStatus::Yes } else { RsvpStatus::No };
                    tokio::spawn(async move {
                        repo.upsert_rsvp(team_id, session_id, profile_id, profile_id, status, "")
                            .await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        }

        assert_eq!(repo.list_rsvps(session_id).await.unwrap().len(), 1);
        let created = repo
            .list_activity(team_id, 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.action == "rsvp.created")
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_oversized_auto_lock_row_still_reads() {
        let (repo, _dir) = repo().await;
        let team_id = repo.ensure_team("Titans").await.unwrap();
        sqlx::query(
            "INSERT INTO sessions (team_id, title, start_at, end_at, is_locked, auto_lock_minutes, created_at, updated_at) VALUES (?, 'Legacy', '2030-01-01T10:00:00Z', '2030-01-01T11:00:00Z', 0, ?, 'x', 'x')",
        )
        .bind(team_id)
        .bind(1_000_000_000_000_000_i64)
        .execute(&repo.pool)
        .await
        .unwrap();

        let sessions = repo
            .list_sessions(team_id, &SessionFilter::default())
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_effectively_locked);
    }
}
