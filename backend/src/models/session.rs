//! Training session model and its validation rules.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::clean_text;
use crate::config::parse_flag;
use crate::errors::AppError;
use crate::time::{format_timestamp, parse_timestamp};

/// Longest auto-lock window a session may carry (one week).
pub const MAX_AUTO_LOCK_MINUTES: i64 = 7 * 24 * 60;

/// A scheduled training session belonging to one team.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub team_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub start_at: String,
    pub end_at: String,
    pub is_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_lock_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    /// Lock state computed when the row was read
    #[serde(default)]
    pub is_effectively_locked: bool,
}

impl Session {
    /// Locked explicitly, or inside the auto-lock window before kick-off.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_locked {
            return true;
        }
        let Some(minutes) = self.auto_lock_minutes else {
            return false;
        };
        let Ok(start) = parse_timestamp(&self.start_at) else {
            return false;
        };
        // A window too large to subtract from the start is locked already.
        match TimeDelta::try_minutes(minutes).and_then(|window| start.checked_sub_signed(window)) {
            Some(lock_at) => now >= lock_at,
            None => true,
        }
    }

    /// RSVPs are accepted only while unlocked and before the start time.
    pub fn accepts_rsvps_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_locked_at(now) {
            return false;
        }
        match parse_timestamp(&self.start_at) {
            Ok(start) => now < start,
            Err(_) => false,
        }
    }
}

/// Fully validated session values ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDraft {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub start_at: String,
    pub end_at: String,
    pub is_locked: bool,
    pub auto_lock_minutes: Option<i64>,
}

impl SessionDraft {
    fn validated(
        title: &str,
        start_at: &str,
        end_at: &str,
        auto_lock_minutes: Option<i64>,
    ) -> Result<(String, String, String), AppError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        let start = parse_timestamp(start_at)?;
        let end = parse_timestamp(end_at)?;
        if end <= start {
            return Err(AppError::Validation(
                "End time must be after start time".to_string(),
            ));
        }
        match auto_lock_minutes {
            Some(m) if m < 0 => {
                return Err(AppError::Validation(
                    "autoLockMinutes must not be negative".to_string(),
                ));
            }
            Some(m) if m > MAX_AUTO_LOCK_MINUTES => {
                return Err(AppError::Validation(format!(
                    "autoLockMinutes must be at most {}",
                    MAX_AUTO_LOCK_MINUTES
                )));
            }
            _ => {}
        }
        Ok((
            title.to_string(),
            format_timestamp(start),
            format_timestamp(end),
        ))
    }
}

/// Request body for creating a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub start_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub auto_lock_minutes: Option<i64>,
}

impl CreateSessionRequest {
    pub fn into_draft(self) -> Result<SessionDraft, AppError> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.start_at.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("startAt");
        }
        if self.end_at.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("endAt");
        }
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "Missing fields: {}",
                missing.join(", ")
            )));
        }

        let (title, start_at, end_at) = SessionDraft::validated(
            &self.title,
            self.start_at.as_deref().unwrap_or_default(),
            self.end_at.as_deref().unwrap_or_default(),
            self.auto_lock_minutes,
        )?;

        Ok(SessionDraft {
            title,
            description: clean_text(self.description.as_deref()),
            location: clean_text(self.location.as_deref()),
            notes: clean_text(self.notes.as_deref()),
            start_at,
            end_at,
            is_locked: self.is_locked,
            auto_lock_minutes: self.auto_lock_minutes,
        })
    }
}

/// Request body for a partial session update.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_lock_minutes: Option<i64>,
}

impl UpdateSessionRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.notes.is_none()
            && self.start_at.is_none()
            && self.end_at.is_none()
            && self.is_locked.is_none()
            && self.auto_lock_minutes.is_none()
    }

    /// Overlay the provided fields on `existing` and validate the result.
    ///
    /// Blank strings clear the optional text fields.
    pub fn merge(&self, existing: &Session) -> Result<SessionDraft, AppError> {
        let title = self.title.as_deref().unwrap_or(&existing.title);
        let start_at = self.start_at.as_deref().unwrap_or(&existing.start_at);
        let end_at = self.end_at.as_deref().unwrap_or(&existing.end_at);
        let auto_lock_minutes = self.auto_lock_minutes.or(existing.auto_lock_minutes);

        let (title, start_at, end_at) =
            SessionDraft::validated(title, start_at, end_at, auto_lock_minutes)?;

        let merge_text = |update: &Option<String>, current: &Option<String>| match update {
            Some(value) => clean_text(Some(value.as_str())),
            None => current.clone(),
        };

        Ok(SessionDraft {
            title,
            description: merge_text(&self.description, &existing.description),
            location: merge_text(&self.location, &existing.location),
            notes: merge_text(&self.notes, &existing.notes),
            start_at,
            end_at,
            is_locked: self.is_locked.unwrap_or(existing.is_locked),
            auto_lock_minutes,
        })
    }
}

/// Query string for listing sessions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionQuery {
    /// Only sessions that have not yet ended
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub upcoming: Option<bool>,
    /// Inclusive lower bound on the start time
    #[serde(default)]
    pub from: Option<String>,
    /// Exclusive upper bound on the start time
    #[serde(default)]
    pub to: Option<String>,
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_flag(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid flag: {}", raw))),
    }
}
