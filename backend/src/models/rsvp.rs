//! RSVP model: one attendance response per (session, profile).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RsvpStatus {
    Yes,
    No,
    Maybe,
    Pending,
}

impl RsvpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RsvpStatus::Yes => "yes",
            RsvpStatus::No => "no",
            RsvpStatus::Maybe => "maybe",
            RsvpStatus::Pending => "pending",
        }
    }
}

impl FromStr for RsvpStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yes" => Ok(RsvpStatus::Yes),
            "no" => Ok(RsvpStatus::No),
            "maybe" => Ok(RsvpStatus::Maybe),
            "pending" => Ok(RsvpStatus::Pending),
            _ => Err(AppError::Validation("Invalid status".to_string())),
        }
    }
}

impl fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RSVP joined with the responder's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rsvp {
    pub id: i64,
    pub session_id: i64,
    pub profile_id: i64,
    pub status: RsvpStatus,
    pub note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Rsvp {
    /// Name shown on the roster; falls back to the e-mail, then a generic label.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref())
            .unwrap_or("Player")
    }
}

/// Order RSVPs by case-insensitive name, ties broken by profile id.
pub fn sort_rsvps(rsvps: &mut [Rsvp]) {
    rsvps.sort_by(|a, b| {
        a.label()
            .to_lowercase()
            .cmp(&b.label().to_lowercase())
            .then(a.profile_id.cmp(&b.profile_id))
    });
}

/// Response counts per status.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RsvpSummary {
    pub yes: usize,
    pub maybe: usize,
    pub no: usize,
    pub pending: usize,
}

impl RsvpSummary {
    pub fn from_rsvps(rsvps: &[Rsvp]) -> Self {
        rsvps.iter().fold(Self::default(), |mut acc, rsvp| {
            match rsvp.status {
                RsvpStatus::Yes => acc.yes += 1,
                RsvpStatus::Maybe => acc.maybe += 1,
                RsvpStatus::No => acc.no += 1,
                RsvpStatus::Pending => acc.pending += 1,
            }
            acc
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpListResponse {
    pub rsvps: Vec<Rsvp>,
    pub summary: RsvpSummary,
    /// The caller's own status, if they have responded
    pub mine: Option<RsvpStatus>,
}

/// Request body for setting an RSVP.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertRsvpRequest {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Whether an upsert inserted a new row or changed an existing one.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RsvpWrite {
    Created,
    Updated,
}

impl RsvpWrite {
    pub fn as_str(&self) -> &'static str {
        match self {
            RsvpWrite::Created => "created",
            RsvpWrite::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RsvpWriteResponse {
    pub status: RsvpWrite,
    pub rsvp: Rsvp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsvp(profile_id: i64, name: Option<&str>, email: &str, status: RsvpStatus) -> Rsvp {
        Rsvp {
            id: profile_id,
            session_id: 1,
            profile_id,
            status,
            note: String::new(),
            display_name: name.map(str::to_string),
            email: Some(email.to_string()),
            created_at: "2026-04-01T00:00:00Z".to_string(),
            updated_at: "2026-04-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!("YES".parse::<RsvpStatus>().unwrap(), RsvpStatus::Yes);
        assert_eq!(" Pending".parse::<RsvpStatus>().unwrap(), RsvpStatus::Pending);
        assert_eq!(
            "late".parse::<RsvpStatus>().unwrap_err().message(),
            "Invalid status"
        );
    }

    #[test]
    fn test_sort_by_name_then_profile() {
        let mut rsvps = vec![
            rsvp(3, Some("zoe"), "z@example.com", RsvpStatus::Yes),
            rsvp(2, Some("Alex"), "a2@example.com", RsvpStatus::No),
            rsvp(1, Some("alex"), "a1@example.com", RsvpStatus::Maybe),
            rsvp(4, None, "bea@example.com", RsvpStatus::Yes),
        ];
        sort_rsvps(&mut rsvps);
        let order: Vec<i64> = rsvps.iter().map(|r| r.profile_id).collect();
        assert_eq!(order, vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_summary_groups_by_status() {
        let rsvps = vec![
            rsvp(1, None, "a@example.com", RsvpStatus::Yes),
            rsvp(2, None, "b@example.com", RsvpStatus::Yes),
            rsvp(3, None, "c@example.com", RsvpStatus::Pending),
        ];
        assert_eq!(
            RsvpSummary::from_rsvps(&rsvps),
            RsvpSummary {
                yes: 2,
                maybe: 0,
                no: 0,
                pending: 1
            }
        );
    }
}
