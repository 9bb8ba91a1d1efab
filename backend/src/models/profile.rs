//! Profile and sign-in models.

use serde::{Deserialize, Serialize};

use super::TeamSummary;

/// A person known to the system, identified by e-mail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Optional profile details supplied at sign-in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub guardian_name: Option<String>,
}

/// Request body for `POST /api/auth/magic-link`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub invite_code: String,
    #[serde(default)]
    pub season_code: Option<String>,
    #[serde(default)]
    pub profile: ProfilePayload,
}

/// Result of a successful sign-in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub profile: Profile,
    pub teams: Vec<TeamSummary>,
    pub token: String,
}

/// The signed-in caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub profile: Profile,
    pub teams: Vec<TeamSummary>,
}

/// Lower-case and trim an e-mail address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trim optional free text, mapping blank values to `None`.
pub fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
