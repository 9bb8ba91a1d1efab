//! Startup seeding of the club's teams and their managers.

use super::Repository;
use crate::errors::AppError;
use crate::models::{normalize_email, Role};

/// Club teams and the environment variable naming each team's manager.
pub const DEFAULT_TEAMS: [(&str, &str); 5] = [
    ("Titans", "TITANS_MANAGER_EMAIL"),
    ("Trojans", "TROJANS_MANAGER_EMAIL"),
    ("Gladiators", "GLADIATORS_MANAGER_EMAIL"),
    ("Spartans", "SPARTANS_MANAGER_EMAIL"),
    ("Argonauts", "ARGONAUTS_MANAGER_EMAIL"),
];

/// Ensure each team exists and, where an e-mail is given, that it has that manager.
pub async fn seed_teams(
    repo: &Repository,
    teams: &[(&str, Option<String>)],
) -> Result<usize, AppError> {
    for (name, manager_email) in teams {
        let team_id = repo.ensure_team(name).await?;
        let Some(email) = manager_email.as_deref().map(normalize_email) else {
            continue;
        };
        if email.is_empty() {
            continue;
        }
        let profile_id = repo.ensure_profile(&email).await?;
        repo.ensure_member(team_id, profile_id, Role::Manager).await?;
        tracing::info!("Seeded manager {} for team {}", email, name);
    }
    Ok(teams.len())
}

/// The default team list with manager e-mails read from the environment.
pub fn default_teams_from_env() -> Vec<(&'static str, Option<String>)> {
    DEFAULT_TEAMS
        .iter()
        .map(|(name, key)| (*name, std::env::var(key).ok()))
        .collect()
}
