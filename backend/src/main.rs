//! U8s Training Scheduler Backend
//!
//! REST backend for scheduling youth football training sessions and collecting RSVPs,
//! with SQLite persistence and invite-only sign-in.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod notify;
mod time;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{AccessGate, TokenSigner};
use config::Config;
use db::Repository;
use notify::{Notifier, OutboxDispatcher, SmtpMailer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
    pub signer: Arc<TokenSigner>,
    pub gate: Arc<AccessGate>,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    pub fn new(repo: Repository, config: Config) -> Result<Self, errors::AppError> {
        let gate = AccessGate::from_config(&config)?;
        Ok(Self {
            repo: Arc::new(repo),
            signer: Arc::new(TokenSigner::new(&config.app_secret)),
            gate: Arc::new(gate),
            notifier: Arc::new(Notifier::from_config(&config)),
            config: Arc::new(config),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting U8s Training Scheduler Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Public URL: {}", config.base_url);

    if config.app_secret == config::DEV_SECRET {
        tracing::warn!("U8S_APP_SECRET is not set. Tokens are signed with the development secret!");
    }
    if !config.enable_email {
        tracing::info!("Email notifications disabled (U8S_ENABLE_EMAIL)");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Repository::new(pool);

    if config.seed {
        let seeded = db::seed_teams(&repo, &db::default_teams_from_env()).await?;
        tracing::info!("Seeded {} teams", seeded);
    }

    start_outbox_delivery(&repo, &config)?;

    // Create application state
    let bind_addr = config.bind_addr;
    let state = AppState::new(repo, config)?;
    if !state.gate.is_enabled() {
        tracing::warn!(
            "No season access code configured (U8S_SEASON_ACCESS_CODE). The access gate is open!"
        );
    }

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn the SMTP dispatcher when e-mail is enabled and a relay is configured.
fn start_outbox_delivery(repo: &Repository, config: &Config) -> Result<(), errors::AppError> {
    let Some(sender) = config.email_sender.clone().filter(|_| config.enable_email) else {
        return Ok(());
    };
    match SmtpMailer::from_config(config)? {
        Some(mailer) => {
            tracing::info!(
                "Delivering e-mail via {}:{} every {}s",
                config.smtp_host.as_deref().unwrap_or_default(),
                config.smtp_port,
                config.outbox_poll_secs
            );
            OutboxDispatcher::new(repo.clone(), mailer, sender)
                .spawn(Duration::from_secs(config.outbox_poll_secs));
        }
        None => {
            tracing::warn!("U8S_SMTP_HOST is not set. Notifications stay queued in the outbox");
        }
    }
    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes reachable without a token
    let public_routes = Router::new()
        .route("/auth/magic-link", post(api::magic_link))
        .route("/access/verify", post(api::verify_access))
        .route("/access-requests", post(api::create_access_request));

    let protected_routes = Router::new()
        // Auth
        .route("/auth/logout", post(api::logout))
        .route("/me", get(api::me))
        .route("/access-requests", get(api::list_access_requests))
        // Teams
        .route("/teams", get(api::list_teams))
        .route("/teams/{team_id}/members", get(api::list_members))
        .route(
            "/teams/{team_id}/members/{member_id}",
            patch(api::update_member).delete(api::delete_member),
        )
        // Invites
        .route(
            "/teams/{team_id}/invites",
            get(api::list_invites).post(api::create_invite),
        )
        .route("/teams/{team_id}/invites/{invite_id}", delete(api::delete_invite))
        // Sessions
        .route(
            "/teams/{team_id}/sessions",
            get(api::list_sessions).post(api::create_session),
        )
        .route(
            "/teams/{team_id}/sessions/{session_id}",
            get(api::get_session)
                .put(api::update_session)
                .delete(api::delete_session),
        )
        // RSVPs
        .route(
            "/teams/{team_id}/sessions/{session_id}/rsvps",
            get(api::list_rsvps),
        )
        .route(
            "/teams/{team_id}/sessions/{session_id}/rsvps/self",
            get(api::get_own_rsvp).put(api::put_own_rsvp),
        )
        .route(
            "/teams/{team_id}/sessions/{session_id}/rsvps/{profile_id}",
            put(api::put_rsvp).delete(api::delete_rsvp),
        )
        // Activity
        .route("/teams/{team_id}/activity", get(api::list_activity))
        // Apply bearer auth middleware
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::bearer_auth_layer,
        ));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
