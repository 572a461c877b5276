//! Smoke check against a running buddy backend.
//!
//! Loads the client config, checks health, then reads the buddy list and,
//! when `--user <id>` (or `BUDDY_USER`) is given, that user's selection and
//! sessions through the cache.

use std::process::ExitCode;
use std::sync::Arc;

use buddy_client::{
    telemetry, BuddyService, ClientConfig, ClientError, Identity, IdentityProvider, RestClient,
    StaticIdentity,
};
use buddy_core::UserId;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("buddy-smoke: {}", err);
            return ExitCode::from(2);
        }
    };
    telemetry::init(&config.log);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "smoke check failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ClientConfig) -> Result<(), ClientError> {
    let identity = Arc::new(match user_from_args().or_else(user_from_env) {
        Some(user) => {
            let identity = Identity::new(UserId::parse(user).map_err(buddy_core::ApiError::from)?);
            StaticIdentity::new(identity)
        }
        None => StaticIdentity::signed_out(),
    });
    let client = RestClient::new(&config)?
        .with_identity(Arc::clone(&identity) as Arc<dyn IdentityProvider>);
    info!(base_url = %client.base_url(), "checking backend");

    let service = BuddyService::new(Arc::new(client), identity, config.cache_config());

    let health = service.health().await?;
    info!(status = %health.status, version = ?health.version, healthy = health.is_healthy(), "health");

    let buddies = service.buddies().await?;
    info!(count = buddies.len(), "buddies");

    if service.sync_identity().is_some() {
        let selected = service.selected_buddy().await?;
        info!(selected = ?selected.as_ref().map(|b| b.name.as_str()), "selected buddy");
        let sessions = service.ui_sessions().await?;
        for session in &sessions {
            info!(
                id = %session.session().session_id,
                title = %session.display_title,
                icon = %session.icon,
                "session"
            );
        }
    }

    let stats = service.cache().stats();
    info!(fetches = stats.fetches, hits = stats.hits, hit_rate = stats.hit_rate(), "cache");
    Ok(())
}

fn user_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--user" {
            return args.next();
        }
    }
    None
}

fn user_from_env() -> Option<String> {
    std::env::var("BUDDY_USER").ok().filter(|v| !v.trim().is_empty())
}
