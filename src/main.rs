use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rcdir::{
    build_router, AccountManager, AccountRepository, AppState, AuthService, Config, Database,
    OAuth2Config, ServiceDirectory, ServiceRepository, SessionManager, UserDirectory,
    UserRepository,
};

const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rcdir=debug,tower_http=debug,tower_sessions=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!("Configuration loaded successfully");

    let database = Database::new(&config.database_url)
        .await
        .context("failed to open database")?;
    tracing::info!("Database initialized and migrations completed");

    let pool = database.pool().clone();
    let session_manager = SessionManager::new(&config, pool.clone())
        .await
        .context("failed to set up sessions")?;
    session_manager.spawn_expired_deletion(SESSION_PRUNE_INTERVAL);

    let users = UserDirectory::new(UserRepository::new(pool.clone()));
    let services = ServiceDirectory::new(ServiceRepository::new(pool.clone()));
    let accounts = AccountManager::new(
        AccountRepository::new(pool.clone()),
        ServiceRepository::new(pool),
    );

    let oauth2_config = OAuth2Config::new(&config).context("failed to configure OAuth2 client")?;
    let auth_service = AuthService::new(oauth2_config);
    tracing::info!("OAuth2 client configured for {}", config.provider_url);

    let app_state = AppState {
        auth_service,
        users,
        services,
        accounts,
    };
    let app = build_router(app_state, &session_manager);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("RC directory listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down gracefully...");
        },
    }
}
