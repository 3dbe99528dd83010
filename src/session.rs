use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Router,
};
use sqlx::SqlitePool;
use time::Duration;
use tower_sessions::{
    cookie::Key, session_store::ExpiredDeletion, Expiry, Session, SessionManagerLayer,
};
use tower_sessions_sqlx_store::SqliteStore;

use crate::{
    auth::LOGIN_PATH,
    config::{Config, ConfigError},
    directory::UserDirectory,
    error::{AppError, AuthError},
    handlers::AppState,
    models::User,
};

// Session keys
const UID_KEY: &str = "uid";
const TOKEN_KEY: &str = "token";
const CSRF_TOKEN_KEY: &str = "csrf_token";

const SESSION_COOKIE: &str = "rcdir_session";

/// Session records live next to the directory tables and are pruned once expired.
#[derive(Clone)]
pub struct SessionManager {
    store: SqliteStore,
    key: Key,
    secure: bool,
}

impl SessionManager {
    pub async fn new(config: &Config, pool: SqlitePool) -> Result<Self, AppError> {
        let key = Key::try_from(config.session_secret.as_bytes())
            .map_err(|_| ConfigError::SessionSecretTooShort)?;

        let store = SqliteStore::new(pool);
        store.migrate().await?;

        Ok(Self {
            store,
            key,
            secure: config.secure_cookies(),
        })
    }

    pub async fn delete_expired(&self) -> Result<(), AppError> {
        self.store.delete_expired().await?;
        Ok(())
    }

    /// Prunes expired sessions every `period` for the life of the process.
    pub fn spawn_expired_deletion(&self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = sessions.delete_expired().await {
                    tracing::warn!("Failed to delete expired sessions: {}", e);
                }
            }
        })
    }

    /// Wraps `router` in the signed session cookie layer.
    pub fn attach<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let layer = SessionManagerLayer::new(self.store.clone())
            .with_signed(self.key.clone())
            .with_secure(self.secure)
            .with_same_site(tower_sessions::cookie::SameSite::Lax)
            .with_http_only(true)
            .with_name(SESSION_COOKIE)
            .with_expiry(Expiry::OnInactivity(Duration::days(1)));

        router.layer(layer)
    }
}

// Session extension trait for easier session management
pub trait SessionExt {
    async fn get_uid(&self) -> Result<Option<i64>, AppError>;
    async fn start_user_session(&self, uid: i64, token: &str) -> Result<(), AppError>;
    async fn clear_user_session(&self) -> Result<(), AppError>;
    async fn get_csrf_token(&self) -> Result<Option<String>, AppError>;
    async fn set_csrf_token(&self, token: String) -> Result<(), AppError>;
    async fn clear_csrf_token(&self) -> Result<(), AppError>;
}

fn session_error(action: &str, e: tower_sessions::session::Error) -> AppError {
    tracing::error!("Failed to {}: {}", action, e);
    AppError::Auth(AuthError::InvalidSession)
}

impl SessionExt for Session {
    async fn get_uid(&self) -> Result<Option<i64>, AppError> {
        self.get::<i64>(UID_KEY)
            .await
            .map_err(|e| session_error("read session user", e))
    }

    async fn start_user_session(&self, uid: i64, token: &str) -> Result<(), AppError> {
        // A fresh id on login, so a cookie handed out before it never gains the user.
        self.cycle_id()
            .await
            .map_err(|e| session_error("rotate session id", e))?;
        self.insert(UID_KEY, uid)
            .await
            .map_err(|e| session_error("store session user", e))?;
        self.insert(TOKEN_KEY, token.to_string())
            .await
            .map_err(|e| session_error("store session token", e))?;

        tracing::info!("User session created for user ID: {}", uid);
        Ok(())
    }

    async fn clear_user_session(&self) -> Result<(), AppError> {
        self.remove::<i64>(UID_KEY)
            .await
            .map_err(|e| session_error("clear session user", e))?;
        self.remove::<String>(TOKEN_KEY)
            .await
            .map_err(|e| session_error("clear session token", e))?;
        Ok(())
    }

    async fn get_csrf_token(&self) -> Result<Option<String>, AppError> {
        self.get::<String>(CSRF_TOKEN_KEY)
            .await
            .map_err(|e| session_error("get CSRF token", e))
    }

    async fn set_csrf_token(&self, token: String) -> Result<(), AppError> {
        self.insert(CSRF_TOKEN_KEY, token)
            .await
            .map_err(|e| session_error("set CSRF token", e))
    }

    async fn clear_csrf_token(&self) -> Result<(), AppError> {
        self.remove::<String>(CSRF_TOKEN_KEY)
            .await
            .map(|_| ())
            .map_err(|e| session_error("clear CSRF token", e))
    }
}

/// The logged-in requester. `user` is `None` when the session outlived the record.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub uid: i64,
    pub user: Option<User>,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AppError::Auth(AuthError::InvalidSession))
    }
}

pub enum GateOutcome {
    Continue(CurrentUser),
    Redirect(&'static str),
}

/// Login, callback and logout paths run without a session.
pub fn is_exempt(path: &str) -> bool {
    path.starts_with("/auth/") || path.starts_with("/logout")
}

pub async fn resolve_current_user(
    session: &Session,
    users: &UserDirectory,
) -> Result<GateOutcome, AppError> {
    match session.get_uid().await? {
        Some(uid) => {
            let user = users.find_user(uid).await?;
            if user.is_none() {
                tracing::debug!("Session user {} has no directory record", uid);
            }
            Ok(GateOutcome::Continue(CurrentUser { uid, user }))
        }
        None => Ok(GateOutcome::Redirect(LOGIN_PATH)),
    }
}

// Authentication gate: every non-exempt request needs a session user
pub async fn auth_gate(
    State(state): State<AppState>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if is_exempt(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    match resolve_current_user(&session, &state.users).await? {
        GateOutcome::Continue(current_user) => {
            request.extensions_mut().insert(current_user);
            Ok(next.run(request).await)
        }
        GateOutcome::Redirect(login_path) => {
            tracing::debug!("No session for {}, redirecting to login", request.uri().path());
            Ok(Redirect::to(login_path).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use axum::http::Request as HttpRequest;
    use tempfile::TempDir;
    use time::OffsetDateTime;
    use tower_sessions::{
        session::{Id, Record},
        session_store::SessionStore,
    };

    async fn test_pool() -> (SqlitePool, TempDir) {
        let dir = TempDir::new().unwrap();
        let database_url = format!("sqlite:{}", dir.path().join("sessions.db").to_str().unwrap());
        let db = Database::new(&database_url).await.unwrap();
        (db.pool().clone(), dir)
    }

    fn record(expiry_date: OffsetDateTime) -> Record {
        Record {
            id: Id::default(),
            data: Default::default(),
            expiry_date,
        }
    }

    fn test_config(session_secret: &str) -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            rc_client_id: "id".to_string(),
            rc_client_secret: "secret".to_string(),
            session_secret: session_secret.to_string(),
            base_url: "http://localhost:3000".to_string(),
            provider_url: "https://www.recurse.com".to_string(),
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
        }
    }

    #[test]
    fn test_exempt_paths() {
        assert!(is_exempt("/auth/recurse_center"));
        assert!(is_exempt("/auth/recurse_center/callback"));
        assert!(is_exempt("/logout"));
    }

    #[test]
    fn test_protected_paths() {
        for path in ["/", "/user/1", "/add/service", "/service/auth", "/authors", "/edit/account/1"] {
            assert!(!is_exempt(path), "{} should be protected", path);
        }
    }

    #[tokio::test]
    async fn test_session_manager_requires_long_secret() {
        let (pool, _dir) = test_pool().await;
        assert!(matches!(
            SessionManager::new(&test_config("short"), pool.clone()).await,
            Err(AppError::Config(ConfigError::SessionSecretTooShort))
        ));
        assert!(SessionManager::new(&test_config(&"k".repeat(64)), pool).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_deleted() {
        let (pool, _dir) = test_pool().await;
        let sessions = SessionManager::new(&test_config(&"k".repeat(64)), pool.clone())
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        sessions.store.save(&record(now - Duration::days(1))).await.unwrap();
        sessions.store.save(&record(now + Duration::days(1))).await.unwrap();

        sessions.delete_expired().await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tower_sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_current_user_read_from_extensions() {
        let mut request = HttpRequest::builder().uri("/").body(()).unwrap();
        request.extensions_mut().insert(CurrentUser { uid: 9, user: None });
        let (mut parts, _) = request.into_parts();

        let current_user = CurrentUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(current_user.uid, 9);
        assert!(current_user.user.is_none());
    }

    #[tokio::test]
    async fn test_current_user_missing_is_rejected() {
        let request = HttpRequest::builder().uri("/").body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let result = CurrentUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AppError::Auth(AuthError::InvalidSession))));
    }
}
