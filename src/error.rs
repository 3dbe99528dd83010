use askama::Template;
use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};

use crate::{config::ConfigError, templates::ErrorTemplate};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Session store error: {0}")]
    SessionStore(#[from] tower_sessions::session_store::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("OAuth2 state mismatch")]
    StateMismatch,

    #[error("Missing OAuth2 authorization code")]
    MissingAuthCode,

    #[error("Invalid OAuth2 provider: {0}")]
    InvalidProvider(String),

    #[error("Identity provider denied access: {0}")]
    Denied(String),

    #[error("Failed to exchange code for token: {0}")]
    TokenExchange(String),

    #[error("Failed to fetch user profile: {0}")]
    ProfileFetch(String),

    #[error("Invalid session")]
    InvalidSession,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::StateMismatch | AuthError::MissingAuthCode => StatusCode::BAD_REQUEST,
            AuthError::InvalidProvider(_) => StatusCode::NOT_FOUND,
            AuthError::Denied(_) => StatusCode::UNAUTHORIZED,
            AuthError::TokenExchange(_) | AuthError::ProfileFetch(_) => StatusCode::BAD_GATEWAY,
            AuthError::InvalidSession => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(auth_error) => auth_error.status(),
            AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::Template(_)
            | AppError::Config(_)
            | AppError::Migration(_)
            | AppError::SessionStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::NotFound(_) | AppError::BadRequest(_) => {
                tracing::debug!("Request rejected: {}", self);
            }
            AppError::Forbidden(_) => {
                tracing::warn!("Request rejected: {}", self);
            }
            AppError::Auth(auth_error) if status.is_client_error() => {
                tracing::warn!("Authentication failed: {}", auth_error);
            }
            _ => {
                tracing::error!("Request failed with {}: {}", status, self);
            }
        }

        error_page(status)
    }
}

/// Renders the generic error page for `status`.
pub fn error_page(status: StatusCode) -> Response {
    let template = ErrorTemplate::new(status);
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!("Failed to render error page: {}", e);
            (status, status.to_string()).into_response()
        }
    }
}

/// Replaces any non-HTML 400..=510 response with the error page, so unknown
/// routes, wrong methods and extractor rejections look like handler errors.
pub async fn error_pages(response: Response) -> Response {
    let status = response.status();
    if !(400..=510).contains(&status.as_u16()) {
        return response;
    }

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if is_html {
        response
    } else {
        error_page(status)
    }
}
