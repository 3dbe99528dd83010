use axum::{
    extract::{Form, Path, Query, State},
    middleware,
    response::{Html, IntoResponse, Redirect},
    routing::get,
    Router,
};
use askama::Template;
use oauth2::CsrfToken;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tower_sessions::Session;

use crate::{
    auth::AuthService,
    directory::{AccountManager, ServiceDirectory, UserDirectory},
    error::{error_pages, AppError, AuthError},
    session::{auth_gate, CurrentUser, SessionExt, SessionManager},
    templates::{
        AddAccountTemplate, AddServiceTemplate, EditAccountTemplate, IndexTemplate,
        ServiceTemplate, UserTemplate,
    },
};

// Application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub users: UserDirectory,
    pub services: ServiceDirectory,
    pub accounts: AccountManager,
}

/// Every route behind the auth gate, wrapped in sessions, error pages and tracing.
pub fn build_router(state: AppState, sessions: &SessionManager) -> Router {
    let router = Router::new()
        .route("/", get(index_handler))
        .route("/user/:id", get(user_handler))
        .route(
            "/edit/account/:account_id",
            get(edit_account_form_handler).post(edit_account_handler),
        )
        .route("/delete/account/:account_id", get(delete_account_handler))
        .route("/service/:name", get(service_handler))
        .route("/add/account", get(add_account_form_handler).post(add_account_handler))
        .route("/add/service", get(add_service_form_handler).post(add_service_handler))
        // Authentication routes (exempt from the gate)
        .route("/auth/:provider", get(auth_handler))
        .route(
            "/auth/:provider/callback",
            get(callback_query_handler).post(callback_form_handler),
        )
        .route("/logout", get(logout_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(state.clone(), auth_gate))
        .with_state(state);

    sessions.attach(router).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::map_response(error_pages)),
    )
}

// OAuth2 callback parameters, from the query string or a form post
#[derive(Debug, Deserialize)]
pub struct AuthCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountForm {
    pub service: Option<String>,
    #[serde(default)]
    pub uri: String,
    pub mobile_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Ids that are not numbers name nothing, so they are not found rather than malformed.
fn parse_id(kind: &str, raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("{} {}", kind, raw)))
}

pub async fn index_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let services = state.services.list_services().await?;
    let users = state.users.list_users().await?;

    let html = IndexTemplate::new(current_user.user, services, users).render()?;
    Ok(Html(html))
}

pub async fn user_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.users.get_user(parse_id("user", &id)?).await?;
    let accounts = state.accounts.accounts_for_user(user.id).await?;

    let html = UserTemplate::new(current_user.user, user, accounts, current_user.uid).render()?;
    Ok(Html(html))
}

pub async fn service_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.services.get_service_by_name(&name).await?;
    let accounts = state.accounts.accounts_for_service(service.id).await?;

    let html = ServiceTemplate::new(current_user.user, service, accounts).render()?;
    Ok(Html(html))
}

pub async fn edit_account_form_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (account, service) = state
        .accounts
        .get_account_for_edit(parse_id("account", &account_id)?, current_user.uid)
        .await?;

    let html = EditAccountTemplate::new(current_user.user, account, service).render()?;
    Ok(Html(html))
}

pub async fn edit_account_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Form(form): Form<AccountForm>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .accounts
        .update_account(
            parse_id("account", &account_id)?,
            current_user.uid,
            form.service.as_deref().unwrap_or_default(),
            &form.uri,
            form.mobile_uri,
        )
        .await?;

    Ok(Redirect::to(&format!("/user/{}", account.user_id)))
}

pub async fn delete_account_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .accounts
        .delete_account(parse_id("account", &account_id)?, current_user.uid)
        .await?;

    Ok(Redirect::to(&format!("/user/{}", account.user_id)))
}

pub async fn add_account_form_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let services = state.services.list_services().await?;

    let html = AddAccountTemplate::new(current_user.user, services).render()?;
    Ok(Html(html))
}

pub async fn add_account_handler(
    current_user: CurrentUser,
    State(state): State<AppState>,
    Form(form): Form<AccountForm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .accounts
        .create_account(
            current_user.user.as_ref(),
            form.service.as_deref(),
            &form.uri,
            form.mobile_uri,
        )
        .await?;

    Ok(Redirect::to(&format!("/user/{}", current_user.uid)))
}

pub async fn add_service_form_handler(
    current_user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let html = AddServiceTemplate::new(current_user.user).render()?;
    Ok(Html(html))
}

pub async fn add_service_handler(
    State(state): State<AppState>,
    Form(form): Form<ServiceForm>,
) -> Result<impl IntoResponse, AppError> {
    state.services.create_service(&form.name, &form.url).await?;
    Ok(Redirect::to("/"))
}

// Authentication route handlers
pub async fn auth_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    session: Session,
) -> Result<impl IntoResponse, AppError> {
    let (auth_url, csrf_token) = state.auth_service.initiate_auth(&provider)?;

    // Store CSRF token in session
    session.set_csrf_token(csrf_token.secret().clone()).await?;

    Ok(Redirect::to(&auth_url))
}

pub async fn callback_query_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    session: Session,
    Query(params): Query<AuthCallbackParams>,
) -> Result<impl IntoResponse, AppError> {
    handle_auth_callback(&state, &provider, &session, params).await
}

pub async fn callback_form_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    session: Session,
    Form(params): Form<AuthCallbackParams>,
) -> Result<impl IntoResponse, AppError> {
    handle_auth_callback(&state, &provider, &session, params).await
}

async fn handle_auth_callback(
    state: &AppState,
    provider: &str,
    session: &Session,
    params: AuthCallbackParams,
) -> Result<Redirect, AppError> {
    AuthService::check_provider(provider)?;

    if let Some(error) = params.error {
        return Err(AuthError::Denied(error).into());
    }

    let code = params.code.ok_or(AuthError::MissingAuthCode)?;
    let state_param = params.state.ok_or(AuthError::StateMismatch)?;
    let expected = session
        .get_csrf_token()
        .await?
        .ok_or(AuthError::StateMismatch)?;

    let identity = state
        .auth_service
        .handle_callback(code, state_param, CsrfToken::new(expected))
        .await?;

    let user = state.users.record_login(&identity).await?;

    session.start_user_session(identity.uid, &identity.token).await?;
    session.clear_csrf_token().await?;

    tracing::info!("User {} successfully authenticated via {}", user.name, provider);
    Ok(Redirect::to("/"))
}

pub async fn not_found_handler() -> AppError {
    AppError::NotFound("no such route".to_string())
}

pub async fn logout_handler(session: Session) -> Result<impl IntoResponse, AppError> {
    session.clear_user_session().await?;
    session.clear_csrf_token().await?;

    tracing::info!("User logged out");
    Ok(Redirect::to("/"))
}
