use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    RedirectUrl, TokenResponse, TokenUrl,
};
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::{
    config::{Config, ConfigError},
    error::{AppError, AuthError},
    models::ProviderIdentity,
};

/// The only identity provider this directory accepts.
pub const PROVIDER: &str = "recurse_center";

/// Where the auth gate sends anyone without a session.
pub const LOGIN_PATH: &str = "/auth/recurse_center";

#[derive(Debug, Clone)]
pub struct OAuth2Config {
    pub client: BasicClient,
    pub http_client: HttpClient,
    pub profile_url: String,
}

fn parse_url<T>(raw: String, parse: impl FnOnce(String) -> Result<T, oauth2::url::ParseError>) -> Result<T, AppError> {
    parse(raw.clone()).map_err(|_| AppError::Config(ConfigError::InvalidUrl(raw)))
}

impl OAuth2Config {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let provider_url = config.provider_url.trim_end_matches('/');

        let client = BasicClient::new(
            ClientId::new(config.rc_client_id.clone()),
            Some(ClientSecret::new(config.rc_client_secret.clone())),
            parse_url(format!("{}/oauth/authorize", provider_url), AuthUrl::new)?,
            Some(parse_url(format!("{}/oauth/token", provider_url), TokenUrl::new)?),
        )
        .set_redirect_uri(parse_url(
            format!("{}/auth/{}/callback", config.base_url.trim_end_matches('/'), PROVIDER),
            RedirectUrl::new,
        )?);

        Ok(OAuth2Config {
            client,
            http_client: HttpClient::new(),
            profile_url: format!("{}/api/v1/people/me", provider_url),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuthService {
    oauth2_config: OAuth2Config,
}

// Recurse Center API profile response
#[derive(Debug, Deserialize)]
pub struct RecurseProfile {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub image: Option<String>,
    pub batch: Option<RecurseBatch>,
}

#[derive(Debug, Deserialize)]
pub struct RecurseBatch {
    pub name: String,
}

impl RecurseProfile {
    pub fn into_identity(self, token: String) -> ProviderIdentity {
        let name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();

        ProviderIdentity {
            uid: self.id,
            token,
            name,
            image: self.image,
            batch: self.batch.map(|batch| batch.name),
        }
    }
}

impl AuthService {
    pub fn new(oauth2_config: OAuth2Config) -> Self {
        Self { oauth2_config }
    }

    pub fn check_provider(provider: &str) -> Result<(), AuthError> {
        if provider == PROVIDER {
            Ok(())
        } else {
            Err(AuthError::InvalidProvider(provider.to_string()))
        }
    }

    pub fn initiate_auth(&self, provider: &str) -> Result<(String, CsrfToken), AuthError> {
        Self::check_provider(provider)?;

        let (auth_url, csrf_token) = self
            .oauth2_config
            .client
            .authorize_url(CsrfToken::new_random)
            .url();

        Ok((auth_url.to_string(), csrf_token))
    }

    /// Verifies the CSRF state, trades the code for a token and reads the profile.
    pub async fn handle_callback(
        &self,
        code: String,
        state: String,
        expected_csrf_token: CsrfToken,
    ) -> Result<ProviderIdentity, AuthError> {
        if state != *expected_csrf_token.secret() {
            return Err(AuthError::StateMismatch);
        }

        let token_result = self
            .oauth2_config
            .client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        let access_token = token_result.access_token().secret().clone();

        let profile_response = self
            .oauth2_config
            .http_client
            .get(&self.oauth2_config.profile_url)
            .bearer_auth(&access_token)
            .header("User-Agent", "rcdir")
            .send()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        if !profile_response.status().is_success() {
            return Err(AuthError::ProfileFetch(format!(
                "HTTP {}",
                profile_response.status()
            )));
        }

        let profile: RecurseProfile = profile_response
            .json()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        Ok(profile.into_identity(access_token))
    }
}
