//! The directory's rules: who may touch which account, how service names and
//! URLs are normalized, and which submissions are rejected.

use crate::{
    database::{AccountRepository, ServiceRepository, UserRepository},
    error::AppError,
    models::{
        Account, CreateAccount, ProviderIdentity, Service, ServiceAccount, UpsertUser, User,
        UserAccount,
    },
};

/// Service names are unique regardless of case and surrounding whitespace.
pub fn normalize_service_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Prefixes `http://` when the URL carries no scheme separator.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.contains("//") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

const UNSAFE_SCHEMES: [&str; 3] = ["javascript:", "data:", "vbscript:"];

/// Rejects links a browser would run or inline instead of navigating to.
/// Whitespace and control characters are ignored the way browsers ignore them in a scheme.
pub fn check_link(field: &str, link: &str) -> Result<(), AppError> {
    let scheme = link
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();

    if UNSAFE_SCHEMES.iter().any(|unsafe_scheme| scheme.starts_with(unsafe_scheme)) {
        return Err(AppError::BadRequest(format!("{} uses a disallowed scheme", field)));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: UserRepository,
}

impl UserDirectory {
    pub fn new(users: UserRepository) -> Self {
        Self { users }
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        self.users.list_all().await
    }

    pub async fn get_user(&self, id: i64) -> Result<User, AppError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))
    }

    /// The session may outlive the record, so a missing user is not an error here.
    pub async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
        self.users.find_by_id(id).await
    }

    pub async fn record_login(&self, identity: &ProviderIdentity) -> Result<User, AppError> {
        let user = self
            .users
            .upsert(UpsertUser {
                id: identity.uid,
                name: identity.name.clone(),
                image: identity.image.clone(),
                batch: identity.batch.clone(),
            })
            .await?;

        tracing::info!("Recorded login for user {} ({})", user.name, user.id);
        Ok(user)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceDirectory {
    services: ServiceRepository,
}

impl ServiceDirectory {
    pub fn new(services: ServiceRepository) -> Self {
        Self { services }
    }

    pub async fn list_services(&self) -> Result<Vec<Service>, AppError> {
        self.services.list_all().await
    }

    pub async fn get_service_by_name(&self, name: &str) -> Result<Service, AppError> {
        let name = normalize_service_name(name);
        self.services
            .find_by_name(&name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("service {}", name)))
    }

    /// Finds or creates the service by normalized name and stores `url` on it,
    /// overwriting the URL of an existing service.
    pub async fn create_service(&self, name: &str, url: &str) -> Result<Service, AppError> {
        let name = normalize_service_name(name);
        if name.is_empty() {
            return Err(AppError::BadRequest("service name is empty".to_string()));
        }

        let url = normalize_url(url);
        check_link("url", &url)?;
        let mut service = self.services.find_or_create(&name, &url).await?;
        if service.url != url {
            self.services.update_url(service.id, &url).await?;
            service.url = url;
        }

        tracing::info!("Saved service {} -> {}", service.name, service.url);
        Ok(service)
    }
}

#[derive(Debug, Clone)]
pub struct AccountManager {
    accounts: AccountRepository,
    services: ServiceRepository,
}

impl AccountManager {
    pub fn new(accounts: AccountRepository, services: ServiceRepository) -> Self {
        Self { accounts, services }
    }

    pub async fn accounts_for_user(&self, user_id: i64) -> Result<Vec<UserAccount>, AppError> {
        self.accounts.list_for_user(user_id).await
    }

    pub async fn accounts_for_service(&self, service_id: i64) -> Result<Vec<ServiceAccount>, AppError> {
        self.accounts.list_for_service(service_id).await
    }

    async fn owned_account(&self, account_id: i64, requester_id: i64) -> Result<Account, AppError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))?;

        if account.user_id != requester_id {
            return Err(AppError::Forbidden(format!(
                "user {} does not own account {}",
                requester_id, account_id
            )));
        }

        Ok(account)
    }

    pub async fn get_account_for_edit(
        &self,
        account_id: i64,
        requester_id: i64,
    ) -> Result<(Account, Service), AppError> {
        let account = self.owned_account(account_id, requester_id).await?;
        let service = self
            .services
            .find_by_id(account.service_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("service {}", account.service_id)))?;

        Ok((account, service))
    }

    /// Rewrites the account's links. The submitted service name must be
    /// non-blank but does not re-link the account.
    pub async fn update_account(
        &self,
        account_id: i64,
        requester_id: i64,
        service_field: &str,
        uri: &str,
        mobile_uri: Option<String>,
    ) -> Result<Account, AppError> {
        let mut account = self.owned_account(account_id, requester_id).await?;

        if normalize_service_name(service_field).is_empty() {
            return Err(AppError::BadRequest("service name is empty".to_string()));
        }

        let uri = uri.trim();
        let mobile_uri = non_blank(mobile_uri);
        check_link("uri", uri)?;
        if let Some(mobile_uri) = &mobile_uri {
            check_link("mobile_uri", mobile_uri)?;
        }

        self.accounts
            .update_uris(account.id, uri, mobile_uri.as_deref())
            .await?;

        tracing::info!("User {} updated account {}", requester_id, account.id);
        account.uri = uri.to_string();
        account.mobile_uri = mobile_uri;
        Ok(account)
    }

    pub async fn delete_account(&self, account_id: i64, requester_id: i64) -> Result<Account, AppError> {
        let account = self.owned_account(account_id, requester_id).await?;
        self.accounts.delete(account.id).await?;

        tracing::info!("User {} deleted account {}", requester_id, account.id);
        Ok(account)
    }

    /// Creates an account for `requester` on the service whose id was submitted.
    /// A blank, non-numeric or unknown service id is rejected before anything is written.
    pub async fn create_account(
        &self,
        requester: Option<&User>,
        service_id: Option<&str>,
        uri: &str,
        mobile_uri: Option<String>,
    ) -> Result<Account, AppError> {
        let service_id = service_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::BadRequest("service id is missing".to_string()))?;

        let service_id: i64 = service_id
            .parse()
            .map_err(|_| AppError::BadRequest(format!("invalid service id {}", service_id)))?;

        let service = self
            .services
            .find_by_id(service_id)
            .await?
            .ok_or_else(|| AppError::BadRequest(format!("unknown service id {}", service_id)))?;

        let requester = requester
            .ok_or_else(|| AppError::Forbidden("session user no longer exists".to_string()))?;

        let uri = uri.trim();
        let mobile_uri = non_blank(mobile_uri);
        check_link("uri", uri)?;
        if let Some(mobile_uri) = &mobile_uri {
            check_link("mobile_uri", mobile_uri)?;
        }

        let account = self
            .accounts
            .create(CreateAccount {
                user_id: requester.id,
                service_id: service.id,
                uri: uri.to_string(),
                mobile_uri,
            })
            .await?;

        tracing::info!(
            "User {} added a {} account ({})",
            requester.id, service.name, account.id
        );
        Ok(account)
    }
}
