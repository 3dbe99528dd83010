use askama::Template;
use axum::http::StatusCode;

use crate::models::{Account, Service, ServiceAccount, User, UserAccount};

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub current_user: Option<User>,
    pub services: Vec<Service>,
    pub users: Vec<User>,
}

impl IndexTemplate {
    pub fn new(current_user: Option<User>, services: Vec<Service>, users: Vec<User>) -> Self {
        Self { current_user, services, users }
    }
}

#[derive(Template)]
#[template(path = "user.html")]
pub struct UserTemplate {
    pub current_user: Option<User>,
    pub user: User,
    pub accounts: Vec<UserAccount>,
    /// Edit and delete links are only shown to the owner.
    pub is_owner: bool,
}

impl UserTemplate {
    pub fn new(current_user: Option<User>, user: User, accounts: Vec<UserAccount>, viewer_id: i64) -> Self {
        let is_owner = user.id == viewer_id;
        Self { current_user, user, accounts, is_owner }
    }
}

#[derive(Template)]
#[template(path = "service.html")]
pub struct ServiceTemplate {
    pub current_user: Option<User>,
    pub service: Service,
    pub accounts: Vec<ServiceAccount>,
}

impl ServiceTemplate {
    pub fn new(current_user: Option<User>, service: Service, accounts: Vec<ServiceAccount>) -> Self {
        Self { current_user, service, accounts }
    }
}

#[derive(Template)]
#[template(path = "edit.html")]
pub struct EditAccountTemplate {
    pub current_user: Option<User>,
    pub account: Account,
    pub service: Service,
}

impl EditAccountTemplate {
    pub fn new(current_user: Option<User>, account: Account, service: Service) -> Self {
        Self { current_user, account, service }
    }
}

#[derive(Template)]
#[template(path = "add_account.html")]
pub struct AddAccountTemplate {
    pub current_user: Option<User>,
    pub services: Vec<Service>,
}

impl AddAccountTemplate {
    pub fn new(current_user: Option<User>, services: Vec<Service>) -> Self {
        Self { current_user, services }
    }
}

#[derive(Template)]
#[template(path = "add_service.html")]
pub struct AddServiceTemplate {
    pub current_user: Option<User>,
}

impl AddServiceTemplate {
    pub fn new(current_user: Option<User>) -> Self {
        Self { current_user }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub code: u16,
    pub reason: String,
}

impl ErrorTemplate {
    pub fn new(status: StatusCode) -> Self {
        Self {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Error").to_string(),
        }
    }
}
