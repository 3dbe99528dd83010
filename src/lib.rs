pub mod auth;
pub mod config;
pub mod database;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod models;
pub mod session;
pub mod templates;

pub use config::{Config, ConfigError};
pub use error::{AppError, AuthError};
pub use database::{AccountRepository, Database, ServiceRepository, UserRepository};
pub use directory::{AccountManager, ServiceDirectory, UserDirectory};
pub use auth::{AuthService, OAuth2Config, LOGIN_PATH, PROVIDER};
pub use session::{auth_gate, is_exempt, CurrentUser, GateOutcome, SessionExt, SessionManager};
pub use handlers::{build_router, AppState};
