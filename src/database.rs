use sqlx::{sqlite::SqlitePool, migrate::MigrateDatabase, Sqlite};
use crate::{
    error::AppError,
    models::{Account, CreateAccount, Service, ServiceAccount, UpsertUser, User, UserAccount},
};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, AppError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            tracing::info!("Creating database {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;

        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_all(&self) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, name, image, batch, created_at, updated_at FROM users ORDER BY name"
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, image, batch, created_at, updated_at FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Inserts the user, or refreshes name, image and batch when the id is known.
    pub async fn upsert(&self, user: UpsertUser) -> Result<User, AppError> {
        let now = now();

        sqlx::query(
            "INSERT INTO users (id, name, image, batch, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                image = excluded.image,
                batch = excluded.batch,
                updated_at = excluded.updated_at"
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.image)
        .bind(&user.batch)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let stored = sqlx::query_as::<_, User>(
            "SELECT id, name, image, batch, created_at, updated_at FROM users WHERE id = ?"
        )
        .bind(user.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceRepository {
    pool: SqlitePool,
}

impl ServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_all(&self) -> Result<Vec<Service>, AppError> {
        let services = sqlx::query_as::<_, Service>(
            "SELECT id, name, url FROM services ORDER BY name"
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(services)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Service>, AppError> {
        let service = sqlx::query_as::<_, Service>(
            "SELECT id, name, url FROM services WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(service)
    }

    /// Exact match; callers normalize the name first.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Service>, AppError> {
        let service = sqlx::query_as::<_, Service>(
            "SELECT id, name, url FROM services WHERE name = ?"
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(service)
    }

    /// Looks the service up by name and inserts it with `url` when absent.
    ///
    /// Two concurrent creators can both miss the lookup; the loser hits the
    /// `UNIQUE(name)` constraint and reads back the winner's row instead.
    pub async fn find_or_create(&self, name: &str, url: &str) -> Result<Service, AppError> {
        if let Some(service) = self.find_by_name(name).await? {
            return Ok(service);
        }

        let now = now();
        let inserted = sqlx::query(
            "INSERT INTO services (name, url, created_at, updated_at) VALUES (?, ?, ?, ?)"
        )
        .bind(name)
        .bind(url)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) => {
                let service_id = result.last_insert_rowid();
                tracing::debug!("Created service {} with ID {}", name, service_id);
                Ok(Service {
                    id: service_id,
                    name: name.to_string(),
                    url: url.to_string(),
                })
            }
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                tracing::debug!("Service {} was created concurrently, re-reading it", name);
                let service = sqlx::query_as::<_, Service>(
                    "SELECT id, name, url FROM services WHERE name = ?"
                )
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
                Ok(service)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_url(&self, id: i64, url: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE services SET url = ?, updated_at = ? WHERE id = ?")
            .bind(url)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, user_id, service_id, uri, mobile_uri FROM accounts WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn create(&self, account: CreateAccount) -> Result<Account, AppError> {
        let now = now();

        let result = sqlx::query(
            "INSERT INTO accounts (user_id, service_id, uri, mobile_uri, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(account.user_id)
        .bind(account.service_id)
        .bind(&account.uri)
        .bind(&account.mobile_uri)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Account {
            id: result.last_insert_rowid(),
            user_id: account.user_id,
            service_id: account.service_id,
            uri: account.uri,
            mobile_uri: account.mobile_uri,
        })
    }

    /// Only the links change; owner and service stay as created.
    pub async fn update_uris(
        &self,
        id: i64,
        uri: &str,
        mobile_uri: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET uri = ?, mobile_uri = ?, updated_at = ? WHERE id = ?")
            .bind(uri)
            .bind(mobile_uri)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<UserAccount>, AppError> {
        let accounts = sqlx::query_as::<_, UserAccount>(
            "SELECT a.id, a.user_id, s.name AS service_name, s.url AS service_url, a.uri, a.mobile_uri
             FROM accounts a
             JOIN services s ON s.id = a.service_id
             WHERE a.user_id = ?
             ORDER BY s.name"
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    pub async fn list_for_service(&self, service_id: i64) -> Result<Vec<ServiceAccount>, AppError> {
        let accounts = sqlx::query_as::<_, ServiceAccount>(
            "SELECT a.id, a.user_id, u.name AS user_name, a.uri, a.mobile_uri
             FROM accounts a
             JOIN users u ON u.id = a.user_id
             WHERE a.service_id = ?
             ORDER BY u.name"
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let database_url = format!("sqlite:{}", dir.path().join("test.db").to_str().unwrap());
        let db = Database::new(&database_url).await.unwrap();
        (db, dir)
    }

    fn upsert_user(id: i64, name: &str, batch: &str) -> UpsertUser {
        UpsertUser {
            id,
            name: name.to_string(),
            image: Some(format!("https://example.com/{}.png", id)),
            batch: Some(batch.to_string()),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates_user() {
        let (db, _dir) = setup_test_db().await;
        let repo = UserRepository::new(db.pool().clone());

        let created = repo.upsert(upsert_user(42, "Ada Lovelace", "W1'24")).await.unwrap();
        assert_eq!(created.id, 42);
        assert_eq!(created.batch, Some("W1'24".to_string()));

        let updated = repo.upsert(upsert_user(42, "Ada King", "S2'24")).await.unwrap();
        assert_eq!(updated.id, 42);
        assert_eq!(updated.name, "Ada King");
        assert_eq!(updated.batch, Some("S2'24".to_string()));
        assert_eq!(updated.created_at, created.created_at);

        let users = repo.list_all().await.unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_find_nonexistent_user() {
        let (db, _dir) = setup_test_db().await;
        let repo = UserRepository::new(db.pool().clone());

        assert!(repo.find_by_id(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_or_create_service_is_idempotent() {
        let (db, _dir) = setup_test_db().await;
        let repo = ServiceRepository::new(db.pool().clone());

        let first = repo.find_or_create("github", "https://github.com").await.unwrap();
        let second = repo.find_or_create("github", "https://ignored.example").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.url, "https://github.com");
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_service_name_is_unique() {
        let (db, _dir) = setup_test_db().await;
        let repo = ServiceRepository::new(db.pool().clone());
        repo.find_or_create("twitter", "https://twitter.com").await.unwrap();

        let result = sqlx::query(
            "INSERT INTO services (name, url, created_at, updated_at) VALUES ('twitter', 'x', 'now', 'now')"
        )
        .execute(db.pool())
        .await;

        match result {
            Err(sqlx::Error::Database(e)) => assert!(e.is_unique_violation()),
            other => panic!("expected unique violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_service_url() {
        let (db, _dir) = setup_test_db().await;
        let repo = ServiceRepository::new(db.pool().clone());

        let service = repo.find_or_create("github", "http://github.com").await.unwrap();
        repo.update_url(service.id, "https://github.com").await.unwrap();

        let found = repo.find_by_name("github").await.unwrap().unwrap();
        assert_eq!(found.url, "https://github.com");
    }

    #[tokio::test]
    async fn test_account_lifecycle() {
        let (db, _dir) = setup_test_db().await;
        let users = UserRepository::new(db.pool().clone());
        let services = ServiceRepository::new(db.pool().clone());
        let accounts = AccountRepository::new(db.pool().clone());

        users.upsert(upsert_user(1, "Grace", "F1'23")).await.unwrap();
        let github = services.find_or_create("github", "https://github.com").await.unwrap();

        let account = accounts
            .create(CreateAccount {
                user_id: 1,
                service_id: github.id,
                uri: "https://github.com/grace".to_string(),
                mobile_uri: None,
            })
            .await
            .unwrap();

        let by_user = accounts.list_for_user(1).await.unwrap();
        assert_eq!(by_user.len(), 1);
        assert_eq!(by_user[0].service_name, "github");

        let by_service = accounts.list_for_service(github.id).await.unwrap();
        assert_eq!(by_service.len(), 1);
        assert_eq!(by_service[0].user_name, "Grace");

        accounts
            .update_uris(account.id, "https://github.com/hopper", Some("github://hopper"))
            .await
            .unwrap();
        let updated = accounts.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(updated.uri, "https://github.com/hopper");
        assert_eq!(updated.mobile_uri, Some("github://hopper".to_string()));
        assert_eq!(updated.service_id, github.id);

        accounts.delete(account.id).await.unwrap();
        assert!(accounts.find_by_id(account.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_account_requires_existing_service() {
        let (db, _dir) = setup_test_db().await;
        let users = UserRepository::new(db.pool().clone());
        let accounts = AccountRepository::new(db.pool().clone());

        users.upsert(upsert_user(1, "Grace", "F1'23")).await.unwrap();

        let result = accounts
            .create(CreateAccount {
                user_id: 1,
                service_id: 999,
                uri: "https://example.com".to_string(),
                mobile_uri: None,
            })
            .await;

        assert!(result.is_err());
    }
}
