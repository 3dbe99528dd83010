use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A directory member. `id` is issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub image: Option<String>,
    pub batch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn parse_timestamp(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    use sqlx::Row;

    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for User {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        Ok(User {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            image: row.try_get("image")?,
            batch: row.try_get("batch")?,
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub service_id: i64,
    pub uri: String,
    pub mobile_uri: Option<String>,
}

/// An account joined with its service, as listed on a user's page.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserAccount {
    pub id: i64,
    pub user_id: i64,
    pub service_name: String,
    pub service_url: String,
    pub uri: String,
    pub mobile_uri: Option<String>,
}

/// An account joined with its owner, as listed on a service's page.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceAccount {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub uri: String,
    pub mobile_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpsertUser {
    pub id: i64,
    pub name: String,
    pub image: Option<String>,
    pub batch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub user_id: i64,
    pub service_id: i64,
    pub uri: String,
    pub mobile_uri: Option<String>,
}

/// What the identity provider tells us about the person who just logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub uid: i64,
    pub token: String,
    pub name: String,
    pub image: Option<String>,
    pub batch: Option<String>,
}
