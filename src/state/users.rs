use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

const USER_COLUMNS: &str = "id, email, name, role, hashed_password, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("Email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for UserStoreError {
    fn from(e: sqlx::Error) -> Self {
        let duplicate = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if duplicate {
            UserStoreError::DuplicateEmail
        } else {
            UserStoreError::Db(e)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            role: row.try_get("role")?,
            hashed_password: row.try_get("hashed_password")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: String,
    pub hashed_password: String,
}

/// Partial update; `None` fields are left as they are.
#[derive(Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    pub hashed_password: Option<String>,
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new user. The email column is unique, so two concurrent
    /// creates for one address leave exactly one row.
    pub async fn create(&self, new: NewUser) -> Result<User, UserStoreError> {
        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: new.email,
            name: new.name,
            role: new.role,
            hashed_password: new.hashed_password,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO users (id, email, name, role, hashed_password, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.role)
        .bind(&user.hashed_password)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(User::from_row).transpose()?)
    }

    pub async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(User::from_row).transpose()?)
    }

    /// Oldest first, at most `limit` users.
    pub async fn list(&self, limit: i64) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC, rowid ASC LIMIT ?",
            USER_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let users = rows.iter().map(User::from_row).collect::<Result<_, _>>()?;
        Ok(users)
    }

    /// Apply `changes` and bump `updated_at`. `None` when the user is gone.
    pub async fn update(
        &self,
        id: &str,
        changes: UserChanges,
    ) -> Result<Option<User>, UserStoreError> {
        let result = sqlx::query(
            "UPDATE users SET
                email = COALESCE(?, email),
                name = COALESCE(?, name),
                hashed_password = COALESCE(?, hashed_password),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(changes.email)
        .bind(changes.name)
        .bind(changes.hashed_password)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(User::from_row).transpose()?)
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
