use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::repo_types::{NewUser, PasswordChange, ResetTicket, Role, User, UserChanges};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint hit; carries the offending value.
    #[error("duplicate value: {0}")]
    Duplicate(String),
    #[error("corrupt user row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Credential store. Inactive users are invisible to every lookup and update.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Atomic partial update with no document validation.
    async fn update_user(&self, id: Uuid, changes: UserChanges)
        -> Result<Option<User>, StoreError>;

    /// User whose outstanding reset ticket has this digest and is still live at `now`.
    async fn find_user_by_reset_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;

    /// Conditional write: only succeeds while the ticket still matches and is live,
    /// and sets the password while clearing the ticket. At most one caller wins.
    async fn consume_reset(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password: PasswordChange,
    ) -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}

const USER_COLUMNS: &str = "id, name, email, photo, role, password_hash, password_changed_at, \
     password_reset_token, password_reset_expires, active, created_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: Option<String>,
    email: String,
    photo: Option<String>,
    role: String,
    password_hash: String,
    password_changed_at: Option<OffsetDateTime>,
    password_reset_token: Option<String>,
    password_reset_expires: Option<OffsetDateTime>,
    active: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let reset = match (row.password_reset_token, row.password_reset_expires) {
            (Some(token_hash), Some(expires_at)) => Some(ResetTicket {
                token_hash,
                expires_at,
            }),
            (None, None) => None,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "user {} has a partial reset ticket",
                    row.id
                )))
            }
        };
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            photo: row.photo,
            role,
            password_hash: row.password_hash,
            password_changed_at: row.password_changed_at,
            reset,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

fn map_unique(e: sqlx::Error, value: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(value.to_string())
        }
        _ => StoreError::Database(e),
    }
}

fn into_user(row: Option<UserRow>) -> Result<Option<User>, StoreError> {
    row.map(User::try_from).transpose()
}

/// `UPDATE ... RETURNING` for the fields present in `changes`. Callers skip
/// empty change sets.
fn update_query(id: Uuid, changes: UserChanges) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET ");
    {
        let mut set = qb.separated(", ");
        if let Some(name) = changes.name {
            set.push("name = ").push_bind_unseparated(name);
        }
        if let Some(email) = changes.email {
            set.push("email = ").push_bind_unseparated(email);
        }
        if let Some(photo) = changes.photo {
            set.push("photo = ").push_bind_unseparated(photo);
        }
        if let Some(role) = changes.role {
            set.push("role = ").push_bind_unseparated(role.as_str());
        }
        if let Some(password) = changes.password {
            set.push("password_hash = ")
                .push_bind_unseparated(password.hash);
            set.push("password_changed_at = ")
                .push_bind_unseparated(password.changed_at);
        }
        if let Some(reset) = changes.reset {
            let (token_hash, expires_at) = match reset {
                Some(t) => (Some(t.token_hash), Some(t.expires_at)),
                None => (None, None),
            };
            set.push("password_reset_token = ")
                .push_bind_unseparated(token_hash);
            set.push("password_reset_expires = ")
                .push_bind_unseparated(expires_at);
        }
        if let Some(active) = changes.active {
            set.push("active = ").push_bind_unseparated(active);
        }
    }
    qb.push(" WHERE id = ")
        .push_bind(id)
        .push(" AND active RETURNING ")
        .push(USER_COLUMNS);
    qb
}

/// Postgres-backed credential store.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        info!("database ready");
        Ok(Self::new(db))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND active"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, email, photo, role, password_hash, password_changed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.photo)
        .bind(user.role.as_str())
        .bind(&user.password.hash)
        .bind(user.password.changed_at)
        .bind(user.created_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique(e, &user.email))?;
        User::try_from(row)
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<User>, StoreError> {
        if changes.is_empty() {
            return self.find_user_by_id(id).await;
        }
        let email = changes.email.clone().unwrap_or_default();
        let mut qb = update_query(id, changes);
        let row = qb
            .build_query_as::<UserRow>()
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_unique(e, &email))?;
        into_user(row)
    }

    async fn find_user_by_reset_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE password_reset_token = $1 AND password_reset_expires > $2 AND active
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn consume_reset(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password: PasswordChange,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET password_hash = $1,
                password_changed_at = $2,
                password_reset_token = NULL,
                password_reset_expires = NULL
            WHERE password_reset_token = $3 AND password_reset_expires > $4 AND active
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(password.hash)
        .bind(password.changed_at)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE active ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }
}
