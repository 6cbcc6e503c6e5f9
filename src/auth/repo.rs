use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("email {0} already stored")]
    Duplicate(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence boundary for credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create(&self, new: NewUser) -> Result<User, CreateError>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, full_name, is_active, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, full_name, is_active, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> Result<User, CreateError> {
        let res = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, full_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, full_name, is_active, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.full_name)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(CreateError::Duplicate(new.email))
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .context("update password")?;
        anyhow::ensure!(res.rows_affected() == 1, "user {id} not found");
        Ok(())
    }
}

/// Process-local store, keyed by email.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, CreateError> {
        let mut users = self.users.write().await;
        if users.contains_key(&new.email) {
            return Err(CreateError::Duplicate(new.email));
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            full_name: new.full_name,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.email.clone(), user.clone());
        Ok(user)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .values_mut()
            .find(|u| u.id == id)
            .with_context(|| format!("user {id} not found"))?;
        user.password_hash = password_hash.to_owned();
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[cfg(test)]
impl MemoryCredentialStore {
    pub(crate) async fn set_active(&self, email: &str, active: bool) {
        if let Some(u) = self.users.write().await.get_mut(email) {
            u.is_active = active;
        }
    }
}
