use std::sync::Arc;

use anyhow::Context;
use tracing::warn;

use crate::{
    auth::{
        repo::{CredentialStore, MemoryCredentialStore, PgCredentialStore},
        revocation::RevocationList,
        services::AuthService,
    },
    config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub revoked: RevocationList,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn CredentialStore> = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;

                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(PgCredentialStore::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; credentials are kept in memory and lost on restart");
                Arc::new(MemoryCredentialStore::default())
            }
        };

        Ok(Self::from_parts(AuthService::new(store, &config)?))
    }

    pub fn from_parts(auth: AuthService) -> Self {
        Self {
            auth,
            revoked: RevocationList::default(),
        }
    }

    #[cfg(test)]
    pub fn fake() -> (Self, Arc<MemoryCredentialStore>) {
        use crate::config::{JwtConfig, PasswordConfig};

        let config = AppConfig {
            database_url: None,
            host: "127.0.0.1".into(),
            port: 0,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                algorithm: jsonwebtoken::Algorithm::HS256,
                ttl_minutes: 60,
            },
            password: PasswordConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        };
        let store = Arc::new(MemoryCredentialStore::default());
        let auth = AuthService::new(store.clone(), &config).expect("fake config is valid");
        (Self::from_parts(auth), store)
    }
}
