use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    auth::{
        dto::{check_new_password, normalize_email, RegisterRequest, TokenResponse},
        error::AuthError,
        password::PasswordService,
        repo::{CreateError, CredentialStore},
        repo_types::{NewUser, User},
        token::{Claims, TokenService},
    },
    config::AppConfig,
};

/// Stand-in verified when the email is unknown, so both login failure
/// paths pay for one argon2 run.
const DUMMY_PASSWORD: &str = "dummy-password-for-unknown-accounts";

/// Registration, login and token issuance over a credential store.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    passwords: PasswordService,
    tokens: TokenService,
    dummy_hash: Arc<str>,
    #[cfg(test)]
    verifications: Arc<std::sync::atomic::AtomicUsize>,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, config: &AppConfig) -> anyhow::Result<Self> {
        Self::from_parts(
            store,
            PasswordService::new(&config.password)?,
            TokenService::new(&config.jwt),
        )
    }

    pub fn from_parts(
        store: Arc<dyn CredentialStore>,
        passwords: PasswordService,
        tokens: TokenService,
    ) -> anyhow::Result<Self> {
        let dummy_hash = passwords
            .hash(DUMMY_PASSWORD)
            .map_err(|e| anyhow::anyhow!("dummy hash: {e}"))?;
        Ok(Self {
            store,
            passwords,
            tokens,
            dummy_hash: dummy_hash.into(),
            #[cfg(test)]
            verifications: Default::default(),
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    async fn hash_blocking(&self, plain: String) -> Result<String, AuthError> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.hash(&plain))
            .await
            .context("hash task panicked")?
    }

    async fn verify_blocking(&self, plain: String, hash: String) -> Result<bool, AuthError> {
        #[cfg(test)]
        self.verifications
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let passwords = self.passwords.clone();
        let ok = tokio::task::spawn_blocking(move || passwords.verify(&plain, &hash))
            .await
            .context("verify task panicked")?;
        Ok(ok)
    }

    pub async fn register(&self, mut req: RegisterRequest) -> Result<User, AuthError> {
        req.validate()?;

        if self.store.find_by_email(&req.email).await?.is_some() {
            warn!(email = %req.email, "email already registered");
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hash_blocking(req.password).await?;
        let user = match self
            .store
            .create(NewUser {
                email: req.email,
                password_hash,
                full_name: req.full_name,
            })
            .await
        {
            Ok(user) => user,
            Err(CreateError::Duplicate(email)) => {
                warn!(email = %email, "email registered concurrently");
                return Err(AuthError::EmailTaken);
            }
            Err(CreateError::Other(e)) => return Err(e.into()),
        };

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Unknown email, wrong password and a deactivated account are
    /// indistinguishable to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);

        let Some(user) = self.store.find_by_email(&email).await? else {
            self.verify_blocking(password.to_owned(), self.dummy_hash.to_string())
                .await?;
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .verify_blocking(password.to_owned(), user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            warn!(user_id = %user.id, "login to inactive account");
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    pub fn issue_for_user(&self, user: User) -> Result<TokenResponse, AuthError> {
        let mut claims = Map::new();
        claims.insert("sub".into(), Value::String(user.email.clone()));
        claims.insert("user_id".into(), json!(user.id));

        let ttl = self.tokens.default_ttl();
        let access_token = self.tokens.issue_token(&claims, Some(ttl))?;
        Ok(TokenResponse {
            access_token,
            token_type: "bearer",
            expires_in: ttl.whole_seconds(),
            user: user.into(),
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, AuthError> {
        let user = self.authenticate(email, password).await?;
        self.issue_for_user(user)
    }

    /// Resolves the token subject to a live, active account.
    pub async fn current_user(&self, claims: &Claims) -> Result<User, AuthError> {
        let user = match claims.user_id() {
            Some(id) => self.store.find_by_id(id).await?,
            None => self.store.find_by_email(&claims.sub).await?,
        }
        .ok_or(AuthError::Unauthorized)?;
        if user.email != claims.sub {
            warn!(user_id = %user.id, "token subject does not match account");
            return Err(AuthError::Unauthorized);
        }
        if !user.is_active {
            return Err(AuthError::InactiveUser);
        }
        Ok(user)
    }

    pub async fn change_password(&self, user: &User, current: &str, new: &str) -> Result<(), AuthError> {
        check_new_password(new)?;
        if !self
            .verify_blocking(current.to_owned(), user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "change password with wrong current password");
            return Err(AuthError::InvalidCredentials);
        }

        let password_hash = self.hash_blocking(new.to_owned()).await?;
        self.store.update_password(user.id, &password_hash).await?;
        info!(user_id = %user.id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_service() -> (AuthService, Arc<crate::auth::repo::MemoryCredentialStore>) {
    let store = Arc::new(crate::auth::repo::MemoryCredentialStore::default());
    let svc = AuthService::from_parts(
        store.clone(),
        crate::auth::password::cheap(),
        crate::auth::token::test_service("test-secret"),
    )
    .expect("cheap params hash");
    (svc, store)
}
