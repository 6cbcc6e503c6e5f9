use anyhow::{bail, Context};
use argon2::Params;
use jsonwebtoken::Algorithm;
use time::{Duration, OffsetDateTime};

/// Upper bound on the configured token lifetime (one year).
pub const MAX_TTL_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub ttl_minutes: i64,
}

/// Argon2id work factors.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("JWT_SECRET_KEY")
            .filter(|s| !s.is_empty())
            .context("JWT_SECRET_KEY must be set")?;

        let algorithm: Algorithm = lookup("JWT_ALGORITHM")
            .unwrap_or_else(|| "HS256".into())
            .parse()
            .context("JWT_ALGORITHM is not a known algorithm")?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            bail!("JWT_ALGORITHM must be an HMAC algorithm, got {:?}", algorithm);
        }

        let ttl_minutes = parse_or(&lookup, "ACCESS_TOKEN_EXPIRE_MINUTES", 60i64)?;
        if ttl_minutes <= 0 || ttl_minutes > MAX_TTL_MINUTES {
            bail!("ACCESS_TOKEN_EXPIRE_MINUTES must be between 1 and {MAX_TTL_MINUTES}");
        }
        OffsetDateTime::now_utc()
            .checked_add(Duration::minutes(ttl_minutes))
            .context("ACCESS_TOKEN_EXPIRE_MINUTES is out of range")?;

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: parse_or(&lookup, "PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&lookup, "PASSWORD_HASH_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&lookup, "PASSWORD_HASH_PARALLELISM", defaults.parallelism)?,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "APP_PORT", 8080u16)?,
            jwt: JwtConfig {
                secret,
                algorithm,
                ttl_minutes,
            },
            password,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = config_from(&[("JWT_SECRET_KEY", "s3cret")]).unwrap();
        assert_eq!(cfg.jwt.secret, "s3cret");
        assert_eq!(cfg.jwt.algorithm, Algorithm::HS256);
        assert_eq!(cfg.jwt.ttl_minutes, 60);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "0.0.0.0");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.password.memory_kib, Params::DEFAULT_M_COST);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET_KEY"));
    }

    #[test]
    fn reads_overrides() {
        let cfg = config_from(&[
            ("JWT_SECRET_KEY", "k"),
            ("JWT_ALGORITHM", "HS512"),
            ("ACCESS_TOKEN_EXPIRE_MINUTES", "15"),
            ("APP_PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/db"),
            ("PASSWORD_HASH_ITERATIONS", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.jwt.algorithm, Algorithm::HS512);
        assert_eq!(cfg.jwt.ttl_minutes, 15);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/db"));
        assert_eq!(cfg.password.iterations, 3);
    }

    #[test]
    fn rejects_asymmetric_algorithm() {
        let err = config_from(&[("JWT_SECRET_KEY", "k"), ("JWT_ALGORITHM", "RS256")]).unwrap_err();
        assert!(err.to_string().contains("HMAC"));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config_from(&[("JWT_SECRET_KEY", "k"), ("APP_PORT", "eighty")]).is_err());
        assert!(config_from(&[("JWT_SECRET_KEY", "k"), ("ACCESS_TOKEN_EXPIRE_MINUTES", "0")]).is_err());
    }

    #[test]
    fn rejects_oversized_ttl() {
        let err = config_from(&[
            ("JWT_SECRET_KEY", "k"),
            ("ACCESS_TOKEN_EXPIRE_MINUTES", "1000000000000"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("ACCESS_TOKEN_EXPIRE_MINUTES"));

        let max = MAX_TTL_MINUTES.to_string();
        let cfg = config_from(&[("JWT_SECRET_KEY", "k"), ("ACCESS_TOKEN_EXPIRE_MINUTES", max.as_str())]).unwrap();
        assert_eq!(cfg.jwt.ttl_minutes, MAX_TTL_MINUTES);
    }
}
