use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{auth::error::AuthError, config::JwtConfig};

/// Keys the service writes itself; callers cannot override them.
const RESERVED_CLAIMS: [&str; 4] = ["sub", "iat", "exp", "jti"];

/// Claim set embedded in every access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        self.extra
            .get("user_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Issues and validates HMAC-signed JWTs.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    default_ttl: Duration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            algorithm: cfg.algorithm,
            default_ttl: Duration::seconds(cfg.ttl_minutes.saturating_mul(60)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn issue_token(&self, claims: &Map<String, Value>, ttl: Option<Duration>) -> Result<String, AuthError> {
        self.issue_token_at(claims, ttl, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_token_at(
        &self,
        claims: &Map<String, Value>,
        ttl: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<String, AuthError> {
        let sub = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::InvalidInput("claims must carry a subject".into()))?
            .to_owned();

        let ttl = ttl.unwrap_or(self.default_ttl);
        if !ttl.is_positive() {
            return Err(AuthError::InvalidInput("ttl must be positive".into()));
        }

        let mut extra = claims.clone();
        for key in RESERVED_CLAIMS {
            extra.remove(key);
        }

        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| AuthError::InvalidInput("ttl is out of range".into()))?;

        let jti = Uuid::new_v4();
        let full = Claims {
            sub,
            exp: expires_at.unix_timestamp(),
            iat: Some(now.unix_timestamp()),
            jti: Some(jti),
            extra,
        };
        let token = encode(&Header::new(self.algorithm), &full, &self.encoding)
            .map_err(|e| anyhow::anyhow!("jwt encode: {e}"))?;
        debug!(%jti, exp = full.exp, "jwt signed");
        Ok(token)
    }

    /// Every failure (bad shape, bad signature, missing subject, expiry)
    /// yields `None`.
    pub fn validate_token(&self, token: &str) -> Option<Claims> {
        self.validate_token_at(token, OffsetDateTime::now_utc())
    }

    pub(crate) fn validate_token_at(&self, token: &str, now: OffsetDateTime) -> Option<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, "jwt rejected");
                return None;
            }
        };

        if claims.sub.is_empty() {
            debug!(jti = ?claims.jti, "jwt rejected: empty subject");
            return None;
        }
        // Valid strictly before exp; no clock skew allowance.
        if now.unix_timestamp() >= claims.exp {
            debug!(jti = ?claims.jti, exp = claims.exp, "jwt rejected: expired");
            return None;
        }
        Some(claims)
    }
}

#[cfg(test)]
pub(crate) fn test_service(secret: &str) -> TokenService {
    TokenService::new(&JwtConfig {
        secret: secret.into(),
        algorithm: Algorithm::HS256,
        ttl_minutes: 60,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn subject(sub: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("sub".into(), json!(sub));
        m
    }

    #[test]
    fn issue_then_validate_returns_subject() {
        let svc = test_service("dev-secret");
        let token = svc.issue_token(&subject("u@example.com"), None).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = svc.validate_token(&token).expect("fresh token is valid");
        assert_eq!(claims.sub, "u@example.com");
        assert_eq!(claims.exp - claims.iat.unwrap(), 3600);
    }

    #[test]
    fn explicit_ttl_sets_expiry() {
        let svc = test_service("dev-secret");
        let now = datetime!(2026-03-01 12:00:00 UTC);
        let token = svc
            .issue_token_at(&subject("u@example.com"), Some(Duration::seconds(3600)), now)
            .unwrap();

        let claims = svc.validate_token_at(&token, now).unwrap();
        assert_eq!(claims.sub, "u@example.com");
        assert_eq!(claims.iat, Some(now.unix_timestamp()));
        assert_eq!(claims.exp, now.unix_timestamp() + 3600);
    }

    #[test]
    fn expiry_boundary_is_exact() {
        let svc = test_service("dev-secret");
        let issued = datetime!(2026-03-01 12:00:00 UTC);
        let token = svc
            .issue_token_at(&subject("u@example.com"), Some(Duration::seconds(1)), issued)
            .unwrap();

        assert!(svc.validate_token_at(&token, issued).is_some());
        assert!(svc
            .validate_token_at(&token, issued + Duration::milliseconds(500))
            .is_some());
        assert!(svc.validate_token_at(&token, issued + Duration::seconds(1)).is_none());
        assert!(svc.validate_token_at(&token, issued + Duration::seconds(2)).is_none());
    }

    #[test]
    fn malformed_and_empty_tokens_are_invalid() {
        let svc = test_service("dev-secret");
        assert!(svc.validate_token("").is_none());
        assert!(svc.validate_token("invalid.jwt.token").is_none());
        assert!(svc.validate_token("not-even-dotted").is_none());
    }

    #[test]
    fn foreign_secret_is_invalid() {
        let ours = test_service("secret-a");
        let theirs = test_service("secret-b");
        let token = theirs.issue_token(&subject("u@example.com"), None).unwrap();
        assert!(ours.validate_token(&token).is_none());
    }

    #[test]
    fn foreign_algorithm_is_invalid() {
        let hs256 = test_service("shared");
        let hs512 = TokenService::new(&JwtConfig {
            secret: "shared".into(),
            algorithm: Algorithm::HS512,
            ttl_minutes: 60,
        });
        let token = hs512.issue_token(&subject("u@example.com"), None).unwrap();
        assert!(hs512.validate_token(&token).is_some());
        assert!(hs256.validate_token(&token).is_none());
    }

    #[test]
    fn tampered_claims_break_signature() {
        let svc = test_service("dev-secret");
        let token = svc.issue_token(&subject("u@example.com"), None).unwrap();
        let other = svc.issue_token(&subject("admin@example.com"), None).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);
        assert!(svc.validate_token(&forged).is_none());
    }

    #[test]
    fn missing_subject_is_invalid() {
        #[derive(Serialize)]
        struct NoSub {
            exp: i64,
        }
        let svc = test_service("dev-secret");
        let exp = OffsetDateTime::now_utc().unix_timestamp() + 600;
        let token = encode(
            &Header::new(Algorithm::HS256),
            &NoSub { exp },
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert!(svc.validate_token(&token).is_none());
    }

    #[test]
    fn issue_requires_subject() {
        let svc = test_service("dev-secret");
        assert!(matches!(
            svc.issue_token(&Map::new(), None),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            svc.issue_token(&subject(""), None),
            Err(AuthError::InvalidInput(_))
        ));
        let mut numeric = Map::new();
        numeric.insert("sub".into(), json!(42));
        assert!(svc.issue_token(&numeric, None).is_err());
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let svc = test_service("dev-secret");
        assert!(svc
            .issue_token(&subject("u@example.com"), Some(Duration::ZERO))
            .is_err());
    }

    #[test]
    fn extra_claims_survive_and_reserved_are_overwritten() {
        let svc = test_service("dev-secret");
        let user_id = Uuid::new_v4();
        let now = datetime!(2026-03-01 12:00:00 UTC);

        let mut claims = subject("u@example.com");
        claims.insert("user_id".into(), json!(user_id.to_string()));
        claims.insert("exp".into(), json!(i64::MAX));
        claims.insert("iat".into(), json!(0));

        let token = svc
            .issue_token_at(&claims, Some(Duration::seconds(60)), now)
            .unwrap();
        let decoded = svc.validate_token_at(&token, now).unwrap();
        assert_eq!(decoded.user_id(), Some(user_id));
        assert_eq!(decoded.exp, now.unix_timestamp() + 60);
        assert_eq!(decoded.iat, Some(now.unix_timestamp()));
        assert!(!decoded.extra.contains_key("exp"));
    }

    #[test]
    fn each_token_gets_its_own_id() {
        let svc = test_service("dev-secret");
        let a = svc.issue_token(&subject("u@example.com"), None).unwrap();
        let b = svc.issue_token(&subject("u@example.com"), None).unwrap();
        let ja = svc.validate_token(&a).unwrap().jti;
        let jb = svc.validate_token(&b).unwrap().jti;
        assert!(ja.is_some());
        assert_ne!(ja, jb);
    }

    #[test]
    fn oversized_ttl_is_an_error_not_a_panic() {
        let svc = test_service("dev-secret");
        let err = svc
            .issue_token(&subject("u@example.com"), Some(Duration::MAX))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput(_)));

        let huge_default = TokenService::new(&JwtConfig {
            secret: "dev-secret".into(),
            algorithm: Algorithm::HS256,
            ttl_minutes: 1_000_000_000_000,
        });
        assert!(matches!(
            huge_default.issue_token(&subject("u@example.com"), None),
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[test]
    fn token_with_only_subject_and_expiry_is_valid() {
        #[derive(Serialize)]
        struct Minimal<'a> {
            sub: &'a str,
            exp: i64,
        }
        let svc = test_service("dev-secret");
        let now = datetime!(2026-03-01 12:00:00 UTC);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Minimal {
                sub: "u@example.com",
                exp: now.unix_timestamp() + 60,
            },
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();

        let claims = svc.validate_token_at(&token, now).unwrap();
        assert_eq!(claims.sub, "u@example.com");
        assert_eq!(claims.iat, None);
        assert_eq!(claims.jti, None);
    }
}
