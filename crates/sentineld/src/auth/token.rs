//! HMAC-SHA256 signed bearer tokens.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use sentinel_config::JwtOptions;
use sentinel_context::Context;

use super::AUTH_TARGET;
use super::error::AuthError;
use super::revocation::RevocationStore;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject the token was issued to.
    pub sub: String,
    /// Role used for authorization.
    pub role: String,
    /// Issuer.
    pub iss: String,
    /// Issue time, seconds since the Unix epoch.
    pub iat: u64,
    /// Expiry time, seconds since the Unix epoch.
    pub exp: u64,
    /// Unique token id, used for revocation.
    pub jti: String,
}

/// A freshly signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    /// The encoded token.
    pub token: String,
    /// What it asserts.
    pub claims: Claims,
}

/// Issues, verifies, refreshes and revokes bearer tokens.
pub struct TokenAuthenticator {
    key: Vec<u8>,
    issuer: String,
    lifetime: Duration,
    max_refresh: Duration,
    revocations: Arc<dyn RevocationStore>,
}

impl TokenAuthenticator {
    /// Builds an authenticator from validated options.
    #[must_use]
    pub fn new(options: &JwtOptions, revocations: Arc<dyn RevocationStore>) -> Self {
        Self {
            key: options.key.as_bytes().to_vec(),
            issuer: options.issuer.clone(),
            lifetime: options.expired,
            max_refresh: options.max_refresh,
            revocations,
        }
    }

    /// Name of the revocation backend in use.
    #[must_use]
    pub fn revocation_backend(&self) -> &'static str {
        self.revocations.backend()
    }

    /// Signs a token for `subject` acting as `role`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Key`] when the signing key is unusable.
    pub fn issue(&self, subject: &str, role: &str) -> Result<IssuedToken, AuthError> {
        self.issue_at(subject, role, unix_now())
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when the token is malformed, forged, expired,
    /// from another issuer or revoked.
    pub fn authenticate(&self, ctx: &Context, token: &str) -> Result<Claims, AuthError> {
        self.authenticate_at(ctx, token, unix_now())
    }

    /// Exchanges a token for a new one with a fresh id and revokes the old
    /// one.
    ///
    /// Expired tokens may be refreshed until `max-refresh` after their issue
    /// time. Failing to revoke the old token is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when the token is invalid, revoked or too old.
    pub fn refresh(&self, ctx: &Context, token: &str) -> Result<IssuedToken, AuthError> {
        self.refresh_at(ctx, token, unix_now())
    }

    /// Revokes `token` until its refresh window closes.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when the token is invalid or the store fails.
    pub fn revoke(&self, ctx: &Context, token: &str) -> Result<(), AuthError> {
        let claims = self.verify(token)?;
        self.revoke_claims(ctx, &claims, unix_now())
    }

    pub(crate) fn issue_at(
        &self,
        subject: &str,
        role: &str,
        now: u64,
    ) -> Result<IssuedToken, AuthError> {
        let claims = Claims {
            sub: subject.to_owned(),
            role: role.to_owned(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(self.lifetime.as_secs()),
            jti: token_id(subject, now),
        };
        let token = self.sign(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    pub(crate) fn authenticate_at(
        &self,
        ctx: &Context,
        token: &str,
        now: u64,
    ) -> Result<Claims, AuthError> {
        let claims = self.verify(token)?;
        if now >= claims.exp {
            return Err(AuthError::Expired);
        }
        if self.revocations.is_revoked(ctx, &claims.jti)? {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    pub(crate) fn refresh_at(
        &self,
        ctx: &Context,
        token: &str,
        now: u64,
    ) -> Result<IssuedToken, AuthError> {
        let claims = self.verify(token)?;
        if self.revocations.is_revoked(ctx, &claims.jti)? {
            return Err(AuthError::Revoked);
        }
        if now > self.refresh_deadline(&claims) {
            return Err(AuthError::RefreshWindowClosed);
        }
        if let Err(error) = self.revoke_claims(ctx, &claims, now) {
            warn!(
                target: AUTH_TARGET,
                event = "refresh_revoke_failed",
                token_id = %claims.jti,
                error = %error,
                "failed to revoke old token during refresh"
            );
        }
        self.issue_at(&claims.sub, &claims.role, now)
    }

    const fn refresh_deadline(&self, claims: &Claims) -> u64 {
        claims.iat.saturating_add(self.max_refresh.as_secs())
    }

    fn revoke_claims(&self, ctx: &Context, claims: &Claims, now: u64) -> Result<(), AuthError> {
        let remaining = self.refresh_deadline(claims).saturating_sub(now);
        if remaining == 0 {
            return Ok(());
        }
        self.revocations
            .revoke(ctx, &claims.jti, Duration::from_secs(remaining))?;
        Ok(())
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.key).map_err(|error| AuthError::Key(error.to_string()))
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = Header {
            alg: String::from(ALGORITHM),
            typ: String::from("JWT"),
        };
        let header_segment = encode_json(&header)?;
        let payload_segment = encode_json(claims)?;
        let signing_input = format!("{header_segment}.{payload_segment}");
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Checks the signature and issuer, ignoring expiry.
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let (signing_input, signature_segment) = token
            .rsplit_once('.')
            .ok_or(AuthError::malformed("expected three segments"))?;
        let (header_segment, payload_segment) = signing_input
            .split_once('.')
            .ok_or(AuthError::malformed("expected three segments"))?;

        let header: Header = decode_json(header_segment)?;
        if header.alg != ALGORITHM {
            return Err(AuthError::malformed("unsupported signing algorithm"));
        }
        let signature = URL_SAFE_NO_PAD
            .decode(signature_segment)
            .map_err(|_| AuthError::malformed("signature is not base64url"))?;
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_json(payload_segment)?;
        if claims.iss != self.issuer {
            return Err(AuthError::WrongIssuer { issuer: claims.iss });
        }
        Ok(claims)
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenAuthenticator")
            .field("issuer", &self.issuer)
            .field("lifetime", &self.lifetime)
            .field("max_refresh", &self.max_refresh)
            .field("revocations", &self.revocations.backend())
            .finish_non_exhaustive()
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let bytes =
        serde_json::to_vec(value).map_err(|_| AuthError::malformed("claims are not encodable"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn decode_json<T>(segment: &str) -> Result<T, AuthError>
where
    T: for<'de> Deserialize<'de>,
{
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::malformed("segment is not base64url"))?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::malformed("segment is not valid JSON"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Unique per process and issue time; not a secret.
fn token_id(subject: &str, now: u64) -> String {
    let sequence = TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.subsec_nanos());
    let digest = Sha256::new()
        .chain_update(subject.as_bytes())
        .chain_update(now.to_be_bytes())
        .chain_update(nanos.to_be_bytes())
        .chain_update(sequence.to_be_bytes())
        .chain_update(std::process::id().to_be_bytes())
        .finalize();
    digest
        .iter()
        .take(16)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryRevocationStore;
    use crate::auth::error::RevocationError;
    use mockall::mock;
    use rstest::{fixture, rstest};

    const KEY: &str = "0123456789abcdef0123456789abcdef";
    const NOW: u64 = 1_700_000_000;

    mock! {
        Store {}
        impl RevocationStore for Store {
            fn backend(&self) -> &'static str;
            fn revoke(&self, ctx: &Context, token_id: &str, ttl: Duration) -> Result<(), RevocationError>;
            fn is_revoked(&self, ctx: &Context, token_id: &str) -> Result<bool, RevocationError>;
        }
    }

    fn options() -> JwtOptions {
        JwtOptions {
            key: KEY.into(),
            expired: Duration::from_secs(60),
            max_refresh: Duration::from_secs(600),
            ..JwtOptions::default()
        }
    }

    #[fixture]
    fn authenticator() -> TokenAuthenticator {
        TokenAuthenticator::new(&options(), Arc::new(MemoryRevocationStore::new()))
    }

    #[rstest]
    fn issued_tokens_authenticate(authenticator: TokenAuthenticator) {
        let ctx = Context::background();
        let issued = authenticator.issue_at("alice", "user", NOW).expect("issue");

        let claims = authenticator
            .authenticate_at(&ctx, &issued.token, NOW + 1)
            .expect("valid");

        assert_eq!(claims, issued.claims);
        assert_eq!(claims.exp, NOW + 60);
    }

    #[rstest]
    fn expired_tokens_are_rejected(authenticator: TokenAuthenticator) {
        let issued = authenticator.issue_at("alice", "user", NOW).expect("issue");

        let error = authenticator
            .authenticate_at(&Context::background(), &issued.token, NOW + 60)
            .expect_err("expired");

        assert!(matches!(error, AuthError::Expired));
    }

    #[rstest]
    fn tampered_claims_fail_the_signature(authenticator: TokenAuthenticator) {
        let issued = authenticator.issue_at("alice", "user", NOW).expect("issue");
        let forged_claims = Claims {
            role: String::from("admin"),
            ..issued.claims.clone()
        };
        let forged_payload = encode_json(&forged_claims).expect("encode");
        let mut segments: Vec<&str> = issued.token.split('.').collect();
        if let Some(payload) = segments.get_mut(1) {
            *payload = &forged_payload;
        }

        let error = authenticator
            .authenticate_at(&Context::background(), &segments.join("."), NOW)
            .expect_err("forged");

        assert!(matches!(error, AuthError::BadSignature));
    }

    #[rstest]
    fn other_keys_cannot_verify(authenticator: TokenAuthenticator) {
        let other = TokenAuthenticator::new(
            &JwtOptions {
                key: "fedcba9876543210fedcba9876543210".into(),
                ..options()
            },
            Arc::new(MemoryRevocationStore::new()),
        );
        let issued = other.issue_at("mallory", "admin", NOW).expect("issue");

        let error = authenticator
            .authenticate_at(&Context::background(), &issued.token, NOW)
            .expect_err("foreign");

        assert!(matches!(error, AuthError::BadSignature));
    }

    #[rstest]
    #[case::one_segment("abc")]
    #[case::garbage_header("!!.e30.sig")]
    fn malformed_tokens_are_rejected(authenticator: TokenAuthenticator, #[case] token: &str) {
        let error = authenticator
            .authenticate_at(&Context::background(), token, NOW)
            .expect_err("malformed");
        assert!(matches!(error, AuthError::Malformed { .. }), "{error}");
    }

    #[rstest]
    fn refresh_issues_a_new_id_and_revokes_the_old(authenticator: TokenAuthenticator) {
        let ctx = Context::background();
        let issued = authenticator.issue_at("alice", "user", NOW).expect("issue");

        let refreshed = authenticator
            .refresh_at(&ctx, &issued.token, NOW + 120)
            .expect("refresh after expiry");

        assert_ne!(refreshed.claims.jti, issued.claims.jti);
        assert_eq!(refreshed.claims.sub, "alice");
        let error = authenticator
            .refresh_at(&ctx, &issued.token, NOW + 121)
            .expect_err("old token revoked");
        assert!(matches!(error, AuthError::Revoked));
    }

    #[rstest]
    fn refresh_window_closes(authenticator: TokenAuthenticator) {
        let issued = authenticator.issue_at("alice", "user", NOW).expect("issue");

        let error = authenticator
            .refresh_at(&Context::background(), &issued.token, NOW + 601)
            .expect_err("too old");

        assert!(matches!(error, AuthError::RefreshWindowClosed));
    }

    #[rstest]
    fn revocation_lasts_until_the_refresh_deadline() {
        let mut store = MockStore::new();
        store.expect_backend().return_const("mock");
        store
            .expect_revoke()
            .withf(|_, _, ttl| *ttl == Duration::from_secs(590))
            .once()
            .returning(|_, _, _| Ok(()));
        let authenticator = TokenAuthenticator::new(&options(), Arc::new(store));
        let issued = authenticator.issue_at("alice", "user", NOW).expect("issue");

        authenticator
            .revoke_claims(&Context::background(), &issued.claims, NOW + 10)
            .expect("revoke");
    }

    #[rstest]
    fn store_failures_surface_from_authenticate() {
        let mut store = MockStore::new();
        store.expect_is_revoked().returning(|_, _| {
            Err(RevocationError::Unavailable {
                message: String::from("redis closed"),
            })
        });
        let authenticator = TokenAuthenticator::new(&options(), Arc::new(store));
        let issued = authenticator.issue_at("alice", "user", NOW).expect("issue");

        let error = authenticator
            .authenticate_at(&Context::background(), &issued.token, NOW)
            .expect_err("store down");

        assert!(matches!(error, AuthError::Revocation { .. }));
    }

    #[rstest]
    fn token_ids_are_unique() {
        assert_ne!(token_id("alice", NOW), token_id("alice", NOW));
    }
}
