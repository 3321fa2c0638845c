//! Authentication failures.

use thiserror::Error;

use sentinel_datasource::DriverError;

/// Why a token was not accepted.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request carried no token.
    #[error("token is missing")]
    Missing,
    /// The token could not be decoded.
    #[error("token is malformed: {reason}")]
    Malformed {
        /// What was wrong with it.
        reason: &'static str,
    },
    /// The signature does not match the claims.
    #[error("token signature is invalid")]
    BadSignature,
    /// The token is past its expiry.
    #[error("token has expired")]
    Expired,
    /// The token was issued by someone else.
    #[error("token issuer `{issuer}` is not trusted")]
    WrongIssuer {
        /// Issuer found in the claims.
        issuer: String,
    },
    /// The token id was revoked.
    #[error("token has been revoked")]
    Revoked,
    /// The token is too old to be refreshed.
    #[error("token refresh window has closed")]
    RefreshWindowClosed,
    /// The signing key was rejected by the MAC.
    #[error("signing key rejected: {0}")]
    Key(String),
    /// The revocation store could not be consulted.
    #[error("revocation store failed: {source}")]
    Revocation {
        /// Underlying store error.
        #[from]
        source: RevocationError,
    },
}

impl AuthError {
    pub(crate) const fn malformed(reason: &'static str) -> Self {
        Self::Malformed { reason }
    }
}

/// Errors raised by a revocation store.
#[derive(Debug, Error)]
pub enum RevocationError {
    /// The backing store cannot be used.
    #[error("revocation store unavailable: {message}")]
    Unavailable {
        /// Why.
        message: String,
    },
    /// The backing datasource failed.
    #[error("revocation store request failed: {source}")]
    Datasource {
        /// Driver error.
        #[from]
        source: DriverError,
    },
}
