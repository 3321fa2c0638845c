//! Bearer-token authentication and role-based authorization.
//!
//! [`TokenAuthenticator`] issues and verifies HMAC-SHA256 signed tokens in
//! the compact `header.claims.signature` form. Revoked token ids live in a
//! [`RevocationStore`]: Redis-backed when a Redis datasource offers key-value
//! access, in memory otherwise. [`RoleAuthorizer`] answers whether a role may
//! perform an action on a resource, with `*` matching anything.

mod authorizer;
mod error;
mod revocation;
mod token;

pub use authorizer::{Permission, PermissionParseError, RoleAuthorizer};
pub use error::{AuthError, RevocationError};
pub use revocation::{KvRevocationStore, MemoryRevocationStore, RevocationStore};
pub use token::{Claims, IssuedToken, TokenAuthenticator};

pub(crate) const AUTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::auth");
